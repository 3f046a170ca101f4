//! Error types for core-engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or querying a policy engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// More than one security zone matched a grant/revoke resource
    #[error("resource matches multiple security zones: {zones:?}")]
    AmbiguousZone {
        /// Every zone that matched
        zones: Vec<String>,
    },

    /// A delta referenced a zone the snapshot does not know
    #[error("policy delta references unknown zone `{0}`")]
    UnknownZone(String),

    /// A delta updated or removed a policy the snapshot does not hold
    #[error("policy delta references unknown policy id {0}")]
    UnknownPolicy(u64),

    /// Model-level failure while building the engine
    #[error(transparent)]
    Model(#[from] core_model::ModelError),
}
