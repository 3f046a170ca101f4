//! Error types for core-model

use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while constructing or validating model types
#[derive(Debug, Error)]
pub enum ModelError {
    /// Policy failed structural validation
    #[error("invalid policy [{id}]: {reason}")]
    InvalidPolicy {
        /// Offending policy id
        id: u64,
        /// Why validation failed
        reason: String,
    },

    /// Policy declares a resource element the service-def does not know
    #[error("unknown resource element `{element}` in service-def `{service_def}`")]
    UnknownResourceElement {
        /// The undeclared element name
        element: String,
        /// Service-def the policy was validated against
        service_def: String,
    },

    /// Policy name exceeds the maximum length
    #[error("policy name exceeds maximum {max} characters (length: {length})")]
    NameTooLong {
        /// Maximum allowed length
        max: usize,
        /// Actual name length
        length: usize,
    },

    /// Bundle is internally inconsistent
    #[error("invalid service-policies bundle: {0}")]
    InvalidBundle(String),

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing failed: {0}")]
    Toml(#[from] toml::de::Error),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),
}
