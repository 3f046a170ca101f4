// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Zoneguard Team

//! # core-engine
//!
//! The snapshot policy engine: immutable bundles of per-zone policy
//! repositories built from a [`core_model::ServicePolicies`] bundle.
//!
//! - [`matcher`]: wildcard resource matching with excludes and recursion
//! - [`evaluator`]: per-policy evaluation of allowed accesses
//! - [`repository`]: evaluators for one (service, zone) pair with
//!   likely-match pre-filtering
//! - [`engine`]: the immutable snapshot plus copy-on-write delta
//!   application
//! - [`zones`]: the resource-prefix zone index
//! - [`context`]: evaluation contexts and `${NAME}` token replacement

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod matcher;
pub mod perf;
pub mod repository;
pub mod request;
pub mod zones;

pub use context::{EvalContext, MapContext, StringTokenReplacer, WildcardContext};
pub use engine::{DeltaOutcome, PolicyEngine};
pub use error::{EngineError, Result};
pub use evaluator::PolicyEvaluator;
pub use matcher::{wildcard_match, MatchScope, PolicyResourceMatcher};
pub use perf::PerfTracer;
pub use repository::PolicyRepository;
pub use request::{AccessRequest, RequestPreprocessor, TagRef};
pub use zones::ZoneIndex;
