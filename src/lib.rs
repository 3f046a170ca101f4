// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Zoneguard Team

//! # zoneguard
//!
//! Policy administration engine for resource-based authorization with
//! security zones: given a versioned snapshot of access-control
//! policies, it answers delegated-admin questions (may this user read
//! or modify this policy?) and discovery questions (which policies
//! apply to this resource?).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zoneguard::admin::{AdminOptions, PolicyAdmin};
//! use zoneguard::model::{AccessResource, Roles, ServicePolicies};
//! use std::collections::BTreeSet;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = ServicePolicies::from_json(&std::fs::read_to_string("policies.json")?)?;
//! let admin = PolicyAdmin::new(&bundle, Roles::default(), AdminOptions::default())?;
//!
//! let resource = AccessResource::new()
//!     .with("database", "sales")
//!     .with("table", "orders");
//! let requested: BTreeSet<String> = ["select".to_string()].into();
//!
//! let allowed = admin.is_delegated_admin_access_allowed(
//!     &resource, "", "alice", &BTreeSet::new(), &requested,
//! );
//! println!("delegated admin: {allowed}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! This facade crate re-exports the following modules:
//!
//! - [`model`] - policies, service-defs, roles, bundles (from `core-model`)
//! - [`engine`] - matchers, evaluators, snapshot engine (from `core-engine`)
//! - [`admin`] - the delegated-admin facade (from `core-admin`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain model module.
///
/// Re-exports `core_model`: policies, service definitions, role tables,
/// and versioned policy bundles.
pub mod model {
    pub use core_model::*;
}

/// Engine module.
///
/// Re-exports `core_engine`: resource matchers, policy evaluators, and
/// the immutable snapshot engine.
pub mod engine {
    pub use core_engine::*;
}

/// Administration module.
///
/// Re-exports `core_admin`: the delegated-admin and discovery facade.
pub mod admin {
    pub use core_admin::*;
}

// Convenience re-exports at root level
pub use core_admin::{AdminOptions, PolicyAdmin};
pub use core_model::{AccessResource, Policy, Roles, ServiceDef, ServicePolicies};
