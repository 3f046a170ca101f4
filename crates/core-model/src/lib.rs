// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Zoneguard Team

//! # core-model
//!
//! Domain types for zoned, versioned access-control policies:
//! - `Policy`: resource patterns plus grant/deny item collections
//! - `ServiceDef`: resource hierarchy and access-type implication table
//! - `Roles`: role membership table with nested-role resolution
//! - `ServicePolicies`: the versioned bundle a policy engine is built from
//! - resource signatures: canonical strings identifying a policy's
//!   resource footprint
//!
//! All types use `BTreeMap`/`BTreeSet` internally for deterministic
//! serialization.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bundle;
pub mod error;
pub mod policy;
pub mod roles;
pub mod service_def;
pub mod signature;

pub use bundle::{ChangeType, PolicyDelta, SecurityZoneSpec, ServicePolicies, TagPolicies};
pub use error::{ModelError, Result};
pub use policy::{
    AccessResource, DataMaskItem, ItemAccess, Policy, PolicyItem, PolicyKind, PolicyResource,
    RowFilterItem,
};
pub use roles::{Role, Roles};
pub use service_def::{AccessTypeDef, ResourceDef, ServiceDef};
pub use signature::{resource_signature, ResourceSignature};

/// Pseudo access type granting delegated-admin authority itself.
pub const ADMIN_ACCESS: &str = "admin";

/// Marker access type meaning "any access" in discovery requests.
pub const ANY_ACCESS: &str = "_any";

/// The wildcard every macro token collapses to during admin checks.
pub const WILDCARD: &str = "*";

/// Group name that matches every user.
pub const GROUP_PUBLIC: &str = "public";

/// Maximum length for a policy name.
pub const MAX_POLICY_NAME_LENGTH: usize = 128;
