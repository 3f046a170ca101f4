// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Zoneguard Team

//! # core-admin
//!
//! The policy administration facade: delegated-admin authorization
//! checks and policy discovery over an immutable engine snapshot.
//!
//! Readers take a read guard, clone the snapshot handle, and evaluate
//! lock-free; `set_roles` and delta application are the only writers.
//! Decision operations return plain booleans with diagnostics in the
//! log; discovery operations return empty collections on missing data.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access_types;
pub mod admin;
pub mod store;

pub use access_types::{all_access_types, all_modified_access_types};
pub use admin::{AdminOptions, DeltaApplied, PolicyAdmin};
pub use store::{MemoryServiceStore, ServiceStore, StoreError};
