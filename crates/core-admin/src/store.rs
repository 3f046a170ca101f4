//! The external policy-store interface consumed by modify checks.

use core_model::Policy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure fetching a policy from the external store
#[derive(Debug, Error)]
#[error("policy store error: {0}")]
pub struct StoreError(pub String);

/// Lookup interface the admin consults for the stored version of a
/// policy during modify checks
pub trait ServiceStore: Send + Sync {
    /// Fetch a policy by id; `Ok(None)` when the store has no such
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the store is unreachable or the fetch
    /// fails; the admin logs the failure and treats the policy as
    /// absent.
    fn policy_by_id(&self, id: u64) -> Result<Option<Policy>, StoreError>;
}

/// In-memory store, useful for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryServiceStore {
    policies: RwLock<BTreeMap<u64, Policy>>,
}

impl MemoryServiceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy
    pub fn put(&self, policy: Policy) {
        self.policies.write().insert(policy.id, policy);
    }

    /// Remove a policy by id
    pub fn remove(&self, id: u64) {
        self.policies.write().remove(&id);
    }
}

impl ServiceStore for MemoryServiceStore {
    fn policy_by_id(&self, id: u64) -> Result<Option<Policy>, StoreError> {
        Ok(self.policies.read().get(&id).cloned())
    }
}
