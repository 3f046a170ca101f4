//! Per-zone policy repositories.
//!
//! A repository holds the evaluators for one (service, zone) pair,
//! ordered by policy id. `likely_match_evaluators` pre-filters through
//! an index on the root hierarchy element: literal first-element values
//! are bucketed, wildcard-bearing patterns go to a catch-all bucket.
//! The filter may return a superset of true matches but never misses
//! one.

use crate::context::StringTokenReplacer;
use crate::error::{EngineError, Result};
use crate::evaluator::PolicyEvaluator;
use core_model::{AccessResource, ChangeType, Policy, PolicyDelta, PolicyKind, ServiceDef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// The evaluators for one (service, zone) pair
#[derive(Debug)]
pub struct PolicyRepository {
    service_name: String,
    zone: String,
    service_def: Arc<ServiceDef>,
    replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
    implied_grants: Arc<BTreeMap<String, BTreeSet<String>>>,
    evaluators: Vec<Arc<PolicyEvaluator>>,
    root_element: Option<String>,
    exact_buckets: BTreeMap<String, Vec<usize>>,
    catch_all: Vec<usize>,
}

impl PolicyRepository {
    /// Build a repository from the enabled policies of one zone
    #[must_use]
    pub fn build(
        service_name: impl Into<String>,
        zone: impl Into<String>,
        policies: Vec<Arc<Policy>>,
        service_def: Arc<ServiceDef>,
        replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
        implied_grants: Arc<BTreeMap<String, BTreeSet<String>>>,
    ) -> Self {
        let mut policies = policies;
        policies.sort_by_key(|p| p.id);

        let evaluators: Vec<Arc<PolicyEvaluator>> = policies
            .into_iter()
            .map(|policy| {
                Arc::new(PolicyEvaluator::new(
                    policy,
                    &service_def,
                    Arc::clone(&replacers),
                    Arc::clone(&implied_grants),
                ))
            })
            .collect();

        let root_element = service_def.root_element().map(str::to_string);
        let (exact_buckets, catch_all) = build_index(&evaluators, root_element.as_deref());

        Self {
            service_name: service_name.into(),
            zone: zone.into(),
            service_def,
            replacers,
            implied_grants,
            evaluators,
            root_element,
            exact_buckets,
            catch_all,
        }
    }

    /// The service this repository belongs to
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The zone this repository serves; empty string is the default zone
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// The service-def the evaluators were built against
    #[must_use]
    pub fn service_def(&self) -> &Arc<ServiceDef> {
        &self.service_def
    }

    /// All evaluators, ordered by policy id
    #[must_use]
    pub fn policy_evaluators(&self) -> &[Arc<PolicyEvaluator>] {
        &self.evaluators
    }

    /// Whether the repository holds no policies
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    /// Evaluators whose pattern may match the resource, optionally
    /// restricted to one policy kind. Superset of the true matches.
    #[must_use]
    pub fn likely_match_evaluators(
        &self,
        resource: &AccessResource,
        kind: Option<PolicyKind>,
    ) -> Vec<Arc<PolicyEvaluator>> {
        let indices: Vec<usize> = match self
            .root_element
            .as_deref()
            .and_then(|root| resource.get(root))
        {
            None => (0..self.evaluators.len()).collect(),
            Some(values) => {
                let mut selected: BTreeSet<usize> = self.catch_all.iter().copied().collect();

                for value in values {
                    if let Some(bucket) = self.exact_buckets.get(value) {
                        selected.extend(bucket.iter().copied());
                    }
                }

                selected.into_iter().collect()
            }
        };

        indices
            .into_iter()
            .map(|i| &self.evaluators[i])
            .filter(|e| kind.is_none_or(|k| e.policy().kind == k))
            .cloned()
            .collect()
    }

    /// Apply a zone's policy deltas, producing a rebuilt repository.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownPolicy` when an update or removal
    /// references a policy this repository does not hold; the caller
    /// treats that as an incompatible delta.
    pub fn rebuilt_with(&self, deltas: &[&PolicyDelta]) -> Result<Self> {
        let mut by_id: BTreeMap<u64, Arc<Policy>> = self
            .evaluators
            .iter()
            .map(|e| (e.policy().id, e.policy_arc()))
            .collect();

        for delta in deltas {
            let id = delta.policy.id;

            match delta.change {
                ChangeType::Added => {
                    if delta.policy.is_enabled {
                        by_id.insert(id, Arc::new(delta.policy.clone()));
                    }
                }
                ChangeType::Updated => {
                    if by_id.remove(&id).is_none() {
                        return Err(EngineError::UnknownPolicy(id));
                    }
                    if delta.policy.is_enabled {
                        by_id.insert(id, Arc::new(delta.policy.clone()));
                    }
                }
                ChangeType::Removed => {
                    if by_id.remove(&id).is_none() {
                        return Err(EngineError::UnknownPolicy(id));
                    }
                }
            }
        }

        debug!(
            zone = %self.zone,
            policies = by_id.len(),
            deltas = deltas.len(),
            "rebuilt policy repository"
        );

        Ok(Self::build(
            self.service_name.clone(),
            self.zone.clone(),
            by_id.into_values().collect(),
            Arc::clone(&self.service_def),
            Arc::clone(&self.replacers),
            Arc::clone(&self.implied_grants),
        ))
    }
}

fn build_index(
    evaluators: &[Arc<PolicyEvaluator>],
    root_element: Option<&str>,
) -> (BTreeMap<String, Vec<usize>>, Vec<usize>) {
    let mut exact: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut catch_all = Vec::new();

    let Some(root) = root_element else {
        return (exact, (0..evaluators.len()).collect());
    };

    for (idx, evaluator) in evaluators.iter().enumerate() {
        match evaluator.policy().resources.get(root) {
            // no root pattern: implicit wildcard
            None => catch_all.push(idx),
            Some(pattern) => {
                let indexable = !pattern.is_excludes
                    && !pattern.is_recursive
                    && pattern
                        .values
                        .iter()
                        .all(|v| !v.contains('*') && !v.contains('?') && !v.contains("${"));

                if indexable {
                    for value in &pattern.values {
                        exact.entry(value.clone()).or_default().push(idx);
                    }
                } else {
                    catch_all.push(idx);
                }
            }
        }
    }

    // additional resources bypass the index
    for (idx, evaluator) in evaluators.iter().enumerate() {
        if !evaluator.policy().additional_resources.is_empty() && !catch_all.contains(&idx) {
            catch_all.push(idx);
        }
    }

    (exact, catch_all)
}
