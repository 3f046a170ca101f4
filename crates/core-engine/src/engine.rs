//! The immutable policy-engine snapshot.
//!
//! A `PolicyEngine` bundles one repository per zone, an optional
//! tag-policy repository, the service-def, the zone index, and the
//! token replacers. Snapshots never change after construction;
//! `clone_with_delta` produces a successor sharing every repository a
//! delta does not touch.

use crate::context::StringTokenReplacer;
use crate::error::{EngineError, Result};
use crate::repository::PolicyRepository;
use crate::zones::ZoneIndex;
use core_model::{Policy, PolicyDelta, ServiceDef, ServicePolicies};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of applying a delta to a snapshot
#[derive(Debug)]
pub enum DeltaOutcome {
    /// The delta changed nothing; keep using the same snapshot
    Unchanged,
    /// A successor snapshot; untouched repositories are shared
    Rebuilt(Arc<PolicyEngine>),
}

/// Immutable bundle of per-zone repositories at one policy version
#[derive(Debug)]
pub struct PolicyEngine {
    service_name: String,
    policy_version: u64,
    service_def: Arc<ServiceDef>,
    implied_grants: Arc<BTreeMap<String, BTreeSet<String>>>,
    repositories: BTreeMap<String, Arc<PolicyRepository>>,
    tag_repository: Option<Arc<PolicyRepository>>,
    zone_index: ZoneIndex,
    replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
}

impl PolicyEngine {
    /// Build a snapshot from a full service-policies bundle.
    ///
    /// Disabled policies are skipped. A repository is created for the
    /// default zone even when it holds no policies, plus one per zone
    /// that policies or zone specs reference.
    ///
    /// # Errors
    ///
    /// Returns an error when the bundle fails validation.
    pub fn build(bundle: &ServicePolicies) -> Result<Arc<Self>> {
        bundle.validate()?;

        let service_def = Arc::new(bundle.service_def.clone());
        let implied_grants = Arc::new(service_def.expanded_implied_grants());
        let replacers = Arc::new(build_replacers(&service_def));

        let mut by_zone: BTreeMap<String, Vec<Arc<Policy>>> = BTreeMap::new();
        by_zone.insert(String::new(), Vec::new());
        for name in bundle.zones.keys() {
            by_zone.insert(name.clone(), Vec::new());
        }

        for policy in bundle.policies.iter().filter(|p| p.is_enabled) {
            by_zone
                .entry(policy.zone.clone())
                .or_default()
                .push(Arc::new(policy.clone()));
        }

        let repositories: BTreeMap<String, Arc<PolicyRepository>> = by_zone
            .into_iter()
            .map(|(zone, policies)| {
                let repository = Arc::new(PolicyRepository::build(
                    bundle.service_name.clone(),
                    zone.clone(),
                    policies,
                    Arc::clone(&service_def),
                    Arc::clone(&replacers),
                    Arc::clone(&implied_grants),
                ));

                (zone, repository)
            })
            .collect();

        let tag_repository = match &bundle.tag_policies {
            Some(tag_policies) => {
                let tag_def = Arc::new(tag_policies.service_def.clone());
                let tag_implied = Arc::new(tag_def.expanded_implied_grants());

                Some(Arc::new(PolicyRepository::build(
                    bundle.service_name.clone(),
                    String::new(),
                    tag_policies
                        .policies
                        .iter()
                        .filter(|p| p.is_enabled)
                        .map(|p| Arc::new(p.clone()))
                        .collect(),
                    tag_def,
                    Arc::new(BTreeMap::new()),
                    tag_implied,
                )))
            }
            None => None,
        };

        debug!(
            service = %bundle.service_name,
            policy_version = bundle.policy_version,
            zones = repositories.len(),
            "built policy engine snapshot"
        );

        Ok(Arc::new(Self {
            service_name: bundle.service_name.clone(),
            policy_version: bundle.policy_version,
            service_def,
            implied_grants,
            repositories,
            tag_repository,
            zone_index: ZoneIndex::new(bundle.zones.clone()),
            replacers,
        }))
    }

    /// Service instance name
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Version of the policy set this snapshot was built from
    #[must_use]
    pub fn policy_version(&self) -> u64 {
        self.policy_version
    }

    /// The service-def shared by every repository
    #[must_use]
    pub fn service_def(&self) -> &Arc<ServiceDef> {
        &self.service_def
    }

    /// Expanded implied-grant table
    #[must_use]
    pub fn implied_grants(&self) -> &Arc<BTreeMap<String, BTreeSet<String>>> {
        &self.implied_grants
    }

    /// Repository for a zone; `None` when the zone is unknown
    #[must_use]
    pub fn repository_for_zone(&self, zone: &str) -> Option<&Arc<PolicyRepository>> {
        self.repositories.get(zone)
    }

    /// Repository for the zone a policy belongs to
    #[must_use]
    pub fn repository_for_matched_zone(&self, policy: &Policy) -> Option<&Arc<PolicyRepository>> {
        self.repository_for_zone(&policy.zone)
    }

    /// The default-zone repository
    #[must_use]
    pub fn default_repository(&self) -> &Arc<PolicyRepository> {
        &self.repositories[""]
    }

    /// The tag-policy repository, when the service is tag-enabled
    #[must_use]
    pub fn tag_repository(&self) -> Option<&Arc<PolicyRepository>> {
        self.tag_repository.as_ref()
    }

    /// Whether the snapshot carries any tag policies
    #[must_use]
    pub fn has_tag_policies(&self) -> bool {
        self.tag_repository.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// The zone index
    #[must_use]
    pub fn zone_index(&self) -> &ZoneIndex {
        &self.zone_index
    }

    /// Token replacer for a resource element, if the element opts in
    #[must_use]
    pub fn token_replacer(&self, element: &str) -> Option<&StringTokenReplacer> {
        self.replacers.get(element)
    }

    /// Apply an incremental bundle to this snapshot.
    ///
    /// Returns `None` when the delta cannot be applied (wrong service,
    /// wrong base version, changes to unknown zones or policies) and
    /// the caller must reload from a full bundle. Otherwise untouched
    /// repositories are shared with the successor by reference.
    #[must_use]
    pub fn clone_with_delta(
        self: &Arc<Self>,
        bundle: &ServicePolicies,
    ) -> Option<DeltaOutcome> {
        if bundle.service_name != self.service_name {
            warn!(
                expected = %self.service_name,
                got = %bundle.service_name,
                "delta bundle for a different service"
            );
            return None;
        }

        let Some(base_version) = bundle.base_policy_version else {
            debug!("bundle is not a delta; full rebuild required");
            return None;
        };

        if base_version != self.policy_version {
            warn!(
                snapshot_version = self.policy_version,
                base_version, "delta base version does not match the snapshot"
            );
            return None;
        }

        if bundle.policy_deltas.is_empty() && bundle.policy_version == self.policy_version {
            return Some(DeltaOutcome::Unchanged);
        }

        let repositories = match self.rebuilt_repositories(&bundle.policy_deltas) {
            Ok(repositories) => repositories,
            Err(err) => {
                warn!(%err, "delta rejected");
                return None;
            }
        };

        debug!(
            from_version = self.policy_version,
            to_version = bundle.policy_version,
            deltas = bundle.policy_deltas.len(),
            "cloned snapshot with delta"
        );

        Some(DeltaOutcome::Rebuilt(Arc::new(Self {
            service_name: self.service_name.clone(),
            policy_version: bundle.policy_version,
            service_def: Arc::clone(&self.service_def),
            implied_grants: Arc::clone(&self.implied_grants),
            repositories,
            tag_repository: self.tag_repository.clone(),
            zone_index: self.zone_index.clone(),
            replacers: Arc::clone(&self.replacers),
        })))
    }

    /// Rebuild the repositories a delta touches, sharing the rest by
    /// reference.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownZone` when a delta targets a zone
    /// this snapshot has no repository for, or
    /// `EngineError::UnknownPolicy` when an update or removal
    /// references a policy the zone does not hold.
    fn rebuilt_repositories(
        &self,
        deltas: &[PolicyDelta],
    ) -> Result<BTreeMap<String, Arc<PolicyRepository>>> {
        let mut deltas_by_zone: BTreeMap<&str, Vec<&PolicyDelta>> = BTreeMap::new();
        for delta in deltas {
            deltas_by_zone
                .entry(delta.policy.zone.as_str())
                .or_default()
                .push(delta);
        }

        let mut repositories = self.repositories.clone();

        for (zone, deltas) in deltas_by_zone {
            let current = self
                .repositories
                .get(zone)
                .ok_or_else(|| EngineError::UnknownZone(zone.to_string()))?;

            let rebuilt = current.rebuilt_with(&deltas)?;
            repositories.insert(zone.to_string(), Arc::new(rebuilt));
        }

        Ok(repositories)
    }
}

fn build_replacers(service_def: &ServiceDef) -> BTreeMap<String, StringTokenReplacer> {
    service_def
        .resources
        .iter()
        .filter(|def| def.replace_tokens)
        .map(|def| (def.name.clone(), StringTokenReplacer::new()))
        .collect()
}
