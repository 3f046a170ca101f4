//! The policy administration facade.
//!
//! One `PolicyAdmin` wraps an engine snapshot behind a reader/writer
//! lock. Read operations clone the snapshot handle under the read guard
//! and evaluate lock-free on snapshot-local data; `set_roles`,
//! `set_service_store`, and `apply_policy_delta` are the only writers.
//! Every reader observes either the pre-swap or the post-swap snapshot,
//! never a mixture.

use crate::access_types::{all_access_types, all_modified_access_types};
use crate::store::ServiceStore;
use core_engine::{
    AccessRequest, DeltaOutcome, EngineError, EvalContext, MatchScope, PerfTracer, PolicyEngine,
    PolicyRepository, RequestPreprocessor, TagRef, WildcardContext,
};
use core_model::{
    resource_signature, AccessResource, Policy, PolicyKind, PolicyResource, Roles, ServiceDef,
    ServicePolicies,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Construction options for [`PolicyAdmin`]
#[derive(Debug, Clone)]
pub struct AdminOptions {
    /// When false, deployments guarantee external serialization; guard
    /// acquisition is not reported and contention is impossible
    pub enable_locking: bool,
}

impl Default for AdminOptions {
    fn default() -> Self {
        Self {
            enable_locking: true,
        }
    }
}

/// Result of applying an incremental bundle to the admin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaApplied {
    /// The delta was a no-op; the snapshot identity is unchanged
    Reused,
    /// A successor snapshot was swapped in under the write lock
    Swapped,
    /// The delta was incompatible; the caller must reload from a full
    /// bundle
    RequiresReload,
}

struct AdminState {
    engine: Arc<PolicyEngine>,
    roles: Arc<Roles>,
    store: Option<Arc<dyn ServiceStore>>,
}

/// Delegated-admin authorization and policy discovery over one service's
/// policy snapshot
pub struct PolicyAdmin {
    state: RwLock<AdminState>,
    locking_enabled: bool,
}

impl PolicyAdmin {
    /// Build an admin from a full service-policies bundle.
    ///
    /// # Errors
    ///
    /// Returns an error when the bundle fails validation.
    pub fn new(
        bundle: &ServicePolicies,
        roles: Roles,
        options: AdminOptions,
    ) -> Result<Self, EngineError> {
        let engine = PolicyEngine::build(bundle)?;

        Ok(Self {
            state: RwLock::new(AdminState {
                engine,
                roles: Arc::new(roles),
                store: None,
            }),
            locking_enabled: options.enable_locking,
        })
    }

    /// Whether guard acquisition is reported (see [`AdminOptions`])
    #[must_use]
    pub fn is_locking_enabled(&self) -> bool {
        self.locking_enabled
    }

    /// Attach the external policy store consulted by modify checks
    pub fn set_service_store(&self, store: Arc<dyn ServiceStore>) {
        self.state.write().store = Some(store);
    }

    /// Whether a user may perform all of the requested access types on a
    /// concrete resource, according to the delegating policies of the
    /// named zone.
    ///
    /// Short-circuits once the union of allowed accesses covers every
    /// requested type. Returns `false` when the zone is unknown or the
    /// requested set is empty.
    #[must_use]
    pub fn is_delegated_admin_access_allowed(
        &self,
        resource: &AccessResource,
        zone_name: &str,
        user: &str,
        user_groups: &BTreeSet<String>,
        access_types: &BTreeSet<String>,
    ) -> bool {
        debug!(zone_name, user, ?access_types, "delegated-admin resource check");

        let perf = PerfTracer::is_enabled().then(|| {
            PerfTracer::begin(format!(
                "is_delegated_admin_access_allowed(user={user},access_types={access_types:?})"
            ))
        });

        let mut ret = false;
        let (engine, roles, _) = self.snapshot();

        if access_types.is_empty() {
            error!(user, "empty access-type set, nothing to authorize");
        } else if let Some(repository) = engine.repository_for_zone(zone_name) {
            let role_set = roles.roles_for_user_and_groups(user, user_groups);
            let mut remaining = access_types.clone();

            for evaluator in
                repository.likely_match_evaluators(resource, Some(PolicyKind::Access))
            {
                let allowed = evaluator.allowed_accesses(
                    resource,
                    user,
                    user_groups,
                    &role_set,
                    &remaining,
                    None,
                );

                if !allowed.is_empty() {
                    remaining.retain(|t| !allowed.contains(t));

                    if remaining.is_empty() {
                        debug!(policy_id = evaluator.policy().id, "access granted by policy");

                        ret = true;
                        break;
                    }
                }
            }
        }

        if let Some(perf) = perf {
            perf.log();
        }

        debug!(zone_name, user, ret, "delegated-admin resource check done");

        ret
    }

    /// Whether the user may *read* the given policy through delegated
    /// admin: authorization for any one of the policy's access types
    /// suffices.
    #[must_use]
    pub fn is_delegated_admin_access_allowed_for_read(
        &self,
        policy: &Policy,
        user: &str,
        user_groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.check_delegated_admin(policy, user, user_groups, roles, true, ctx)
    }

    /// Whether the user may *modify* the policy into the given intended
    /// state: authorization for every access type the transition
    /// touches.
    #[must_use]
    pub fn is_delegated_admin_access_allowed_for_modify(
        &self,
        policy: &Policy,
        user: &str,
        user_groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.check_delegated_admin(policy, user, user_groups, roles, false, ctx)
    }

    /// Policies of the zone whose pattern covers exactly the supplied
    /// resource. Empty when the zone is unknown or nothing matches.
    #[must_use]
    pub fn get_exact_match_policies(
        &self,
        resource: &AccessResource,
        zone_name: &str,
        ctx: Option<&dyn EvalContext>,
    ) -> Vec<Arc<Policy>> {
        let (engine, _, _) = self.snapshot();
        let mut ret = Vec::new();

        if let Some(repository) = engine.repository_for_zone(zone_name) {
            for evaluator in repository.policy_evaluators() {
                if evaluator.is_complete_match_resource(resource, ctx) {
                    ret.push(evaluator.policy_arc());
                }
            }
        }

        debug!(zone_name, matches = ret.len(), "exact-match policies for resource");

        ret
    }

    /// Policies whose resource footprint equals the given policy's.
    #[must_use]
    pub fn get_exact_match_policies_for_policy(
        &self,
        policy: &Policy,
        ctx: Option<&dyn EvalContext>,
    ) -> Vec<Arc<Policy>> {
        let (engine, _, _) = self.snapshot();
        let mut ret = Vec::new();

        if let Some(repository) = engine.repository_for_matched_zone(policy) {
            for evaluator in repository.policy_evaluators() {
                if evaluator.is_complete_match_policy(
                    &policy.resources,
                    &policy.additional_resources,
                    ctx,
                ) {
                    ret.push(evaluator.policy_arc());
                }
            }
        }

        debug!(policy_id = policy.id, matches = ret.len(), "exact-match policies for policy");

        ret
    }

    /// Every policy that exactly matches or potentially applies to the
    /// resource, across all zones the resource belongs to.
    #[must_use]
    pub fn get_matching_policies(&self, resource: &AccessResource) -> Vec<Arc<Policy>> {
        self.get_matching_policies_with_tags(resource, Vec::new())
    }

    /// As [`PolicyAdmin::get_matching_policies`], additionally sweeping
    /// the tag-policy repository for the supplied resource tags under
    /// the tag-zone containment rule.
    #[must_use]
    pub fn get_matching_policies_with_tags(
        &self,
        resource: &AccessResource,
        tags: Vec<TagRef>,
    ) -> Vec<Arc<Policy>> {
        debug!(?resource, "matching policies");

        let (engine, _, _) = self.snapshot();

        let mut request = AccessRequest::any_access(resource.clone()).with_tags(tags);
        RequestPreprocessor::new(&engine).pre_process(&mut request);

        let zone_names = request.context().zone_names.clone();
        let mut ret = Vec::new();

        if zone_names.is_empty() {
            matching_policies_for_zone(&engine, &request, "", &mut ret);
        } else {
            for zone_name in &zone_names {
                matching_policies_for_zone(&engine, &request, zone_name, &mut ret);
            }
        }

        // a policy can match through several tags or zones
        let mut seen = BTreeSet::new();
        ret.retain(|policy| seen.insert(policy.id));

        debug!(matches = ret.len(), "matching policies done");

        ret
    }

    /// The policy version of the snapshot readers currently observe
    #[must_use]
    pub fn get_policy_version(&self) -> u64 {
        self.snapshot().0.policy_version()
    }

    /// The version of the active role table
    #[must_use]
    pub fn get_role_version(&self) -> u64 {
        self.snapshot().1.version
    }

    /// The service instance name
    #[must_use]
    pub fn get_service_name(&self) -> String {
        self.snapshot().0.service_name().to_string()
    }

    /// The service-def of the active snapshot
    #[must_use]
    pub fn get_service_def(&self) -> Arc<ServiceDef> {
        Arc::clone(self.snapshot().0.service_def())
    }

    /// Replace the role table. The only mutation besides snapshot swaps.
    pub fn set_roles(&self, roles: Roles) {
        let mut guard = self.state.write();

        if self.locking_enabled {
            debug!("acquired write lock for set_roles");
        }

        debug!(role_version = roles.version, "replacing role table");

        guard.roles = Arc::new(roles);
    }

    /// Effective roles for a (user, groups) pair under the active role
    /// table
    #[must_use]
    pub fn get_roles_from_user_and_groups(
        &self,
        user: &str,
        groups: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        self.snapshot().1.roles_for_user_and_groups(user, groups)
    }

    /// All zones whose resource prefixes contain the resource and its
    /// children
    #[must_use]
    pub fn get_zone_names_for_resource(
        &self,
        resource: &BTreeMap<String, Vec<String>>,
    ) -> BTreeSet<String> {
        self.snapshot().0.zone_index().zones_for_resource(resource)
    }

    /// The single zone a grant/revoke resource falls into; `Ok(None)`
    /// means the default zone.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AmbiguousZone` when several zones match.
    pub fn get_uniquely_matched_zone_name(
        &self,
        resource: &BTreeMap<String, Vec<String>>,
    ) -> Result<Option<String>, EngineError> {
        self.snapshot().0.zone_index().uniquely_matched_zone(resource)
    }

    /// Whether any default-zone policy allows the access type over the
    /// given resource footprint. Checks only unzoned policies.
    #[must_use]
    pub fn is_access_allowed_by_unzoned_policies(
        &self,
        resources: &BTreeMap<String, PolicyResource>,
        additional_resources: &[BTreeMap<String, PolicyResource>],
        user: &str,
        user_groups: &BTreeSet<String>,
        access_type: &str,
    ) -> bool {
        let perf = PerfTracer::is_enabled().then(|| {
            PerfTracer::begin(format!(
                "is_access_allowed_by_unzoned_policies(user={user},access_type={access_type})"
            ))
        });

        let (engine, _, _) = self.snapshot();
        let mut ret = false;

        for evaluator in engine.default_repository().policy_evaluators() {
            if evaluator.is_access_allowed(
                resources,
                additional_resources,
                user,
                user_groups,
                access_type,
            ) {
                debug!(policy_id = evaluator.policy().id, "access granted by policy");

                ret = true;
                break;
            }
        }

        if let Some(perf) = perf {
            perf.log();
        }

        ret
    }

    /// Default-zone policies whose own footprint the user may access
    /// with the given access type.
    #[must_use]
    pub fn allowed_unzoned_policies(
        &self,
        user: &str,
        user_groups: &BTreeSet<String>,
        access_type: &str,
    ) -> Vec<Arc<Policy>> {
        let (engine, _, _) = self.snapshot();
        let mut ret = Vec::new();

        for evaluator in engine.default_repository().policy_evaluators() {
            let policy = evaluator.policy();

            if self.is_access_allowed_by_unzoned_policies(
                &policy.resources,
                &policy.additional_resources,
                user,
                user_groups,
                access_type,
            ) {
                ret.push(evaluator.policy_arc());
            }
        }

        ret
    }

    /// Apply an incremental bundle, swapping in a successor snapshot
    /// under the write lock when the delta changes anything.
    pub fn apply_policy_delta(&self, bundle: &ServicePolicies) -> DeltaApplied {
        let mut guard = self.state.write();

        if self.locking_enabled {
            debug!("acquired write lock for apply_policy_delta");
        }

        match guard.engine.clone_with_delta(bundle) {
            None => {
                warn!(
                    bundle_version = bundle.policy_version,
                    "incompatible delta, full reload required"
                );

                DeltaApplied::RequiresReload
            }
            Some(DeltaOutcome::Unchanged) => DeltaApplied::Reused,
            Some(DeltaOutcome::Rebuilt(next)) => {
                debug!(policy_version = next.policy_version(), "snapshot swapped");

                guard.engine = next;

                DeltaApplied::Swapped
            }
        }
    }

    /// The two-phase read/modify check over an intended policy state.
    fn check_delegated_admin(
        &self,
        policy: &Policy,
        user: &str,
        user_groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        is_read: bool,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        debug!(policy_id = policy.id, user, is_read, "delegated-admin policy check");

        let perf = PerfTracer::is_enabled().then(|| {
            PerfTracer::begin(format!(
                "check_delegated_admin(policy={},user={user})",
                policy.id
            ))
        });

        let (engine, _, store) = self.snapshot();
        let mut ret = false;

        if let Some(repository) = engine.repository_for_matched_zone(policy) {
            let implied_grants = engine.implied_grants();

            if is_read {
                let access_types = all_access_types(policy, implied_grants);

                ret = self.check_policy_accesses(
                    &engine,
                    repository,
                    policy,
                    user,
                    user_groups,
                    roles,
                    &access_types,
                    true,
                    ctx,
                );
            } else {
                let old_policy = match &store {
                    Some(store) => store.policy_by_id(policy.id).unwrap_or_else(|err| {
                        error!(policy_id = policy.id, %err, "cannot fetch stored policy");
                        None
                    }),
                    None => {
                        warn!(policy_id = policy.id, "no service store attached");
                        None
                    }
                };

                match old_policy {
                    Some(old_policy) => {
                        let old_signature = resource_signature(&old_policy);
                        let new_signature = resource_signature(policy);

                        if old_signature == new_signature {
                            // same footprint: only the grant delta needs
                            // authorization
                            let modified =
                                all_modified_access_types(&old_policy, policy, implied_grants);

                            ret = self.check_policy_accesses(
                                &engine,
                                repository,
                                policy,
                                user,
                                user_groups,
                                roles,
                                &modified,
                                false,
                                ctx,
                            );
                        } else {
                            // the footprint moved: the caller must be able
                            // to retire the old policy and install the new
                            let removed = all_access_types(&old_policy, implied_grants);
                            let old_change_allowed = self.check_policy_accesses(
                                &engine,
                                repository,
                                &old_policy,
                                user,
                                user_groups,
                                roles,
                                &removed,
                                false,
                                ctx,
                            );

                            if old_change_allowed {
                                let added = all_access_types(policy, implied_grants);

                                ret = self.check_policy_accesses(
                                    &engine,
                                    repository,
                                    policy,
                                    user,
                                    user_groups,
                                    roles,
                                    &added,
                                    false,
                                    ctx,
                                );
                            }
                        }
                    }
                    None => {
                        warn!(
                            policy_id = policy.id,
                            "stored policy unavailable, requiring authorization for all access types"
                        );

                        let added = all_access_types(policy, implied_grants);

                        ret = self.check_policy_accesses(
                            &engine,
                            repository,
                            policy,
                            user,
                            user_groups,
                            roles,
                            &added,
                            false,
                            ctx,
                        );
                    }
                }
            }
        }

        if let Some(perf) = perf {
            perf.log();
        }

        debug!(policy_id = policy.id, user, is_read, ret, "delegated-admin policy check done");

        ret
    }

    /// Decide whether the caller holds the given access types over a
    /// policy's full resource footprint.
    ///
    /// Read passes on any overlap; modify requires full cover. Access
    /// types granted on the primary resources are intersected with the
    /// grants on every additional resource map: an access counts only
    /// when it is allowed on every resource the policy names.
    #[allow(clippy::too_many_arguments)]
    fn check_policy_accesses(
        &self,
        engine: &PolicyEngine,
        repository: &PolicyRepository,
        policy: &Policy,
        user: &str,
        user_groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        access_types: &BTreeSet<String>,
        is_read: bool,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        if access_types.is_empty() {
            error!(policy_id = policy.id, "could not get access types for policy");
            return false;
        }

        debug!(policy_id = policy.id, ?access_types, "checking delegated-admin access");

        let mut allowed = allowed_accesses_union(
            engine,
            repository,
            &policy.resources,
            user,
            user_groups,
            roles,
            access_types,
            ctx,
        );

        let mut ret = if is_read {
            !allowed.is_disjoint(access_types)
        } else {
            access_types.iter().all(|t| allowed.contains(t))
        };

        if ret && !policy.additional_resources.is_empty() {
            for additional in &policy.additional_resources {
                let extra = allowed_accesses_union(
                    engine,
                    repository,
                    additional,
                    user,
                    user_groups,
                    roles,
                    access_types,
                    ctx,
                );

                if extra.is_empty() {
                    allowed.clear();
                    ret = false;
                } else {
                    allowed.retain(|t| extra.contains(t));

                    ret = if is_read {
                        !allowed.is_empty()
                    } else {
                        access_types.iter().all(|t| extra.contains(t))
                    };
                }

                if !ret {
                    break;
                }
            }
        }

        if !ret {
            let unauthorized: Vec<&String> = if allowed.is_empty() {
                access_types.iter().collect()
            } else {
                access_types.difference(&allowed).collect()
            };

            info!(
                policy_id = policy.id,
                ?unauthorized,
                "accesses not authorized by any delegated-admin policy"
            );
        }

        ret
    }

    /// Clone the snapshot handles under the read guard; evaluation then
    /// runs lock-free.
    fn snapshot(&self) -> (Arc<PolicyEngine>, Arc<Roles>, Option<Arc<dyn ServiceStore>>) {
        let guard = self.state.read();

        if self.locking_enabled {
            tracing::trace!("acquired read lock");
        }

        (
            Arc::clone(&guard.engine),
            Arc::clone(&guard.roles),
            guard.store.clone(),
        )
    }
}

/// Union of delegated grants over every evaluator of the repository,
/// against a macro-expanded target pattern. Breaks once the union covers
/// every requested type.
#[allow(clippy::too_many_arguments)]
fn allowed_accesses_union(
    engine: &PolicyEngine,
    repository: &PolicyRepository,
    resources: &BTreeMap<String, PolicyResource>,
    user: &str,
    user_groups: &BTreeSet<String>,
    roles: &BTreeSet<String>,
    access_types: &BTreeSet<String>,
    ctx: Option<&dyn EvalContext>,
) -> BTreeSet<String> {
    let target = resources_with_macros_replaced(engine, resources);
    let mut ret = BTreeSet::new();

    for evaluator in repository.policy_evaluators() {
        let allowed = evaluator.allowed_accesses_for_resources(
            &target,
            user,
            user_groups,
            roles,
            access_types,
            ctx,
        );

        if !allowed.is_empty() {
            ret.extend(allowed);

            if access_types.iter().all(|t| ret.contains(t)) {
                break;
            }
        }
    }

    ret
}

/// Rewrite a policy's resource values with every macro token collapsed
/// to the wildcard. Elements without a token replacer pass through
/// unchanged.
fn resources_with_macros_replaced(
    engine: &PolicyEngine,
    resources: &BTreeMap<String, PolicyResource>,
) -> BTreeMap<String, PolicyResource> {
    let mut ret = BTreeMap::new();

    for (element, resource) in resources {
        match engine.token_replacer(element) {
            Some(replacer) => {
                let values = resource
                    .values
                    .iter()
                    .map(|value| replacer.replace_tokens(value, &WildcardContext))
                    .collect();

                ret.insert(
                    element.clone(),
                    PolicyResource {
                        values,
                        is_excludes: resource.is_excludes,
                        is_recursive: resource.is_recursive,
                    },
                );
            }
            None => {
                ret.insert(element.clone(), resource.clone());
            }
        }
    }

    ret
}

fn matching_policies_for_zone(
    engine: &PolicyEngine,
    request: &AccessRequest,
    zone_name: &str,
    out: &mut Vec<Arc<Policy>>,
) {
    let Some(repository) = engine.repository_for_zone(zone_name) else {
        return;
    };

    let scope = if request.is_access_type_any() {
        MatchScope::Any
    } else {
        MatchScope::Normal
    };

    let tag_repository = engine.tag_repository().filter(|r| !r.is_empty());

    if let Some(tag_repository) = tag_repository.filter(|_| !request.context().tags.is_empty()) {
        // tag policies authored for a zone never apply outside it
        let use_default_zone_tags =
            !engine.zone_index().is_zone_associated_with_tag_service(zone_name);

        for tag in &request.context().tags {
            let tag_resource = AccessResource::new().with("tag", tag.tag_type.clone());

            for evaluator in tag_repository.likely_match_evaluators(&tag_resource, None) {
                let policy_zone = evaluator.policy().zone.as_str();

                if use_default_zone_tags {
                    if !policy_zone.is_empty() {
                        debug!(
                            policy_id = evaluator.policy().id,
                            policy_zone, "tag policy outside the default zone, skipping"
                        );
                        continue;
                    }
                } else if policy_zone != zone_name {
                    debug!(
                        policy_id = evaluator.policy().id,
                        policy_zone, zone_name, "tag policy outside the resource zone, skipping"
                    );
                    continue;
                }

                if evaluator.is_match(&tag_resource, scope, None) {
                    out.push(evaluator.policy_arc());
                }
            }
        }
    }

    if !repository.is_empty() {
        for evaluator in repository.likely_match_evaluators(request.resource(), None) {
            if evaluator.is_match(request.resource(), scope, None) {
                out.push(evaluator.policy_arc());
            }
        }
    }
}
