//! Per-policy evaluation.
//!
//! A `PolicyEvaluator` answers two families of questions about one
//! policy: which of a set of requested access types it grants to a
//! principal on a resource (delegated-admin authority, carried by allow
//! items with `delegate_admin`), and whether it plainly allows a single
//! access (allow/deny plus exceptions).

use crate::context::{EvalContext, StringTokenReplacer};
use crate::matcher::{MatchScope, PolicyResourceMatcher};
use core_model::{AccessResource, Policy, PolicyItem, PolicyResource, ServiceDef, ADMIN_ACCESS};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Evaluates one policy against resources and principals
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    policy: Arc<Policy>,
    matcher: PolicyResourceMatcher,
    implied_grants: Arc<BTreeMap<String, BTreeSet<String>>>,
}

impl PolicyEvaluator {
    /// Build an evaluator for a policy
    #[must_use]
    pub fn new(
        policy: Arc<Policy>,
        service_def: &ServiceDef,
        replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
        implied_grants: Arc<BTreeMap<String, BTreeSet<String>>>,
    ) -> Self {
        let matcher = PolicyResourceMatcher::new(
            service_def,
            policy.resources.clone(),
            policy.additional_resources.clone(),
            replacers,
        );

        Self {
            policy,
            matcher,
            implied_grants,
        }
    }

    /// The evaluated policy
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Shared handle to the evaluated policy
    #[must_use]
    pub fn policy_arc(&self) -> Arc<Policy> {
        Arc::clone(&self.policy)
    }

    /// Whether the policy's resource pattern matches the resource
    #[must_use]
    pub fn is_match(
        &self,
        resource: &AccessResource,
        scope: MatchScope,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.matcher.is_match(resource, scope, ctx)
    }

    /// Whether the policy's primary pattern covers exactly the resource
    #[must_use]
    pub fn is_complete_match_resource(
        &self,
        resource: &AccessResource,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.matcher.is_complete_match_resource(resource, ctx)
    }

    /// Whether the policy's resource footprint equals the given one
    #[must_use]
    pub fn is_complete_match_policy(
        &self,
        resources: &BTreeMap<String, PolicyResource>,
        additional: &[BTreeMap<String, PolicyResource>],
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.matcher
            .is_complete_match_policy(resources, additional, ctx)
    }

    /// Requested access types this policy delegates to the principal on
    /// a concrete resource. Empty when the resource does not match.
    #[must_use]
    pub fn allowed_accesses(
        &self,
        resource: &AccessResource,
        user: &str,
        groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        requested: &BTreeSet<String>,
        ctx: Option<&dyn EvalContext>,
    ) -> BTreeSet<String> {
        if !self.matcher.is_match(resource, MatchScope::Normal, ctx) {
            return BTreeSet::new();
        }

        self.delegated_grants(user, groups, roles, requested)
    }

    /// Requested access types this policy delegates to the principal
    /// over a target resource *pattern*. Empty when the policy does not
    /// cover the pattern's full shape.
    #[must_use]
    pub fn allowed_accesses_for_resources(
        &self,
        target: &BTreeMap<String, PolicyResource>,
        user: &str,
        groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        requested: &BTreeSet<String>,
        ctx: Option<&dyn EvalContext>,
    ) -> BTreeSet<String> {
        if !self.matcher.covers_policy_resources(target, ctx) {
            return BTreeSet::new();
        }

        self.delegated_grants(user, groups, roles, requested)
    }

    /// Plain access decision for one access type over a policy's full
    /// resource footprint (primary plus additional maps).
    #[must_use]
    pub fn is_access_allowed(
        &self,
        resources: &BTreeMap<String, PolicyResource>,
        additional: &[BTreeMap<String, PolicyResource>],
        user: &str,
        groups: &BTreeSet<String>,
        access_type: &str,
    ) -> bool {
        let covers_all = self.matcher.covers_policy_resources(resources, None)
            && additional
                .iter()
                .all(|map| self.matcher.covers_policy_resources(map, None));

        if !covers_all {
            return false;
        }

        let roles = BTreeSet::new();

        let allowed = self.item_grants(&self.policy.allow, user, groups, &roles, false)
            .contains(access_type)
            && !self
                .item_grants(&self.policy.allow_exceptions, user, groups, &roles, false)
                .contains(access_type);

        if !allowed {
            return false;
        }

        let denied = self.item_grants(&self.policy.deny, user, groups, &roles, false)
            .contains(access_type)
            && !self
                .item_grants(&self.policy.deny_exceptions, user, groups, &roles, false)
                .contains(access_type);

        !denied
    }

    /// Grants from delegating allow items, minus allow exceptions,
    /// restricted to the requested set. The admin sentinel is granted by
    /// any delegating item that applies to the principal.
    fn delegated_grants(
        &self,
        user: &str,
        groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        requested: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let granted = self.item_grants(&self.policy.allow, user, groups, roles, true);
        let excepted = self.item_grants(&self.policy.allow_exceptions, user, groups, roles, false);

        let has_delegating_item = self
            .policy
            .allow
            .iter()
            .any(|item| item.delegate_admin && item.applies_to(user, groups, roles));

        requested
            .iter()
            .filter(|access_type| {
                if access_type.as_str() == ADMIN_ACCESS {
                    has_delegating_item
                } else {
                    granted.contains(*access_type) && !excepted.contains(*access_type)
                }
            })
            .cloned()
            .collect()
    }

    /// Implied-grant-expanded accesses declared by the items that apply
    /// to the principal.
    fn item_grants(
        &self,
        items: &[PolicyItem],
        user: &str,
        groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
        delegating_only: bool,
    ) -> BTreeSet<String> {
        let mut grants = BTreeSet::new();

        for item in items {
            if delegating_only && !item.delegate_admin {
                continue;
            }

            if !item.applies_to(user, groups, roles) {
                continue;
            }

            for access in &item.accesses {
                if !access.is_allowed {
                    continue;
                }

                match self.implied_grants.get(&access.access_type) {
                    Some(expanded) => grants.extend(expanded.iter().cloned()),
                    None => {
                        grants.insert(access.access_type.clone());
                    }
                }
            }
        }

        grants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::{AccessTypeDef, ItemAccess, ResourceDef};

    fn service_def() -> ServiceDef {
        ServiceDef {
            name: "warehouse".into(),
            resources: vec![
                ResourceDef::new("database", 10),
                ResourceDef::new("table", 20),
            ],
            access_types: vec![
                AccessTypeDef::simple("select"),
                AccessTypeDef::new("update", ["select"]),
            ],
            data_mask_access_types: Vec::new(),
            row_filter_access_types: Vec::new(),
        }
    }

    fn admin_policy(access_types: &[&str], delegate_admin: bool) -> Arc<Policy> {
        let mut resources = BTreeMap::new();
        resources.insert("database".to_string(), PolicyResource::new(["sales"]));
        resources.insert("table".to_string(), PolicyResource::new(["*"]));

        let mut policy = Policy::new(1, "sales-admin", resources);
        policy.allow.push(PolicyItem {
            users: vec!["alice".into()],
            accesses: access_types.iter().map(|t| ItemAccess::new(*t)).collect(),
            delegate_admin,
            ..Default::default()
        });

        Arc::new(policy)
    }

    fn evaluator(policy: Arc<Policy>) -> PolicyEvaluator {
        let def = service_def();
        let implied = Arc::new(def.expanded_implied_grants());

        PolicyEvaluator::new(policy, &def, Arc::new(BTreeMap::new()), implied)
    }

    fn requested(types: &[&str]) -> BTreeSet<String> {
        types.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_allowed_accesses_with_implied_grants() {
        let e = evaluator(admin_policy(&["update"], true));
        let resource = AccessResource::new()
            .with("database", "sales")
            .with("table", "orders");

        let allowed = e.allowed_accesses(
            &resource,
            "alice",
            &BTreeSet::new(),
            &BTreeSet::new(),
            &requested(&["select", "update"]),
            None,
        );

        // update implies select
        assert_eq!(allowed, requested(&["select", "update"]));
    }

    #[test]
    fn test_allowed_accesses_requires_delegate_admin() {
        let e = evaluator(admin_policy(&["update"], false));
        let resource = AccessResource::new()
            .with("database", "sales")
            .with("table", "orders");

        let allowed = e.allowed_accesses(
            &resource,
            "alice",
            &BTreeSet::new(),
            &BTreeSet::new(),
            &requested(&["update"]),
            None,
        );

        assert!(allowed.is_empty());
    }

    #[test]
    fn test_allowed_accesses_wrong_resource() {
        let e = evaluator(admin_policy(&["update"], true));
        let resource = AccessResource::new()
            .with("database", "finance")
            .with("table", "ledger");

        assert!(e
            .allowed_accesses(
                &resource,
                "alice",
                &BTreeSet::new(),
                &BTreeSet::new(),
                &requested(&["update"]),
                None,
            )
            .is_empty());
    }

    #[test]
    fn test_admin_sentinel_granted_by_delegating_item() {
        let e = evaluator(admin_policy(&["select"], true));
        let resource = AccessResource::new()
            .with("database", "sales")
            .with("table", "orders");

        let allowed = e.allowed_accesses(
            &resource,
            "alice",
            &BTreeSet::new(),
            &BTreeSet::new(),
            &requested(&[ADMIN_ACCESS]),
            None,
        );

        assert_eq!(allowed, requested(&[ADMIN_ACCESS]));
    }

    #[test]
    fn test_allowed_accesses_for_resources_cover() {
        let e = evaluator(admin_policy(&["update"], true));

        let mut covered = BTreeMap::new();
        covered.insert("database".to_string(), PolicyResource::new(["sales"]));
        covered.insert("table".to_string(), PolicyResource::new(["orders"]));

        let mut uncovered = BTreeMap::new();
        uncovered.insert("database".to_string(), PolicyResource::new(["finance"]));

        let principal_requested = requested(&["update"]);

        assert!(!e
            .allowed_accesses_for_resources(
                &covered,
                "alice",
                &BTreeSet::new(),
                &BTreeSet::new(),
                &principal_requested,
                None,
            )
            .is_empty());
        assert!(e
            .allowed_accesses_for_resources(
                &uncovered,
                "alice",
                &BTreeSet::new(),
                &BTreeSet::new(),
                &principal_requested,
                None,
            )
            .is_empty());
    }

    #[test]
    fn test_is_access_allowed_deny_wins() {
        let mut resources = BTreeMap::new();
        resources.insert("database".to_string(), PolicyResource::new(["sales"]));

        let mut policy = Policy::new(2, "deny-update", resources.clone());
        policy.allow.push(PolicyItem {
            users: vec!["bob".into()],
            accesses: vec![ItemAccess::new("update")],
            ..Default::default()
        });
        policy.deny.push(PolicyItem {
            users: vec!["bob".into()],
            accesses: vec![ItemAccess::new("update")],
            ..Default::default()
        });

        let e = evaluator(Arc::new(policy));

        assert!(!e.is_access_allowed(&resources, &[], "bob", &BTreeSet::new(), "update"));
        // the deny item's implied grants cover select as well
        assert!(!e.is_access_allowed(&resources, &[], "bob", &BTreeSet::new(), "select"));
    }
}
