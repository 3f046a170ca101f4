//! Access-type computation for delegated-admin checks.
//!
//! `all_access_types` collects every implied-expanded access a policy
//! carries. `all_modified_access_types` computes the authorization
//! surface of a transition between two signature-equal policies: the
//! union, over users, groups, and roles, of each principal's
//! added-or-removed accesses. Revoking a grant therefore costs exactly
//! the revoked access types, never more.

use core_model::{Policy, PolicyKind, ADMIN_ACCESS};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, warn};

type ImpliedGrants = BTreeMap<String, BTreeSet<String>>;
type PrincipalAccesses = BTreeMap<String, BTreeSet<String>>;

/// Every implied-expanded access type carried by the policy's item
/// collections.
///
/// An empty result for a valid kind substitutes the admin sentinel so
/// the delegated-admin check stays meaningful. An unrecognized kind
/// yields the empty set: such policies never pass delegated admin.
#[must_use]
pub fn all_access_types(policy: &Policy, implied_grants: &ImpliedGrants) -> BTreeSet<String> {
    if policy.kind == PolicyKind::Unknown {
        error!(policy_id = policy.id, "unknown policy kind, returning empty access-type set");
        return BTreeSet::new();
    }

    let mut out = BTreeSet::new();

    for item in policy.active_items() {
        for access in &item.accesses {
            expand_into(&access.access_type, implied_grants, &mut out);
        }
    }

    if out.is_empty() {
        out.insert(ADMIN_ACCESS.to_string());
    }

    out
}

/// The symmetric per-principal delta of accesses between two policies.
///
/// For each of the three principal dimensions, a principal present in
/// the new policy contributes its added accesses, one present in the
/// old policy contributes its removed accesses. The admin sentinel is
/// substituted when nothing changed.
#[must_use]
pub fn all_modified_access_types(
    old_policy: &Policy,
    new_policy: &Policy,
    implied_grants: &ImpliedGrants,
) -> BTreeSet<String> {
    let old = collect_access_types(old_policy, implied_grants);
    let new = collect_access_types(new_policy, implied_grants);

    let mut out = BTreeSet::new();
    out.extend(access_types_diff(&new.users, &old.users));
    out.extend(access_types_diff(&new.groups, &old.groups));
    out.extend(access_types_diff(&new.roles, &old.roles));

    if out.is_empty() {
        out.insert(ADMIN_ACCESS.to_string());
    }

    out
}

#[derive(Default)]
struct CollectedAccesses {
    users: PrincipalAccesses,
    groups: PrincipalAccesses,
    roles: PrincipalAccesses,
}

fn collect_access_types(policy: &Policy, implied_grants: &ImpliedGrants) -> CollectedAccesses {
    let mut collected = CollectedAccesses::default();

    if policy.kind == PolicyKind::Unknown {
        error!(policy_id = policy.id, "unknown policy kind, collecting no access types");
        return collected;
    }

    for item in policy.active_items() {
        let mut accesses = BTreeSet::new();
        for access in &item.accesses {
            expand_into(&access.access_type, implied_grants, &mut accesses);
        }

        for user in &item.users {
            collected
                .users
                .entry(user.clone())
                .or_default()
                .extend(accesses.iter().cloned());
        }

        for group in &item.groups {
            collected
                .groups
                .entry(group.clone())
                .or_default()
                .extend(accesses.iter().cloned());
        }

        for role in &item.roles {
            collected
                .roles
                .entry(role.clone())
                .or_default()
                .extend(accesses.iter().cloned());
        }
    }

    collected
}

fn access_types_diff(new: &PrincipalAccesses, old: &PrincipalAccesses) -> BTreeSet<String> {
    let mut out = BTreeSet::new();

    for (principal, new_accesses) in new {
        match old.get(principal) {
            Some(old_accesses) => {
                out.extend(new_accesses.difference(old_accesses).cloned());
            }
            None => out.extend(new_accesses.iter().cloned()),
        }
    }

    for (principal, old_accesses) in old {
        match new.get(principal) {
            Some(new_accesses) => {
                out.extend(old_accesses.difference(new_accesses).cloned());
            }
            None => out.extend(old_accesses.iter().cloned()),
        }
    }

    out
}

fn expand_into(access_type: &str, implied_grants: &ImpliedGrants, out: &mut BTreeSet<String>) {
    match implied_grants.get(access_type) {
        Some(expanded) => out.extend(expanded.iter().cloned()),
        None => {
            warn!(access_type, "access type not in service-def, skipping");
        }
    }
}
