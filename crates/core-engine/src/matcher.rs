//! Resource matching against policy patterns.
//!
//! Pattern values accept shell-style wildcards:
//! - `*` - matches any sequence of characters
//! - `?` - matches a single character
//!
//! Matching walks the service-def hierarchy element by element. A policy
//! that does not declare an element is treated as carrying an implicit
//! wildcard there. `is_excludes` inverts an element's value match;
//! `is_recursive` additionally matches values extending a pattern value
//! with a `/`-separated suffix.

use crate::context::{EvalContext, StringTokenReplacer};
use core_model::{AccessResource, PolicyResource, ServiceDef, WILDCARD};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How strictly a resource must line up with a policy pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Every element the resource declares must be covered by the
    /// pattern; the pattern must not be deeper than the resource
    Normal,
    /// Potential match: the pattern may apply to the resource or to its
    /// children, so depth mismatches on either side are ignored
    Any,
}

/// Iterative wildcard match with O(N+M) complexity.
///
/// Two-pointer scan with backtracking to the most recent `*`; runs of
/// consecutive `*` collapse into one. No recursion, no allocation.
#[must_use]
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern = pattern.as_bytes();
    let value = value.as_bytes();

    let mut p_idx = 0;
    let mut v_idx = 0;
    let mut star_idx: Option<usize> = None;
    let mut match_idx = 0;

    while v_idx < value.len() {
        match pattern.get(p_idx).copied() {
            Some(b'?') => {
                p_idx += 1;
                v_idx += 1;
            }
            Some(b'*') => {
                while pattern.get(p_idx).copied() == Some(b'*') {
                    p_idx += 1;
                }
                star_idx = Some(p_idx);
                match_idx = v_idx;
            }
            Some(c) if c == value[v_idx] => {
                p_idx += 1;
                v_idx += 1;
            }
            _ => {
                let Some(star) = star_idx else {
                    return false;
                };
                p_idx = star;
                match_idx += 1;
                v_idx = match_idx;
            }
        }
    }

    while pattern.get(p_idx).copied() == Some(b'*') {
        p_idx += 1;
    }

    p_idx == pattern.len()
}

/// Matches resources and resource patterns against one policy's
/// resource maps
#[derive(Debug, Clone)]
pub struct PolicyResourceMatcher {
    hierarchy: Vec<String>,
    resources: BTreeMap<String, PolicyResource>,
    additional: Vec<BTreeMap<String, PolicyResource>>,
    replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
}

impl PolicyResourceMatcher {
    /// Build a matcher over a policy's primary and additional resources
    #[must_use]
    pub fn new(
        service_def: &ServiceDef,
        resources: BTreeMap<String, PolicyResource>,
        additional: Vec<BTreeMap<String, PolicyResource>>,
        replacers: Arc<BTreeMap<String, StringTokenReplacer>>,
    ) -> Self {
        Self {
            hierarchy: service_def
                .hierarchy()
                .into_iter()
                .map(str::to_string)
                .collect(),
            resources,
            additional,
            replacers,
        }
    }

    /// Whether any of the policy's resource maps matches the resource
    #[must_use]
    pub fn is_match(
        &self,
        resource: &AccessResource,
        scope: MatchScope,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        self.map_matches(&self.resources, resource, scope, ctx)
            || self
                .additional
                .iter()
                .any(|map| self.map_matches(map, resource, scope, ctx))
    }

    /// Whether the primary pattern covers exactly the supplied resource:
    /// same elements, same value sets, no excludes. Pattern tokens are
    /// expanded through the context before comparison.
    #[must_use]
    pub fn is_complete_match_resource(
        &self,
        resource: &AccessResource,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        let declared: BTreeSet<&str> = self.resources.keys().map(String::as_str).collect();
        let supplied: BTreeSet<&str> = resource.elements().keys().map(String::as_str).collect();

        if declared != supplied {
            return false;
        }

        self.resources.iter().all(|(element, pattern)| {
            let values: BTreeSet<String> = resource
                .get(element)
                .unwrap_or(&[])
                .iter()
                .cloned()
                .collect();

            !pattern.is_excludes && self.expanded_value_set(element, pattern, ctx) == values
        })
    }

    /// Whether this policy's resource footprint equals another policy's:
    /// primary maps equal and additional maps equal as multisets.
    #[must_use]
    pub fn is_complete_match_policy(
        &self,
        resources: &BTreeMap<String, PolicyResource>,
        additional: &[BTreeMap<String, PolicyResource>],
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        if !self.map_complete_match(&self.resources, resources, ctx) {
            return false;
        }

        if self.additional.len() != additional.len() {
            return false;
        }

        let mut used = vec![false; additional.len()];

        for ours in &self.additional {
            let matched = additional
                .iter()
                .enumerate()
                .find(|(i, theirs)| !used[*i] && self.map_complete_match(ours, theirs, ctx))
                .map(|(i, _)| i);

            let Some(pos) = matched else {
                return false;
            };
            used[pos] = true;
        }

        true
    }

    /// Whether the primary pattern covers every resource the target
    /// pattern could match.
    ///
    /// Used by delegated-admin checks after the target's macro tokens
    /// have been collapsed to the wildcard: the admin must hold rights
    /// over the entire shape of what the target policy can match. An
    /// exclude pattern on either side cannot be proven covered and
    /// fails the check.
    #[must_use]
    pub fn covers_policy_resources(
        &self,
        target: &BTreeMap<String, PolicyResource>,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        for element in &self.hierarchy {
            let pattern = self.resources.get(element);
            let target_res = target.get(element);

            match (pattern, target_res) {
                // implicit wildcard on our side covers anything
                (None, _) => {}
                // target is implicitly unbounded at this level
                (Some(pattern), None) => {
                    if !self.pattern_has_wildcard(element, pattern, ctx) {
                        return false;
                    }
                }
                (Some(pattern), Some(target_res)) => {
                    if pattern.is_excludes {
                        return false;
                    }

                    if target_res.is_excludes {
                        if !self.pattern_has_wildcard(element, pattern, ctx) {
                            return false;
                        }
                        continue;
                    }

                    for target_value in &target_res.values {
                        if !self.pattern_covers_value(element, pattern, target_value, ctx) {
                            return false;
                        }
                    }
                }
            }
        }

        true
    }

    fn map_matches(
        &self,
        map: &BTreeMap<String, PolicyResource>,
        resource: &AccessResource,
        scope: MatchScope,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        for element in &self.hierarchy {
            let pattern = map.get(element);
            let values = resource.get(element);

            match (pattern, values) {
                (None, _) => {}
                (Some(_), None) => {
                    // pattern is deeper than the resource
                    if scope == MatchScope::Normal {
                        return false;
                    }
                }
                (Some(pattern), Some(values)) => {
                    let all_match = values
                        .iter()
                        .all(|value| self.element_matches(element, pattern, value, ctx));

                    if !all_match {
                        return false;
                    }
                }
            }
        }

        true
    }

    fn element_matches(
        &self,
        element: &str,
        pattern: &PolicyResource,
        value: &str,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        let matched = pattern.values.iter().any(|pattern_value| {
            let pattern_value = self.expand(element, pattern_value, ctx);

            value_matches(&pattern_value, value, pattern.is_recursive)
        });

        if pattern.is_excludes {
            !matched
        } else {
            matched
        }
    }

    fn pattern_covers_value(
        &self,
        element: &str,
        pattern: &PolicyResource,
        target_value: &str,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        pattern.values.iter().any(|pattern_value| {
            let pattern_value = self.expand(element, pattern_value, ctx);

            if target_value == WILDCARD {
                pattern_value == WILDCARD
            } else {
                value_matches(&pattern_value, target_value, pattern.is_recursive)
            }
        })
    }

    fn pattern_has_wildcard(
        &self,
        element: &str,
        pattern: &PolicyResource,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        !pattern.is_excludes
            && pattern
                .values
                .iter()
                .any(|v| self.expand(element, v, ctx) == WILDCARD)
    }

    fn map_complete_match(
        &self,
        ours: &BTreeMap<String, PolicyResource>,
        theirs: &BTreeMap<String, PolicyResource>,
        ctx: Option<&dyn EvalContext>,
    ) -> bool {
        if ours.len() != theirs.len() {
            return false;
        }

        ours.iter().all(|(element, a)| {
            theirs.get(element).is_some_and(|b| {
                let their_values: BTreeSet<String> = b.values.iter().cloned().collect();

                a.is_excludes == b.is_excludes
                    && a.is_recursive == b.is_recursive
                    && self.expanded_value_set(element, a, ctx) == their_values
            })
        })
    }

    fn expanded_value_set(
        &self,
        element: &str,
        pattern: &PolicyResource,
        ctx: Option<&dyn EvalContext>,
    ) -> BTreeSet<String> {
        pattern
            .values
            .iter()
            .map(|value| self.expand(element, value, ctx).into_owned())
            .collect()
    }

    fn expand<'a>(
        &self,
        element: &str,
        value: &'a str,
        ctx: Option<&dyn EvalContext>,
    ) -> Cow<'a, str> {
        match (ctx, self.replacers.get(element)) {
            (Some(ctx), Some(replacer)) if replacer.has_tokens(value) => {
                Cow::Owned(replacer.replace_tokens(value, ctx))
            }
            _ => Cow::Borrowed(value),
        }
    }
}

fn value_matches(pattern: &str, value: &str, recursive: bool) -> bool {
    if pattern == WILDCARD || wildcard_match(pattern, value) {
        return true;
    }

    recursive
        && value
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}
