//! Versioned service-policy bundles.
//!
//! A `ServicePolicies` bundle is what a policy engine snapshot is built
//! from: either a full policy set, or an incremental change set
//! (`policy_deltas` plus the `base_policy_version` it applies to).

use crate::error::{ModelError, Result};
use crate::policy::Policy;
use crate::service_def::ServiceDef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a delta entry changes the policy set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// The policy is new
    Added,
    /// The policy replaces the stored one with the same id
    Updated,
    /// The policy is withdrawn
    Removed,
}

/// One incremental change to a service's policy set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDelta {
    /// What happens to the policy
    pub change: ChangeType,
    /// The policy affected; for `Removed` only id and zone are consulted
    pub policy: Policy,
}

/// Tag service-def plus the tag policies evaluated against resource tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPolicies {
    /// The tag service's resource hierarchy (single `tag` element)
    pub service_def: ServiceDef,
    /// Tag policies across all zones
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// A security zone's resource prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityZoneSpec {
    /// Resource prefixes owned by the zone, element name → pattern values
    pub resources: Vec<BTreeMap<String, Vec<String>>>,
    /// Whether the zone is associated with the tag service; zone-scoped
    /// tag policies apply only inside associated zones
    pub tag_service_associated: bool,
}

/// The versioned bundle a policy engine snapshot is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePolicies {
    /// Service instance name
    pub service_name: String,
    /// Version of the policy set this bundle describes
    pub policy_version: u64,
    /// Resource hierarchy and access-type tables
    pub service_def: ServiceDef,
    /// Full policy set (ignored when the bundle is a delta)
    #[serde(default)]
    pub policies: Vec<Policy>,
    /// Tag policies, when the service is tag-enabled
    #[serde(default)]
    pub tag_policies: Option<TagPolicies>,
    /// Security zones keyed by name
    #[serde(default)]
    pub zones: BTreeMap<String, SecurityZoneSpec>,
    /// For delta bundles: the policy version the deltas apply to
    #[serde(default)]
    pub base_policy_version: Option<u64>,
    /// Incremental changes since `base_policy_version`
    #[serde(default)]
    pub policy_deltas: Vec<PolicyDelta>,
}

impl ServicePolicies {
    /// Whether this bundle is an incremental change set
    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.base_policy_version.is_some()
    }

    /// Parse a bundle from JSON and validate its policies against the
    /// bundled service-def.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or when any policy fails
    /// validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: Self = serde_json::from_str(json)?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Validate every bundled policy against its service-def, plus the
    /// bundle-level invariants: policy ids are unique within the
    /// resource and tag policy sets, and a full-bundle policy may only
    /// reference a zone the bundle declares. Delta entries are checked
    /// against the target snapshot's zones at apply time, not here.
    ///
    /// # Errors
    ///
    /// Returns the first policy validation failure, or
    /// `ModelError::InvalidBundle` when a bundle-level invariant is
    /// broken.
    pub fn validate(&self) -> Result<()> {
        let mut seen_ids = BTreeSet::new();

        for policy in &self.policies {
            policy.validate(&self.service_def)?;

            if !seen_ids.insert(policy.id) {
                return Err(ModelError::InvalidBundle(format!(
                    "duplicate policy id {}",
                    policy.id
                )));
            }

            if !policy.zone.is_empty() && !self.zones.contains_key(&policy.zone) {
                return Err(ModelError::InvalidBundle(format!(
                    "policy {} references undeclared zone `{}`",
                    policy.id, policy.zone
                )));
            }
        }

        for delta in &self.policy_deltas {
            delta.policy.validate(&self.service_def)?;
        }

        if let Some(tag_policies) = &self.tag_policies {
            let mut seen_tag_ids = BTreeSet::new();

            for policy in &tag_policies.policies {
                policy.validate(&tag_policies.service_def)?;

                if !seen_tag_ids.insert(policy.id) {
                    return Err(ModelError::InvalidBundle(format!(
                        "duplicate tag policy id {}",
                        policy.id
                    )));
                }
            }
        }

        Ok(())
    }
}
