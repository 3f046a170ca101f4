//! Canonical resource signatures.
//!
//! Two policies carry equal signatures exactly when their resource
//! patterns admit the same resource set: element order, value order,
//! duplicate values, and the order of additional resource maps do not
//! affect the signature.

use crate::policy::{Policy, PolicyResource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const SIGNATURE_VERSION: &str = "sig-v1";

/// Canonical string identifying a policy's resource footprint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceSignature(String);

impl ResourceSignature {
    /// The canonical string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the canonical signature over a policy's primary and
/// additional resources.
#[must_use]
pub fn resource_signature(policy: &Policy) -> ResourceSignature {
    let primary = canonical_map(&policy.resources);

    let mut additional: Vec<String> = policy
        .additional_resources
        .iter()
        .map(|m| canonical_map(m))
        .collect();
    additional.sort();

    let mut out = format!("{SIGNATURE_VERSION}:{{{primary}}}");

    if !additional.is_empty() {
        out.push_str(&format!("+[{}]", additional.join("|")));
    }

    ResourceSignature(out)
}

fn canonical_map(resources: &BTreeMap<String, PolicyResource>) -> String {
    let mut parts = Vec::with_capacity(resources.len());

    // BTreeMap iteration is already element-name ordered.
    for (element, resource) in resources {
        let values: BTreeSet<&str> = resource.values.iter().map(String::as_str).collect();
        let values: Vec<&str> = values.into_iter().collect();

        parts.push(format!(
            "{element}={{excludes={},recursive={},values=[{}]}}",
            resource.is_excludes,
            resource.is_recursive,
            values.join(",")
        ));
    }

    parts.join(";")
}
