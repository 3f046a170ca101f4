//! Service definitions: the resource hierarchy and access-type table a
//! service exposes, including the implied-grant implication table.

use crate::policy::PolicyKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One element of a service's resource hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Element name (e.g. `database`)
    pub name: String,
    /// Position in the hierarchy; lower levels are closer to the root
    pub level: u32,
    /// Parent element name, if any
    #[serde(default)]
    pub parent: Option<String>,
    /// Whether `${NAME}` tokens in pattern values are expanded for this
    /// element
    #[serde(default)]
    pub replace_tokens: bool,
}

impl ResourceDef {
    /// Create a plain resource element
    pub fn new(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            level,
            parent: None,
            replace_tokens: false,
        }
    }

    /// Enable token replacement for this element
    #[must_use]
    pub fn with_token_replacement(mut self) -> Self {
        self.replace_tokens = true;
        self
    }
}

/// A named access type and the accesses it implies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTypeDef {
    /// Access-type name (e.g. `select`)
    pub name: String,
    /// Access types implicitly granted alongside this one
    #[serde(default)]
    pub implied_grants: Vec<String>,
}

impl AccessTypeDef {
    /// Create an access type with implied grants
    pub fn new<I, S>(name: impl Into<String>, implied_grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            implied_grants: implied_grants.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an access type implying nothing beyond itself
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implied_grants: Vec::new(),
        }
    }
}

/// Resource hierarchy and access-type tables for one service type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDef {
    /// Service-def name
    pub name: String,
    /// Resource elements; ordered by `level` via [`ServiceDef::hierarchy`]
    pub resources: Vec<ResourceDef>,
    /// Access types usable in access policies
    pub access_types: Vec<AccessTypeDef>,
    /// Access types usable in data-mask policies
    #[serde(default)]
    pub data_mask_access_types: Vec<AccessTypeDef>,
    /// Access types usable in row-filter policies
    #[serde(default)]
    pub row_filter_access_types: Vec<AccessTypeDef>,
}

impl ServiceDef {
    /// Resource element names in hierarchy order (by level)
    #[must_use]
    pub fn hierarchy(&self) -> Vec<&str> {
        let mut defs: Vec<&ResourceDef> = self.resources.iter().collect();
        defs.sort_by_key(|d| d.level);
        defs.into_iter().map(|d| d.name.as_str()).collect()
    }

    /// The root element of the hierarchy, if the def declares any
    #[must_use]
    pub fn root_element(&self) -> Option<&str> {
        self.resources
            .iter()
            .min_by_key(|d| d.level)
            .map(|d| d.name.as_str())
    }

    /// Look up a resource element by name
    #[must_use]
    pub fn resource_def(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.iter().find(|d| d.name == name)
    }

    /// The access-type table used by the given policy kind
    #[must_use]
    pub fn access_types_for(&self, kind: PolicyKind) -> &[AccessTypeDef] {
        match kind {
            PolicyKind::Access | PolicyKind::Unknown => &self.access_types,
            PolicyKind::DataMask => &self.data_mask_access_types,
            PolicyKind::RowFilter => &self.row_filter_access_types,
        }
    }

    /// Expand the implication table to its transitive closure.
    ///
    /// Each declared access type `X` maps to `{X}` united with every
    /// access reachable through implied grants. Covers all three
    /// access-type tables.
    #[must_use]
    pub fn expanded_implied_grants(&self) -> BTreeMap<String, BTreeSet<String>> {
        let all_defs = self
            .access_types
            .iter()
            .chain(&self.data_mask_access_types)
            .chain(&self.row_filter_access_types);

        let mut expanded: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for def in all_defs.clone() {
            let entry = expanded.entry(def.name.clone()).or_default();
            entry.insert(def.name.clone());
            entry.extend(def.implied_grants.iter().cloned());
        }

        // Fixpoint over the implication table; terminates because the
        // closed sets only grow and are bounded by the declared types.
        loop {
            let mut changed = false;

            for def in all_defs.clone() {
                let mut additions = BTreeSet::new();

                if let Some(current) = expanded.get(&def.name) {
                    for implied in current {
                        if implied == &def.name {
                            continue;
                        }
                        if let Some(transitive) = expanded.get(implied) {
                            additions.extend(
                                transitive.difference(current).cloned().collect::<Vec<_>>(),
                            );
                        }
                    }
                }

                if !additions.is_empty() {
                    expanded.entry(def.name.clone()).or_default().extend(additions);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse_def() -> ServiceDef {
        ServiceDef {
            name: "warehouse".into(),
            resources: vec![
                ResourceDef::new("table", 20),
                ResourceDef::new("database", 10),
                ResourceDef::new("column", 30),
            ],
            access_types: vec![
                AccessTypeDef::simple("select"),
                AccessTypeDef::new("update", ["select"]),
                AccessTypeDef::new("admin_ops", ["update"]),
            ],
            data_mask_access_types: Vec::new(),
            row_filter_access_types: Vec::new(),
        }
    }

    #[test]
    fn test_hierarchy_orders_by_level() {
        assert_eq!(
            warehouse_def().hierarchy(),
            vec!["database", "table", "column"]
        );
    }

    #[test]
    fn test_root_element() {
        assert_eq!(warehouse_def().root_element(), Some("database"));
    }

    #[test]
    fn test_implied_grants_direct() {
        let expanded = warehouse_def().expanded_implied_grants();

        let update: Vec<_> = expanded["update"].iter().cloned().collect();
        assert_eq!(update, vec!["select", "update"]);
    }

    #[test]
    fn test_implied_grants_transitive() {
        let expanded = warehouse_def().expanded_implied_grants();

        // admin_ops implies update, which implies select
        assert!(expanded["admin_ops"].contains("select"));
        assert_eq!(expanded["admin_ops"].len(), 3);
    }

    #[test]
    fn test_implied_grants_self_only() {
        let expanded = warehouse_def().expanded_implied_grants();

        assert_eq!(expanded["select"].len(), 1);
        assert!(expanded["select"].contains("select"));
    }
}
