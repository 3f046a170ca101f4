//! Policy definitions and validation logic
//!
//! A `Policy` pairs a resource pattern (element name → `PolicyResource`)
//! with item collections describing who may do what. The item collections
//! in play depend on `PolicyKind`: access policies carry allow/deny plus
//! exception lists, data-mask and row-filter policies carry a single list
//! each. `Policy::active_items` is the shared iterator over whichever
//! collections the kind uses.

use crate::error::{ModelError, Result};
use crate::service_def::ServiceDef;
use crate::{GROUP_PUBLIC, MAX_POLICY_NAME_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_true() -> bool {
    true
}

/// Discriminates the item collections a policy carries.
///
/// Unrecognized kind strings deserialize to `Unknown` instead of failing
/// the whole bundle; such policies evaluate to nothing and are reported
/// at error level by the admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyKind {
    /// Plain access policy: allow/deny plus exceptions
    #[default]
    Access,
    /// Data-masking policy
    DataMask,
    /// Row-filtering policy
    RowFilter,
    /// Any kind this build does not recognize
    #[serde(other)]
    Unknown,
}

/// One element of a policy's resource pattern
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyResource {
    /// Pattern values; `*` and `?` wildcards, `${NAME}` macro tokens
    pub values: Vec<String>,
    /// Invert the value match
    pub is_excludes: bool,
    /// Also match values extending a pattern value with a `/` suffix
    pub is_recursive: bool,
}

impl PolicyResource {
    /// Create a plain (non-exclude, non-recursive) resource pattern
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            is_excludes: false,
            is_recursive: false,
        }
    }

    /// Mark this pattern as excluding its values
    #[must_use]
    pub fn excludes(mut self) -> Self {
        self.is_excludes = true;
        self
    }

    /// Mark this pattern as matching descendants of its values
    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.is_recursive = true;
        self
    }
}

/// A single access declared by a policy item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAccess {
    /// Access-type name from the service-def table
    #[serde(rename = "type")]
    pub access_type: String,
    /// Whether the access is granted (deserialization default: true)
    #[serde(default = "default_true")]
    pub is_allowed: bool,
}

impl ItemAccess {
    /// Create a granted access of the given type
    pub fn new(access_type: impl Into<String>) -> Self {
        Self {
            access_type: access_type.into(),
            is_allowed: true,
        }
    }
}

/// Principals and the accesses a policy grants or denies them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyItem {
    /// User names this item applies to
    pub users: Vec<String>,
    /// Group names this item applies to (`public` matches everyone)
    pub groups: Vec<String>,
    /// Role names this item applies to
    pub roles: Vec<String>,
    /// The accesses declared by this item
    pub accesses: Vec<ItemAccess>,
    /// Whether this item also conveys delegated-admin authority
    pub delegate_admin: bool,
}

impl PolicyItem {
    /// Whether this item applies to the given principal.
    #[must_use]
    pub fn applies_to(&self, user: &str, groups: &BTreeSet<String>, roles: &BTreeSet<String>) -> bool {
        self.users.iter().any(|u| u == user)
            || self
                .groups
                .iter()
                .any(|g| g == GROUP_PUBLIC || groups.contains(g))
            || self.roles.iter().any(|r| roles.contains(r))
    }
}

/// Data-mask policy item: the shared principal/access fields plus the
/// mask to apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMaskItem {
    /// Shared principal and access fields
    #[serde(flatten)]
    pub item: PolicyItem,
    /// Mask type to apply (e.g. `MASK_HASH`)
    pub mask_type: String,
}

/// Row-filter policy item: the shared fields plus the filter expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilterItem {
    /// Shared principal and access fields
    #[serde(flatten)]
    pub item: PolicyItem,
    /// Row-filter expression applied to matching reads
    pub filter_expr: String,
}

/// A versioned access-control policy scoped to a security zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique numeric identifier
    pub id: u64,
    /// Human-readable name
    pub name: String,
    /// Which item collections this policy carries
    #[serde(default)]
    pub kind: PolicyKind,
    /// Owning security zone; the empty string is the default zone
    #[serde(default)]
    pub zone: String,
    /// Disabled policies are skipped when building repositories
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Primary resource pattern, element name → pattern (never empty)
    pub resources: BTreeMap<String, PolicyResource>,
    /// Additional resource patterns the policy also covers
    #[serde(default)]
    pub additional_resources: Vec<BTreeMap<String, PolicyResource>>,
    /// Allow items (ACCESS kind)
    #[serde(default)]
    pub allow: Vec<PolicyItem>,
    /// Deny items (ACCESS kind)
    #[serde(default)]
    pub deny: Vec<PolicyItem>,
    /// Exceptions subtracted from the allow items (ACCESS kind)
    #[serde(default)]
    pub allow_exceptions: Vec<PolicyItem>,
    /// Exceptions subtracted from the deny items (ACCESS kind)
    #[serde(default)]
    pub deny_exceptions: Vec<PolicyItem>,
    /// Mask items (DATAMASK kind)
    #[serde(default)]
    pub data_mask_items: Vec<DataMaskItem>,
    /// Filter items (ROWFILTER kind)
    #[serde(default)]
    pub row_filter_items: Vec<RowFilterItem>,
}

impl Policy {
    /// Create an access policy over the given resources with no items
    pub fn new(id: u64, name: impl Into<String>, resources: BTreeMap<String, PolicyResource>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: PolicyKind::Access,
            zone: String::new(),
            is_enabled: true,
            resources,
            additional_resources: Vec::new(),
            allow: Vec::new(),
            deny: Vec::new(),
            allow_exceptions: Vec::new(),
            deny_exceptions: Vec::new(),
            data_mask_items: Vec::new(),
            row_filter_items: Vec::new(),
        }
    }

    /// Iterate the policy items relevant for this policy's kind.
    ///
    /// `Access` yields all four collections in allow, deny,
    /// allow-exception, deny-exception order; the mask and filter kinds
    /// yield their single collection; `Unknown` yields nothing.
    pub fn active_items(&self) -> Box<dyn Iterator<Item = &PolicyItem> + '_> {
        match self.kind {
            PolicyKind::Access => Box::new(
                self.allow
                    .iter()
                    .chain(&self.deny)
                    .chain(&self.allow_exceptions)
                    .chain(&self.deny_exceptions),
            ),
            PolicyKind::DataMask => Box::new(self.data_mask_items.iter().map(|m| &m.item)),
            PolicyKind::RowFilter => Box::new(self.row_filter_items.iter().map(|f| &f.item)),
            PolicyKind::Unknown => Box::new(std::iter::empty()),
        }
    }

    /// Validate the policy against a service-def.
    ///
    /// # Errors
    ///
    /// Returns `ModelError` if the name is empty or too long, the
    /// resource map is empty, any pattern has no values, or any declared
    /// element name is not part of the service-def hierarchy.
    pub fn validate(&self, service_def: &ServiceDef) -> Result<()> {
        if self.name.is_empty() {
            return Err(ModelError::InvalidPolicy {
                id: self.id,
                reason: "policy name cannot be empty".into(),
            });
        }

        if self.name.len() > MAX_POLICY_NAME_LENGTH {
            return Err(ModelError::NameTooLong {
                max: MAX_POLICY_NAME_LENGTH,
                length: self.name.len(),
            });
        }

        if self.resources.is_empty() {
            return Err(ModelError::InvalidPolicy {
                id: self.id,
                reason: "policy must declare at least one resource element".into(),
            });
        }

        for resources in std::iter::once(&self.resources).chain(&self.additional_resources) {
            for (element, resource) in resources {
                if service_def.resource_def(element).is_none() {
                    return Err(ModelError::UnknownResourceElement {
                        element: element.clone(),
                        service_def: service_def.name.clone(),
                    });
                }

                if resource.values.is_empty() {
                    return Err(ModelError::InvalidPolicy {
                        id: self.id,
                        reason: format!("resource element `{element}` has no values"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Load a policy from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if TOML parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize the policy to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Serialization` if TOML serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ModelError::Serialization(e.to_string()))
    }
}

/// Concrete resource descriptor carried by access requests:
/// element name → concrete values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResource {
    elements: BTreeMap<String, Vec<String>>,
}

impl AccessResource {
    /// Create an empty descriptor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-valued element
    #[must_use]
    pub fn with(mut self, element: impl Into<String>, value: impl Into<String>) -> Self {
        self.elements.insert(element.into(), vec![value.into()]);
        self
    }

    /// Add a multi-valued element
    #[must_use]
    pub fn with_values<I, S>(mut self, element: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements
            .insert(element.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Values for an element, if declared
    #[must_use]
    pub fn get(&self, element: &str) -> Option<&[String]> {
        self.elements.get(element).map(Vec::as_slice)
    }

    /// The underlying element map
    #[must_use]
    pub fn elements(&self) -> &BTreeMap<String, Vec<String>> {
        &self.elements
    }

    /// Whether no elements are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl From<BTreeMap<String, Vec<String>>> for AccessResource {
    fn from(elements: BTreeMap<String, Vec<String>>) -> Self {
        Self { elements }
    }
}
