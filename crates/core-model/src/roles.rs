//! Role membership table with nested-role resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named role and its members
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Member users
    pub users: BTreeSet<String>,
    /// Member groups
    pub groups: BTreeSet<String>,
    /// Member roles; members of a nested role belong to this role too
    pub roles: BTreeSet<String>,
}

impl Role {
    /// Create a role with user and group members
    pub fn new<I, J, S, T>(name: impl Into<String>, users: I, groups: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            users: users.into_iter().map(Into::into).collect(),
            groups: groups.into_iter().map(Into::into).collect(),
            roles: BTreeSet::new(),
        }
    }
}

/// Versioned role table; replaced wholesale under the admin write lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roles {
    /// Monotone counter identifying this table revision
    pub version: u64,
    /// The role definitions
    pub roles: Vec<Role>,
}

impl Roles {
    /// Create a role table at the given version
    pub fn new(version: u64, roles: Vec<Role>) -> Self {
        Self { version, roles }
    }

    /// Resolve the effective role set for a (user, groups) pair.
    ///
    /// A role applies when the user or one of the groups is a direct
    /// member, or when an already-applying role is a member of it.
    #[must_use]
    pub fn roles_for_user_and_groups(&self, user: &str, groups: &BTreeSet<String>) -> BTreeSet<String> {
        let mut resolved: BTreeSet<String> = self
            .roles
            .iter()
            .filter(|r| r.users.contains(user) || !r.groups.is_disjoint(groups))
            .map(|r| r.name.clone())
            .collect();

        // Roles containing an already-resolved role apply transitively.
        loop {
            let before = resolved.len();

            for role in &self.roles {
                if !resolved.contains(&role.name)
                    && role.roles.iter().any(|nested| resolved.contains(nested))
                {
                    resolved.insert(role.name.clone());
                }
            }

            if resolved.len() == before {
                break;
            }
        }

        resolved
    }
}
