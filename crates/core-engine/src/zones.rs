//! Security-zone index.
//!
//! Zones partition the resource space by declaring resource prefixes.
//! The index answers which zones a resource (and its children) falls
//! into, and enforces the grant/revoke rule that exactly one zone may
//! match.

use crate::error::{EngineError, Result};
use crate::matcher::wildcard_match;
use core_model::SecurityZoneSpec;
use std::collections::{BTreeMap, BTreeSet};

/// Pre-indexed zones keyed by name
#[derive(Debug, Clone, Default)]
pub struct ZoneIndex {
    zones: BTreeMap<String, SecurityZoneSpec>,
}

impl ZoneIndex {
    /// Build the index from the bundle's zone specs
    #[must_use]
    pub fn new(zones: BTreeMap<String, SecurityZoneSpec>) -> Self {
        Self { zones }
    }

    /// Zone names known to the index
    #[must_use]
    pub fn zone_names(&self) -> Vec<&str> {
        self.zones.keys().map(String::as_str).collect()
    }

    /// Whether the zone exists in the index
    #[must_use]
    pub fn contains(&self, zone: &str) -> bool {
        self.zones.contains_key(zone)
    }

    /// Whether the zone is associated with the tag service. The default
    /// zone (empty name) and unknown zones are not.
    #[must_use]
    pub fn is_zone_associated_with_tag_service(&self, zone: &str) -> bool {
        self.zones
            .get(zone)
            .is_some_and(|spec| spec.tag_service_associated)
    }

    /// All zones whose resource prefixes contain the resource or its
    /// children.
    ///
    /// A zone prefix matches when every element declared on both sides
    /// agrees; elements declared on only one side leave the two in a
    /// prefix relationship, which counts as containment.
    #[must_use]
    pub fn zones_for_resource(&self, resource: &BTreeMap<String, Vec<String>>) -> BTreeSet<String> {
        self.zones
            .iter()
            .filter(|(_, spec)| {
                spec.resources
                    .iter()
                    .any(|prefix| prefix_matches(prefix, resource))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The single zone matching a grant/revoke resource.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AmbiguousZone` when more than one zone
    /// matches. No match yields `Ok(None)`: the default zone applies.
    pub fn uniquely_matched_zone(
        &self,
        resource: &BTreeMap<String, Vec<String>>,
    ) -> Result<Option<String>> {
        let mut matched = self.zones_for_resource(resource);

        match matched.len() {
            0 => Ok(None),
            1 => Ok(matched.pop_first()),
            _ => Err(EngineError::AmbiguousZone {
                zones: matched.into_iter().collect(),
            }),
        }
    }
}

fn prefix_matches(prefix: &BTreeMap<String, Vec<String>>, resource: &BTreeMap<String, Vec<String>>) -> bool {
    for (element, prefix_values) in prefix {
        let Some(values) = resource.get(element) else {
            // zone prefix is deeper than the resource: children of the
            // resource can still fall into the zone
            continue;
        };

        let all_covered = values.iter().all(|value| {
            prefix_values
                .iter()
                .any(|pattern| wildcard_match(pattern, value))
        });

        if !all_covered {
            return false;
        }
    }

    true
}
