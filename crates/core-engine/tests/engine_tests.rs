//! Snapshot engine integration tests: delta application, repository
//! sharing, and zone resolution.

use core_engine::{DeltaOutcome, PolicyEngine};
use core_model::{
    ChangeType, Policy, PolicyDelta, PolicyResource, SecurityZoneSpec, ServicePolicies,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn base_bundle() -> ServicePolicies {
    let json = r#"{
        "service_name": "warehouse-dev",
        "policy_version": 10,
        "service_def": {
            "name": "warehouse",
            "resources": [
                { "name": "database", "level": 10 },
                { "name": "table", "level": 20 }
            ],
            "access_types": [
                { "name": "select" },
                { "name": "update", "implied_grants": ["select"] }
            ]
        },
        "policies": [
            {
                "id": 1,
                "name": "sales-read",
                "resources": { "database": { "values": ["sales"] } }
            },
            {
                "id": 2,
                "name": "landing-read",
                "zone": "landing",
                "resources": { "database": { "values": ["landing_raw"] } }
            }
        ],
        "zones": {
            "landing": {
                "resources": [ { "database": ["landing_*"] } ]
            }
        }
    }"#;

    ServicePolicies::from_json(json).unwrap()
}

fn policy_in_zone(id: u64, zone: &str, database: &str) -> Policy {
    let mut resources = BTreeMap::new();
    resources.insert("database".to_string(), PolicyResource::new([database]));

    let mut policy = Policy::new(id, format!("p{id}"), resources);
    policy.zone = zone.to_string();
    policy
}

fn delta_bundle(base: &ServicePolicies, to_version: u64, deltas: Vec<PolicyDelta>) -> ServicePolicies {
    ServicePolicies {
        service_name: base.service_name.clone(),
        policy_version: to_version,
        service_def: base.service_def.clone(),
        policies: Vec::new(),
        tag_policies: None,
        zones: BTreeMap::new(),
        base_policy_version: Some(base.policy_version),
        policy_deltas: deltas,
    }
}

#[test]
fn test_build_creates_default_and_zoned_repositories() {
    let engine = PolicyEngine::build(&base_bundle()).unwrap();

    assert_eq!(engine.policy_version(), 10);
    assert_eq!(engine.default_repository().policy_evaluators().len(), 1);
    assert_eq!(
        engine
            .repository_for_zone("landing")
            .unwrap()
            .policy_evaluators()
            .len(),
        1
    );
    assert!(engine.repository_for_zone("ghost").is_none());
}

#[test]
fn test_disabled_policies_skipped() {
    let mut bundle = base_bundle();
    bundle.policies[0].is_enabled = false;

    let engine = PolicyEngine::build(&bundle).unwrap();

    assert!(engine.default_repository().is_empty());
}

#[test]
fn test_empty_delta_reuses_snapshot() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let delta = delta_bundle(&bundle, 10, Vec::new());

    assert!(matches!(
        engine.clone_with_delta(&delta),
        Some(DeltaOutcome::Unchanged)
    ));
}

#[test]
fn test_delta_shares_untouched_repositories() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let delta = delta_bundle(
        &bundle,
        11,
        vec![PolicyDelta {
            change: ChangeType::Added,
            policy: policy_in_zone(3, "", "finance"),
        }],
    );

    let Some(DeltaOutcome::Rebuilt(next)) = engine.clone_with_delta(&delta) else {
        panic!("expected a rebuilt snapshot");
    };

    assert_eq!(next.policy_version(), 11);
    assert_eq!(next.default_repository().policy_evaluators().len(), 2);

    // the landing repository was not touched by the delta
    assert!(Arc::ptr_eq(
        engine.repository_for_zone("landing").unwrap(),
        next.repository_for_zone("landing").unwrap()
    ));
    assert!(!Arc::ptr_eq(
        engine.default_repository(),
        next.default_repository()
    ));
}

#[test]
fn test_delta_with_wrong_base_version_rejected() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let mut delta = delta_bundle(
        &bundle,
        12,
        vec![PolicyDelta {
            change: ChangeType::Added,
            policy: policy_in_zone(3, "", "finance"),
        }],
    );
    delta.base_policy_version = Some(9);

    assert!(engine.clone_with_delta(&delta).is_none());
}

#[test]
fn test_delta_for_unknown_policy_rejected() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let delta = delta_bundle(
        &bundle,
        11,
        vec![PolicyDelta {
            change: ChangeType::Removed,
            policy: policy_in_zone(99, "", "ghost"),
        }],
    );

    assert!(engine.clone_with_delta(&delta).is_none());
}

#[test]
fn test_delta_for_unknown_zone_rejected() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let delta = delta_bundle(
        &bundle,
        11,
        vec![PolicyDelta {
            change: ChangeType::Added,
            policy: policy_in_zone(3, "nowhere", "x"),
        }],
    );

    assert!(engine.clone_with_delta(&delta).is_none());
}

#[test]
fn test_full_bundle_is_not_a_delta() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let mut full = base_bundle();
    full.policy_version = 11;

    assert!(engine.clone_with_delta(&full).is_none());
}

#[test]
fn test_zone_resolution_through_index() {
    let engine = PolicyEngine::build(&base_bundle()).unwrap();

    let mut resource = BTreeMap::new();
    resource.insert("database".to_string(), vec!["landing_raw".to_string()]);

    let zones = engine.zone_index().zones_for_resource(&resource);
    assert_eq!(zones.into_iter().collect::<Vec<_>>(), vec!["landing"]);
}

#[test]
fn test_zone_spec_survives_delta() {
    let bundle = base_bundle();
    let engine = PolicyEngine::build(&bundle).unwrap();

    let delta = delta_bundle(
        &bundle,
        11,
        vec![PolicyDelta {
            change: ChangeType::Added,
            policy: policy_in_zone(4, "landing", "landing_curated"),
        }],
    );

    let Some(DeltaOutcome::Rebuilt(next)) = engine.clone_with_delta(&delta) else {
        panic!("expected a rebuilt snapshot");
    };

    assert!(next.zone_index().contains("landing"));
    assert_eq!(
        next.repository_for_zone("landing")
            .unwrap()
            .policy_evaluators()
            .len(),
        2
    );
}

#[test]
fn test_zone_spec_helpers() {
    let spec = SecurityZoneSpec::default();
    assert!(!spec.tag_service_associated);
    assert!(spec.resources.is_empty());
}
