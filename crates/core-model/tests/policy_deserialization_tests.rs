//! Deserialization tests for policies and bundles
//!
//! Policies arrive from JSON bundles and TOML fixtures; these tests pin
//! the serde surface: field defaults, kind strings, and validation of
//! deserialized data.

use core_model::{ModelError, Policy, PolicyKind, ServicePolicies};

#[test]
fn test_minimal_policy_defaults() {
    let json = r#"{
        "id": 10,
        "name": "minimal",
        "resources": { "database": { "values": ["sales"] } }
    }"#;

    let policy: Policy = serde_json::from_str(json).unwrap();

    assert_eq!(policy.kind, PolicyKind::Access);
    assert_eq!(policy.zone, "");
    assert!(policy.is_enabled);
    assert!(policy.allow.is_empty());
    assert!(policy.additional_resources.is_empty());
}

#[test]
fn test_kind_strings() {
    for (text, kind) in [
        ("ACCESS", PolicyKind::Access),
        ("DATAMASK", PolicyKind::DataMask),
        ("ROWFILTER", PolicyKind::RowFilter),
        ("SOMETHING_ELSE", PolicyKind::Unknown),
    ] {
        let json = format!(
            r#"{{
                "id": 1,
                "name": "p",
                "kind": "{text}",
                "resources": {{ "database": {{ "values": ["x"] }} }}
            }}"#
        );

        let policy: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy.kind, kind, "kind string {text}");
    }
}

#[test]
fn test_item_access_defaults_to_allowed() {
    let json = r#"{
        "id": 2,
        "name": "p",
        "resources": { "database": { "values": ["x"] } },
        "allow": [
            { "users": ["alice"], "accesses": [ { "type": "select" } ], "delegate_admin": true }
        ]
    }"#;

    let policy: Policy = serde_json::from_str(json).unwrap();

    assert!(policy.allow[0].accesses[0].is_allowed);
    assert!(policy.allow[0].delegate_admin);
}

#[test]
fn test_resource_flags_default_false() {
    let json = r#"{
        "id": 3,
        "name": "p",
        "resources": { "database": { "values": ["x"] } }
    }"#;

    let policy: Policy = serde_json::from_str(json).unwrap();
    let resource = &policy.resources["database"];

    assert!(!resource.is_excludes);
    assert!(!resource.is_recursive);
}

#[test]
fn test_data_mask_item_flattening() {
    let json = r#"{
        "id": 4,
        "name": "mask-ssn",
        "kind": "DATAMASK",
        "resources": { "database": { "values": ["hr"] } },
        "data_mask_items": [
            {
                "users": ["auditor"],
                "accesses": [ { "type": "select" } ],
                "mask_type": "MASK_HASH"
            }
        ]
    }"#;

    let policy: Policy = serde_json::from_str(json).unwrap();

    assert_eq!(policy.data_mask_items[0].mask_type, "MASK_HASH");
    assert_eq!(policy.data_mask_items[0].item.users, vec!["auditor"]);
    assert_eq!(policy.active_items().count(), 1);
}

#[test]
fn test_bundle_with_zones_and_tags() {
    let json = r#"{
        "service_name": "warehouse-dev",
        "policy_version": 7,
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
        "policies": [],
        "zones": {
            "landing": {
                "resources": [ { "database": ["landing_*"] } ],
                "tag_service_associated": true
            }
        },
        "tag_policies": {
            "service_def": {
                "name": "tag",
                "resources": [ { "name": "tag", "level": 1 } ],
                "access_types": [ { "name": "select" } ]
            },
            "policies": [
                {
                    "id": 100,
                    "name": "pii-tag",
                    "resources": { "tag": { "values": ["PII"] } }
                }
            ]
        }
    }"#;

    let bundle = ServicePolicies::from_json(json).unwrap();

    assert!(bundle.zones["landing"].tag_service_associated);
    assert_eq!(bundle.tag_policies.as_ref().unwrap().policies.len(), 1);

    // a second tag policy with the same id fails bundle validation
    let mut duplicated = bundle.clone();
    if let Some(tag_policies) = duplicated.tag_policies.as_mut() {
        let copy = tag_policies.policies[0].clone();
        tag_policies.policies.push(copy);
    }

    assert!(matches!(
        duplicated.validate(),
        Err(ModelError::InvalidBundle(_))
    ));
}

#[test]
fn test_bundle_roundtrip() {
    let json = r#"{
        "service_name": "warehouse-dev",
        "policy_version": 2,
        "service_def": {
            "name": "warehouse",
            "resources": [ { "name": "database", "level": 10 } ],
            "access_types": [ { "name": "select" } ]
        },
        "policies": [
            {
                "id": 1,
                "name": "p",
                "resources": { "database": { "values": ["sales"] } }
            }
        ]
    }"#;

    let bundle = ServicePolicies::from_json(json).unwrap();
    let serialized = serde_json::to_string(&bundle).unwrap();
    let back = ServicePolicies::from_json(&serialized).unwrap();

    assert_eq!(back, bundle);
}
