//! Sanitizer and hydration properties over arbitrary statistics trees

mod common;

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use yearwrap_core::privacy::hydration::DEFAULT_CAPTURE_PATHS;
use yearwrap_core::privacy::{
    anonymize_identifier, apply_hydration, capture_hydration, residual_pii, SanitizePolicy,
    Sanitizer,
};
use yearwrap_core::StatTree;

fn key() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "name",
            "display_name",
            "identifier",
            "contact_id",
            "text",
            "sample_messages",
            "count",
            "raw",
            "contacts",
        ])
        .prop_map(str::to_string),
        "[a-z_]{1,8}",
    ]
}

fn leaf() -> impl Strategy<Value = StatTree> {
    prop_oneof![
        Just(StatTree::Null),
        any::<bool>().prop_map(StatTree::Bool),
        (-1.0e6..1.0e6f64).prop_map(StatTree::Number),
        prop_oneof![
            Just("unknown".to_string()),
            Just(String::new()),
            "\\+1[0-9]{10}",
            "[a-z]{1,6}@example\\.com",
            "[A-Za-z ]{0,12}",
        ]
        .prop_map(StatTree::String),
    ]
}

fn stat_tree() -> impl Strategy<Value = StatTree> {
    leaf().prop_recursive(4, 64, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(StatTree::List),
            prop::collection::btree_map(key(), inner, 0..5)
                .prop_map(|map: BTreeMap<String, StatTree>| StatTree::Map(map)),
        ]
    })
}

proptest! {
    #[test]
    fn sanitize_is_idempotent(tree in stat_tree()) {
        let sanitizer = Sanitizer::default();
        let once = sanitizer.sanitize(&tree);
        let twice = sanitizer.sanitize(once.as_tree());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_is_deterministic(tree in stat_tree()) {
        let sanitizer = Sanitizer::default();
        prop_assert_eq!(sanitizer.sanitize(&tree), sanitizer.sanitize(&tree));
    }

    #[test]
    fn sanitized_output_carries_no_pii(tree in stat_tree()) {
        let policy = SanitizePolicy::default();
        let clean = Sanitizer::new(policy.clone()).sanitize(&tree);
        prop_assert!(residual_pii(clean.as_tree(), &policy).is_empty());
    }

    #[test]
    fn anonymized_identifiers_are_fixed_points(raw in "\\+?[0-9a-z@.]{1,20}") {
        let once = anonymize_identifier(&raw);
        prop_assert_eq!(anonymize_identifier(&once), once);
    }
}

#[test]
fn test_same_contact_same_identifier_across_records() {
    let sanitizer = Sanitizer::default();
    let first = sanitizer.sanitize(&common::raw_tree(100.0, 80.0));
    let second = sanitizer.sanitize(&common::raw_tree(5.0, 9.0));

    let id_at = |tree: &StatTree| {
        tree.get_path("raw.streaks.longest_streak_contact_id")
            .and_then(StatTree::as_str)
            .map(str::to_string)
    };
    assert_eq!(id_at(first.as_tree()), id_at(second.as_tree()));
    assert_eq!(
        id_at(first.as_tree()).as_deref(),
        Some(anonymize_identifier("+15551234567").as_str())
    );
}

#[test]
fn test_sanitize_strips_export_pii() {
    let clean = Sanitizer::default().sanitize(&common::raw_tree(100.0, 80.0));
    let rendered = serde_json::to_string(&clean).unwrap();

    assert!(!rendered.contains("Ana Lima"));
    assert!(!rendered.contains("+15551234567"));
    assert!(!rendered.contains("bo@example.com"));
    assert!(!rendered.contains("see you at 8"));
    assert!(rendered.contains("total_sent"));
    assert_eq!(
        clean.as_tree().number_at("raw.volume.total_sent"),
        Some(100.0)
    );
}

#[test]
fn test_capture_sanitize_reveal_restores_contacts() {
    let raw = common::raw_tree(100.0, 80.0);
    let payload = capture_hydration(&raw, DEFAULT_CAPTURE_PATHS);
    let clean = Sanitizer::default().sanitize(&raw);

    let revealed = apply_hydration(&clean, &payload);

    assert_eq!(
        revealed.get_path("raw.contacts.top_sent_to"),
        raw.get_path("raw.contacts.top_sent_to")
    );
    assert_eq!(
        revealed
            .get_path("raw.streaks.longest_streak_contact")
            .and_then(StatTree::as_str),
        Some("Ana Lima")
    );
    // Free text never comes back; it was never captured
    assert!(revealed.get_path("raw.content.sample_messages").is_none());
    // The stored tree is untouched
    assert!(clean
        .as_tree()
        .get_path("raw.streaks.longest_streak_contact")
        .is_some_and(StatTree::is_null));
}

#[test]
fn test_message_distribution_merges_by_index() {
    let raw = common::raw_tree(100.0, 80.0);
    let clean = Sanitizer::default().sanitize(&raw);

    let mut payload = yearwrap_core::HydrationPayload::new();
    payload.insert(
        "raw.contacts.message_distribution",
        StatTree::from(json!([{"index": 1, "contact_name": "Bo", "contact_id": "bo@example.com"}])),
    );

    let revealed = apply_hydration(&clean, &payload);
    let list = revealed
        .get_path("raw.contacts.message_distribution")
        .and_then(StatTree::as_list)
        .unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[1].get("contact_name").and_then(StatTree::as_str), Some("Bo"));
    assert_eq!(list[1].get("count").and_then(StatTree::as_f64), Some(12.0));
    assert!(list[0].get("contact_name").is_some_and(StatTree::is_null));
}
