//! Common test utilities and helpers

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use yearwrap_core::{ConnectionMode, LibsqlStorage, StatTree};

/// A storage backed by a temp-file database
///
/// libSQL's `:memory:` mode gives every connection its own database, so
/// migrations would not be visible to later queries. The directory lives as
/// long as the returned guard.
pub async fn create_test_storage() -> (Arc<LibsqlStorage>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("yearwrap_test.db");
    let storage = LibsqlStorage::new_with_validation(
        ConnectionMode::Local(path.to_string_lossy().into_owned()),
        true, // create_if_missing - required for test databases
    )
    .await
    .expect("Failed to create test storage");

    (Arc::new(storage), dir)
}

/// A raw export with contact names, phone numbers and message text
pub fn raw_export(total_sent: f64, total_received: f64) -> Value {
    json!({
        "raw": {
            "volume": {
                "total_messages": total_sent + total_received,
                "total_sent": total_sent,
                "total_received": total_received,
                "busiest_day": {"date": "2024-02-14", "total": 120}
            },
            "contacts": {
                "top_sent_to": [
                    {"identifier": "+15551234567", "name": "Ana Lima", "count": 40},
                    {"identifier": "bo@example.com", "name": "Bo", "count": 12}
                ],
                "top_received_from": [
                    {"identifier": "+15551234567", "name": "Ana Lima", "count": 35}
                ],
                "message_distribution": [
                    {"count": 40, "contact_name": "Ana Lima", "contact_id": "+15551234567"},
                    {"count": 12, "contact_name": "Bo", "contact_id": "bo@example.com"}
                ],
                "total_contacts": 2
            },
            "content": {
                "sample_messages": ["see you at 8", "lol"],
                "most_used_emojis": [{"emoji": "😂", "count": 9}],
                "avg_word_count_sent": 6.5
            },
            "temporal": {
                "hourly_distribution": {"9": 10, "21": 30},
                "weekday_mvp": {"name": "Ana Lima", "identifier": "+15551234567"}
            },
            "streaks": {
                "longest_streak_days": 12,
                "longest_streak_contact": "Ana Lima",
                "longest_streak_contact_id": "+15551234567"
            }
        }
    })
}

pub fn raw_tree(total_sent: f64, total_received: f64) -> StatTree {
    StatTree::from(raw_export(total_sent, total_received))
}
