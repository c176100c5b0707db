//! Cohort report and percentiles over stored records

mod common;

use common::{create_test_storage, raw_tree};
use yearwrap_core::cohort::{default_catalog, AggregationInputError};
use yearwrap_core::{
    aggregate_records, percentiles, NewRecord, Sanitizer, StatTree, StatsStorage,
};

async fn seeded_storage() -> (
    std::sync::Arc<yearwrap_core::LibsqlStorage>,
    tempfile::TempDir,
    Vec<yearwrap_core::RecordId>,
) {
    let (storage, dir) = create_test_storage().await;
    let sanitizer = Sanitizer::default();

    let mut ids = Vec::new();
    for sent in [10.0, 20.0, 30.0] {
        let record = NewRecord::new(2024, sanitizer.sanitize(&raw_tree(sent, 5.0)));
        ids.push(storage.create_record(&record).await.unwrap());
    }
    (storage, dir, ids)
}

#[tokio::test]
async fn test_report_over_stored_records() {
    let (storage, _dir, ids) = seeded_storage().await;
    storage.view_record(2024, &ids[0]).await.unwrap();
    storage.view_record(2024, &ids[0]).await.unwrap();

    // A record whose statistics are not a map is reported, not fatal
    let broken = NewRecord::new(2024, Sanitizer::default().sanitize(&StatTree::from("garbage")));
    let broken_id = storage.create_record(&broken).await.unwrap();

    let records = storage.list_records(Some(2024)).await.unwrap();
    let report = aggregate_records(&records);

    assert_eq!(report.total_records, 4);
    assert_eq!(report.total_views, 2);

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].record_id.as_ref(), Some(&broken_id));
    assert!(matches!(
        report.skipped[0].reason,
        AggregationInputError::NotAnObject { .. }
    ));

    let sent = report.summary("volume.sent");
    assert_eq!(sent.min, 10.0);
    assert_eq!(sent.max, 30.0);
    assert_eq!(sent.median, 20.0);
    assert_eq!(sent.total, 60.0);
    assert_eq!(sent.avg, 20.0);

    // Nobody reported tapbacks
    assert_eq!(report.summary("tapbacks.total_tapbacks").total, 0.0);

    assert_eq!(report.distributions.hourly[21], 90);
    assert_eq!(report.distributions.hourly[9], 30);

    let eleven_to_fifty = report
        .distributions
        .contact_buckets
        .iter()
        .find(|b| b.label == "11-50")
        .unwrap();
    assert_eq!(eleven_to_fifty.count, 6);

    assert_eq!(report.top_lists.emojis.len(), 1);
    assert_eq!(report.top_lists.emojis[0].count, 27);
    assert_eq!(report.top_lists.busiest_days[0].date, "2024-02-14");
    assert_eq!(report.top_lists.busiest_days[0].count, 360);
}

#[tokio::test]
async fn test_report_is_independent_of_record_order() {
    let (storage, _dir, _ids) = seeded_storage().await;

    let mut records = storage.list_records(None).await.unwrap();
    let forward = aggregate_records(&records);
    records.reverse();
    let backward = aggregate_records(&records);

    assert_eq!(forward.summaries, backward.summaries);
    assert_eq!(forward.distributions, backward.distributions);
    assert_eq!(forward.top_lists, backward.top_lists);
}

#[tokio::test]
async fn test_percentiles_against_year_cohort() {
    let (storage, _dir, ids) = seeded_storage().await;

    // Other years never enter the cohort
    let other_year = NewRecord::new(2023, Sanitizer::default().sanitize(&raw_tree(1000.0, 5.0)));
    storage.create_record(&other_year).await.unwrap();

    let cohort = storage.list_records(Some(2024)).await.unwrap();
    let target = storage.get_record(2024, &ids[2]).await.unwrap().unwrap();

    let result = percentiles(
        target.statistics.as_tree(),
        cohort.iter().map(|r| r.statistics.as_tree()),
        &default_catalog(),
    );

    // 30 beats 10 and 20 out of three samples
    assert_eq!(result.get("volume.total_sent"), Some(&67));
    // Everyone received the same amount
    assert_eq!(result.get("volume.total_received"), Some(&0));
    assert!(result.values().all(|p| *p <= 100));
}
