//! Cohort-wide aggregation over stored statistics trees
//!
//! Each record is validated first and then folded into per-metric sample
//! lists, fixed distributions and top-K counters. A record with the wrong
//! shape is skipped as a whole and listed in the report; it never aborts
//! the rest of the cohort.

use super::stats_root;
use super::summary::AggregateSummary;
use crate::tree::StatTree;
use crate::types::{RecordId, StatisticsRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Sections of a statistics tree that must be maps when present
const SECTIONS: &[&str] = &[
    "volume",
    "temporal",
    "contacts",
    "content",
    "conversations",
    "ghosts",
    "response_times",
    "tapbacks",
    "streaks",
];

/// Every summary metric carried by a report, in report order
pub const TRACKED_METRICS: &[&str] = &[
    "volume.total_messages",
    "volume.sent",
    "volume.received",
    "volume.total_words",
    "volume.total_chars",
    "contacts.top_contact_message_counts",
    "contacts.total_contacts",
    "contacts.unique_contacts_messaged",
    "contacts.unique_contacts_received_from",
    "content.emoji_counts",
    "content.unique_emojis",
    "content.word_counts",
    "content.question_marks",
    "content.exclamation_marks",
    "content.attachments_sent",
    "content.attachments_received",
    "content.double_texts",
    "content.avg_message_length",
    "content.sentiment.overall_scores",
    "content.sentiment.positive_percentages",
    "content.sentiment.negative_percentages",
    "content.sentiment.neutral_percentages",
    "conversations.total_conversations",
    "conversations.longest_conversation_lengths",
    "conversations.avg_messages_per_conversation",
    "ghosts.ghost_counts",
    "ghosts.ghosted_counts",
    "response_times.median_response_seconds",
    "tapbacks.total_tapbacks",
    "tapbacks.given",
    "tapbacks.received",
    "streaks.longest_streak_days",
];

const TOP_K: usize = 20;
const WORD_COUNT_CAP: usize = 60;

/// Why one record was left out of the cohort
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationInputError {
    #[error("statistics tree is a {found}, not a map")]
    NotAnObject { found: String },

    #[error("section '{section}' is a {found}, not a map")]
    SectionNotAnObject { section: String, found: String },
}

/// A record left out of the report, by input position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub reason: AggregationInputError,
}

/// Inclusive numeric range with a population count; `None` upper bound is open
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionBucket {
    pub label: String,
    pub range: (u64, Option<u64>),
    pub count: u64,
}

impl DistributionBucket {
    fn new(label: &str, lo: u64, hi: Option<u64>) -> Self {
        Self {
            label: label.to_string(),
            range: (lo, hi),
            count: 0,
        }
    }

    fn contains(&self, value: u64) -> bool {
        value >= self.range.0 && self.range.1.map_or(true, |hi| value <= hi)
    }
}

fn contact_buckets() -> Vec<DistributionBucket> {
    vec![
        DistributionBucket::new("1-10", 1, Some(10)),
        DistributionBucket::new("11-50", 11, Some(50)),
        DistributionBucket::new("51-100", 51, Some(100)),
        DistributionBucket::new("101-500", 101, Some(500)),
        DistributionBucket::new("501-1000", 501, Some(1000)),
        DistributionBucket::new("1000+", 1001, None),
    ]
}

/// Per-day averages split by weekday and weekend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WeekdayWeekend {
    pub avg_weekday: u64,
    pub avg_weekend: u64,
}

/// Word-count histogram; `60+` is only present when something overflowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordCountHistogram {
    pub labels: Vec<String>,
    pub buckets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distributions {
    /// Hour of day, 0..24
    pub hourly: [u64; 24],
    /// Day of week, Sunday = 0
    pub daily: [u64; 7],
    /// Month, January = 0
    pub monthly: [u64; 12],
    pub weekday_weekend: WeekdayWeekend,
    pub contact_buckets: Vec<DistributionBucket>,
    pub word_counts: WordCountHistogram,
    pub tapbacks: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmojiCount {
    pub emoji: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopLists {
    pub emojis: Vec<EmojiCount>,
    pub busiest_days: Vec<DayCount>,
}

/// Population view produced by [`aggregate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortReport {
    pub total_records: usize,
    pub total_views: u64,
    pub summaries: BTreeMap<String, AggregateSummary>,
    /// Σ messages / Σ conversations over records reporting both
    pub messages_per_conversation: f64,
    pub distributions: Distributions,
    pub top_lists: TopLists,
    pub skipped: Vec<SkippedRecord>,
}

impl CohortReport {
    /// Summary for a tracked metric
    pub fn summary(&self, metric: &str) -> AggregateSummary {
        self.summaries
            .get(metric)
            .copied()
            .unwrap_or(AggregateSummary::EMPTY)
    }
}

/// Non-negative finite number rounded to a whole count
fn as_count(node: &StatTree) -> Option<u64> {
    node.as_f64().filter(|n| *n >= 0.0).map(|n| n.round() as u64)
}

/// Value of bucket `index` in a distribution given as a list or a
/// string-keyed map
fn bucket_value(node: &StatTree, index: usize) -> u64 {
    let value = match node {
        StatTree::List(items) => items.get(index),
        StatTree::Map(map) => map.get(&index.to_string()),
        _ => None,
    };
    value.and_then(as_count).unwrap_or(0)
}

fn first_present<'a>(section: &'a StatTree, keys: &[&str]) -> Option<&'a StatTree> {
    keys.iter()
        .filter_map(|key| section.get(key))
        .find(|node| !node.is_null())
}

/// Check the shape of one record before any of it is folded in
fn validate(root: &StatTree) -> Result<&StatTree, AggregationInputError> {
    if !root.is_map() {
        return Err(AggregationInputError::NotAnObject {
            found: root.kind().to_string(),
        });
    }
    let stats = stats_root(root);
    for section in SECTIONS {
        if let Some(node) = stats.get(section) {
            if !node.is_map() && !node.is_null() {
                return Err(AggregationInputError::SectionNotAnObject {
                    section: section.to_string(),
                    found: node.kind().to_string(),
                });
            }
        }
    }
    Ok(stats)
}

/// Incremental cohort fold
#[derive(Debug)]
pub struct CohortAggregator {
    records: usize,
    views: u64,
    samples: HashMap<&'static str, Vec<f64>>,
    pooled_messages: f64,
    pooled_conversations: f64,
    hourly: [u64; 24],
    daily: [u64; 7],
    monthly: [u64; 12],
    weekday_totals: Vec<u64>,
    weekend_totals: Vec<u64>,
    contact_message_counts: Vec<u64>,
    word_counts: [u64; WORD_COUNT_CAP],
    word_count_overflow: u64,
    tapbacks: BTreeMap<String, u64>,
    emojis: HashMap<String, u64>,
    busiest_days: HashMap<String, u64>,
    skipped: Vec<SkippedRecord>,
}

impl Default for CohortAggregator {
    fn default() -> Self {
        Self {
            records: 0,
            views: 0,
            samples: HashMap::new(),
            pooled_messages: 0.0,
            pooled_conversations: 0.0,
            hourly: [0; 24],
            daily: [0; 7],
            monthly: [0; 12],
            weekday_totals: Vec::new(),
            weekend_totals: Vec::new(),
            contact_message_counts: Vec::new(),
            word_counts: [0; WORD_COUNT_CAP],
            word_count_overflow: 0,
            tapbacks: BTreeMap::new(),
            emojis: HashMap::new(),
            busiest_days: HashMap::new(),
            skipped: Vec::new(),
        }
    }
}

impl CohortAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the cohort
    ///
    /// Malformed records are remembered as skipped and contribute nothing
    /// except their view count.
    pub fn add(&mut self, tree: &StatTree, views: u64, record_id: Option<&RecordId>) {
        let position = self.records;
        self.records += 1;
        self.views += views;

        match validate(tree) {
            Ok(stats) => self.fold(stats),
            Err(reason) => {
                warn!("Skipping record at position {} in cohort: {}", position, reason);
                self.skipped.push(SkippedRecord {
                    position,
                    record_id: record_id.cloned(),
                    reason,
                });
            }
        }
    }

    fn push(&mut self, metric: &'static str, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.samples.entry(metric).or_default().push(v);
        }
    }

    fn fold(&mut self, stats: &StatTree) {
        let num = |path: &str| stats.number_at(path);

        let total_messages = num("volume.total_messages");
        let total_sent = num("volume.total_sent");
        let total_received = num("volume.total_received");

        // Volume
        if let Some(volume) = stats.get("volume").filter(|v| v.is_map()) {
            self.push("volume.total_messages", total_messages);
            self.push("volume.sent", total_sent);
            self.push("volume.received", total_received);

            let per_sent = |avg: Option<f64>| avg.zip(total_sent).map(|(a, s)| (a * s).round());
            self.push("volume.total_words", per_sent(num("content.avg_word_count_sent")));
            self.push("volume.total_chars", per_sent(num("content.avg_message_length_sent")));

            if let Some(day) = volume.get("busiest_day") {
                if let (Some(date), Some(total)) = (
                    day.get("date").and_then(StatTree::as_str),
                    day.get("total").and_then(as_count),
                ) {
                    *self.busiest_days.entry(date.to_string()).or_default() += total;
                }
            }
        }

        // Temporal
        if let Some(temporal) = stats.get("temporal").filter(|v| v.is_map()) {
            if let Some(hourly) = first_present(temporal, &["hour_distribution", "hourly_distribution"])
            {
                for (hour, slot) in self.hourly.iter_mut().enumerate() {
                    *slot += bucket_value(hourly, hour);
                }
            }

            // Monday = 0 in the source, Sunday = 0 in the report
            if let Some(daily) =
                first_present(temporal, &["day_of_week_distribution", "daily_distribution"])
            {
                for day in 0..7 {
                    self.daily[(day + 1) % 7] += bucket_value(daily, day);
                }
                let weekday: u64 = (0..5).map(|day| bucket_value(daily, day)).sum();
                let weekend: u64 = (5..7).map(|day| bucket_value(daily, day)).sum();
                if weekday > 0 {
                    self.weekday_totals.push(weekday);
                }
                if weekend > 0 {
                    self.weekend_totals.push(weekend);
                }
            }

            if let Some(monthly) =
                first_present(temporal, &["month_distribution", "monthly_distribution"])
            {
                for month in 1..=12 {
                    self.monthly[month - 1] += bucket_value(monthly, month);
                }
            }
        }

        // Contacts
        if let Some(contacts) = stats.get("contacts").filter(|v| v.is_map()) {
            let list_len = |key: &str| contacts.get(key).and_then(StatTree::as_list).map(Vec::len);
            let top_count = |key: &str| {
                contacts
                    .get(key)
                    .and_then(StatTree::as_list)
                    .and_then(|list| list.first())
                    .and_then(|top| top.get("count"))
                    .and_then(StatTree::as_f64)
            };

            self.push(
                "contacts.top_contact_message_counts",
                top_count("top_sent_to").or_else(|| top_count("top_received_from")),
            );

            let unique_messaged = contacts.get("unique_contacts_messaged").and_then(StatTree::as_f64);
            let unique_received = contacts
                .get("unique_contacts_received_from")
                .and_then(StatTree::as_f64);
            self.push("contacts.unique_contacts_messaged", unique_messaged);
            self.push("contacts.unique_contacts_received_from", unique_received);

            let total_contacts = [
                list_len("top_sent_to").map(|n| n as f64),
                list_len("top_received_from").map(|n| n as f64),
                unique_messaged,
                unique_received,
            ]
            .into_iter()
            .flatten()
            .reduce(f64::max);
            self.push("contacts.total_contacts", total_contacts);

            if let Some(distribution) = contacts.get("message_distribution").and_then(StatTree::as_list)
            {
                for contact in distribution {
                    let count = contact
                        .get("count")
                        .and_then(as_count)
                        .filter(|c| *c > 0)
                        .or_else(|| contact.get("message_count").and_then(as_count));
                    if let Some(count) = count {
                        self.contact_message_counts.push(count);
                    }
                }
            }
        }

        // Content
        if let Some(content) = stats.get("content").filter(|v| v.is_map()) {
            let field = |key: &str| content.get(key).and_then(StatTree::as_f64);

            if let Some(emojis) = content.get("most_used_emojis").and_then(StatTree::as_list) {
                let mut emoji_total = 0.0;
                for entry in emojis {
                    let count = entry.get("count").and_then(as_count).unwrap_or(0);
                    emoji_total += count as f64;
                    if let Some(emoji) = entry.get("emoji").and_then(StatTree::as_str) {
                        if !emoji.is_empty() && count > 0 {
                            *self.emojis.entry(emoji.to_string()).or_default() += count;
                        }
                    }
                }
                self.push("content.emoji_counts", Some(emoji_total));
                self.push("content.unique_emojis", Some(emojis.len() as f64));
            }

            let total_words = field("avg_word_count_sent")
                .zip(total_sent)
                .map(|(avg, sent)| (avg * sent).round());
            self.push("content.word_counts", total_words);
            self.push("content.question_marks", field("questions_asked"));
            self.push("content.exclamation_marks", field("exclamations_sent"));
            self.push("content.attachments_sent", field("attachments_sent"));
            self.push("content.attachments_received", field("attachments_received"));
            self.push("content.double_texts", field("double_text_count"));

            // Weighted by how many messages each average covers
            let weighted: Vec<(f64, f64)> = [
                field("avg_message_length_sent").zip(total_sent),
                field("avg_message_length_received").zip(total_received),
            ]
            .into_iter()
            .flatten()
            .collect();
            let weight: f64 = weighted.iter().map(|(_, n)| n).sum();
            if weight > 0.0 {
                let mean = weighted.iter().map(|(avg, n)| avg * n).sum::<f64>() / weight;
                self.push("content.avg_message_length", Some(mean));
            }

            if let Some(sentiment) = content.get("sentiment").filter(|v| v.is_map()) {
                let score = |key: &str| sentiment.get(key).and_then(StatTree::as_f64);
                self.push("content.sentiment.overall_scores", score("overall_score"));
                self.push("content.sentiment.positive_percentages", score("positive_percentage"));
                self.push("content.sentiment.negative_percentages", score("negative_percentage"));
                self.push("content.sentiment.neutral_percentages", score("neutral_percentage"));
            }

            if let Some(histogram) = content.get("word_count_histogram").and_then(StatTree::as_map) {
                for (words, count) in histogram {
                    let (Ok(words), Some(count)) = (words.trim().parse::<usize>(), as_count(count))
                    else {
                        continue;
                    };
                    if (1..=WORD_COUNT_CAP).contains(&words) {
                        self.word_counts[words - 1] += count;
                    } else if words > WORD_COUNT_CAP {
                        self.word_count_overflow += count;
                    }
                }
            }
        }

        // Conversations
        if stats.get("conversations").is_some_and(StatTree::is_map) {
            let conversations = num("conversations.total_conversations");
            self.push("conversations.total_conversations", conversations);
            self.push(
                "conversations.longest_conversation_lengths",
                num("conversations.most_active_thread.message_count"),
            );

            if let (Some(messages), Some(conversations)) = (total_messages, conversations) {
                if conversations > 0.0 {
                    self.push(
                        "conversations.avg_messages_per_conversation",
                        Some(messages / conversations),
                    );
                    self.pooled_messages += messages;
                    self.pooled_conversations += conversations;
                }
            }
        }

        // Ghosts
        if stats.get("ghosts").is_some_and(StatTree::is_map) {
            self.push("ghosts.ghost_counts", num("ghosts.people_you_left_hanging"));
            self.push("ghosts.ghosted_counts", num("ghosts.people_who_left_you_hanging"));
        }

        if stats.get("response_times").is_some_and(StatTree::is_map) {
            self.push(
                "response_times.median_response_seconds",
                num("response_times.median_response_time_you_seconds"),
            );
        }

        // Tapbacks
        if let Some(tapbacks) = stats.get("tapbacks").filter(|v| v.is_map()) {
            let given = num("tapbacks.total_tapbacks_given");
            let received = num("tapbacks.total_tapbacks_received");
            self.push("tapbacks.given", given);
            self.push("tapbacks.received", received);
            if given.is_some() || received.is_some() {
                self.push(
                    "tapbacks.total_tapbacks",
                    Some(given.unwrap_or(0.0) + received.unwrap_or(0.0)),
                );
            }

            if let Some(distribution) = tapbacks
                .get("tapback_distribution_given")
                .and_then(StatTree::as_map)
            {
                for (kind, count) in distribution {
                    if let Some(count) = as_count(count) {
                        *self.tapbacks.entry(kind.clone()).or_default() += count;
                    }
                }
            }
        }

        if stats.get("streaks").is_some_and(StatTree::is_map) {
            self.push("streaks.longest_streak_days", num("streaks.longest_streak_days"));
        }
    }

    /// Produce the report
    pub fn finish(self) -> CohortReport {
        let summaries = TRACKED_METRICS
            .iter()
            .map(|metric| {
                let summary = self
                    .samples
                    .get(metric)
                    .map(|samples| AggregateSummary::from_samples(samples))
                    .unwrap_or(AggregateSummary::EMPTY);
                (metric.to_string(), summary)
            })
            .collect();

        let per_day = |totals: &[u64], days: u64| {
            if totals.is_empty() {
                0
            } else {
                let sum: u64 = totals.iter().sum();
                (sum as f64 / (totals.len() as u64 * days) as f64).round() as u64
            }
        };

        let mut contact_buckets = contact_buckets();
        for count in &self.contact_message_counts {
            if let Some(bucket) = contact_buckets.iter_mut().find(|b| b.contains(*count)) {
                bucket.count += 1;
            }
        }

        let mut labels: Vec<String> = (1..=WORD_COUNT_CAP).map(|n| n.to_string()).collect();
        let mut buckets = self.word_counts.to_vec();
        if self.word_count_overflow > 0 {
            labels.push(format!("{}+", WORD_COUNT_CAP));
            buckets.push(self.word_count_overflow);
        }

        let messages_per_conversation = if self.pooled_conversations > 0.0 {
            self.pooled_messages / self.pooled_conversations
        } else {
            0.0
        };

        debug!(
            "Aggregated {} records ({} skipped)",
            self.records,
            self.skipped.len()
        );

        CohortReport {
            total_records: self.records,
            total_views: self.views,
            summaries,
            messages_per_conversation,
            distributions: Distributions {
                hourly: self.hourly,
                daily: self.daily,
                monthly: self.monthly,
                weekday_weekend: WeekdayWeekend {
                    avg_weekday: per_day(&self.weekday_totals, 5),
                    avg_weekend: per_day(&self.weekend_totals, 2),
                },
                contact_buckets,
                word_counts: WordCountHistogram { labels, buckets },
                tapbacks: self.tapbacks,
            },
            top_lists: TopLists {
                emojis: top_k(self.emojis)
                    .into_iter()
                    .map(|(emoji, count)| EmojiCount { emoji, count })
                    .collect(),
                busiest_days: top_k(self.busiest_days)
                    .into_iter()
                    .map(|(date, count)| DayCount { date, count })
                    .collect(),
            },
            skipped: self.skipped,
        }
    }
}

/// Highest counts first, ties by key ascending, capped at [`TOP_K`]
fn top_k(counts: HashMap<String, u64>) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(TOP_K);
    entries
}

/// Aggregate bare statistics trees
pub fn aggregate<'a, I>(trees: I) -> CohortReport
where
    I: IntoIterator<Item = &'a StatTree>,
{
    let mut aggregator = CohortAggregator::new();
    for tree in trees {
        aggregator.add(tree, 0, None);
    }
    aggregator.finish()
}

/// Aggregate stored records, including their view counts
pub fn aggregate_records(records: &[StatisticsRecord]) -> CohortReport {
    let mut aggregator = CohortAggregator::new();
    for record in records {
        aggregator.add(record.statistics.as_tree(), record.views, Some(&record.id));
    }
    aggregator.finish()
}
