//! Percentile standing of one record against its cohort

use super::stats_root;
use crate::tree::StatTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of the population counts as "beaten"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    LowerIsBetter,
}

/// A metric path and its direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub path: String,
    #[serde(default)]
    pub direction: Direction,
}

impl MetricSpec {
    pub fn higher(path: &str) -> Self {
        Self {
            path: path.to_string(),
            direction: Direction::HigherIsBetter,
        }
    }

    pub fn lower(path: &str) -> Self {
        Self {
            path: path.to_string(),
            direction: Direction::LowerIsBetter,
        }
    }
}

/// Metrics ranked on the share page
pub fn default_catalog() -> Vec<MetricSpec> {
    vec![
        MetricSpec::higher("volume.total_sent"),
        MetricSpec::higher("volume.total_received"),
        MetricSpec::higher("content.avg_message_length_sent"),
        MetricSpec::higher("content.avg_message_length_received"),
        MetricSpec::higher("content.questions_percentage"),
        MetricSpec::higher("content.enthusiasm_percentage"),
        MetricSpec::higher("content.attachments_sent"),
        MetricSpec::higher("content.attachments_received"),
        MetricSpec::higher("conversations.total_conversations"),
        MetricSpec::higher("conversations.group_chats"),
        MetricSpec::higher("conversations.one_on_one_chats"),
        MetricSpec::higher("content.double_text_count"),
        MetricSpec::lower("response_times.avg_response_time_minutes"),
        MetricSpec::higher("tapbacks.total_tapbacks_given"),
        MetricSpec::higher("tapbacks.total_tapbacks_received"),
        MetricSpec::higher("streaks.longest_streak_days"),
    ]
}

/// Metric path to percentile in `0..=100`
pub type PercentileResult = BTreeMap<String, u8>;

/// Rank `target` against `population` for every metric in `catalog`
///
/// The population should include the target itself. Values equal to the
/// target count on neither side. A metric is omitted when the target has
/// no numeric value for it or fewer than two population members do.
pub fn percentiles<'a, I>(target: &StatTree, population: I, catalog: &[MetricSpec]) -> PercentileResult
where
    I: IntoIterator<Item = &'a StatTree>,
{
    let population: Vec<&StatTree> = population.into_iter().map(stats_root).collect();
    let target = stats_root(target);
    let mut result = PercentileResult::new();

    for metric in catalog {
        let Some(value) = target.number_at(&metric.path) else {
            continue;
        };
        let samples: Vec<f64> = population
            .iter()
            .filter_map(|tree| tree.number_at(&metric.path))
            .collect();
        if samples.len() < 2 {
            continue;
        }

        let beaten = samples
            .iter()
            .filter(|sample| match metric.direction {
                Direction::HigherIsBetter => **sample < value,
                Direction::LowerIsBetter => **sample > value,
            })
            .count();
        let percentile = (100.0 * beaten as f64 / samples.len() as f64).round();
        result.insert(metric.path.clone(), percentile.clamp(0.0, 100.0) as u8);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sent(n: f64) -> StatTree {
        StatTree::from(json!({"raw": {"volume": {"total_sent": n}}}))
    }

    #[test]
    fn test_strict_comparison() {
        let population = [sent(5.0), sent(5.0), sent(5.0), sent(10.0)];
        let catalog = [MetricSpec::higher("volume.total_sent")];

        let low = percentiles(&population[0], &population, &catalog);
        assert_eq!(low.get("volume.total_sent"), Some(&0));

        let high = percentiles(&population[3], &population, &catalog);
        assert_eq!(high.get("volume.total_sent"), Some(&75));
    }

    #[test]
    fn test_lower_is_better() {
        let minutes = |m: f64| StatTree::from(json!({"response_times": {"avg_response_time_minutes": m}}));
        let population = [minutes(1.0), minutes(4.0), minutes(9.0)];
        let catalog = [MetricSpec::lower("response_times.avg_response_time_minutes")];

        let fastest = percentiles(&population[0], &population, &catalog);
        assert_eq!(fastest.get("response_times.avg_response_time_minutes"), Some(&67));
    }

    #[test]
    fn test_omitted_metrics() {
        let alone = [sent(10.0)];
        let catalog = default_catalog();
        assert!(percentiles(&alone[0], &alone, &catalog).is_empty());

        let population = [sent(10.0), sent(20.0)];
        let missing = StatTree::from(json!({"raw": {"volume": {}}}));
        assert!(percentiles(&missing, &population, &catalog).is_empty());

        let result = percentiles(&population[1], &population, &catalog);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("volume.total_sent"), Some(&50));
    }

    #[test]
    fn test_zero_counts_as_a_value() {
        let population = [sent(0.0), sent(3.0)];
        let catalog = [MetricSpec::higher("volume.total_sent")];
        assert_eq!(
            percentiles(&population[1], &population, &catalog).get("volume.total_sent"),
            Some(&50)
        );
    }
}
