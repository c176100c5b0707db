//! Five-number summary of one metric across a cohort

use serde::{Deserialize, Serialize};

/// `{min, max, avg, median, total}` over the numeric samples of one metric
///
/// The median is the element at `floor(n/2)` of the sorted samples (the
/// upper of the two middle values for even `n`). An empty sample set
/// yields all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub total: f64,
}

impl AggregateSummary {
    /// All-zero summary returned for metrics nobody reported
    pub const EMPTY: AggregateSummary = AggregateSummary {
        min: 0.0,
        max: 0.0,
        avg: 0.0,
        median: 0.0,
        total: 0.0,
    };

    /// Summarize samples; non-finite values are ignored
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Self::EMPTY;
        }
        sorted.sort_by(f64::total_cmp);

        let total: f64 = sorted.iter().sum();
        let n = sorted.len();
        Self {
            min: sorted[0],
            max: sorted[n - 1],
            avg: total / n as f64,
            median: sorted[n / 2],
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero_sentinel() {
        let summary = AggregateSummary::from_samples(&[]);
        assert_eq!(summary, AggregateSummary::EMPTY);
        assert!(!summary.avg.is_nan());
    }

    #[test]
    fn test_median_takes_upper_middle() {
        let summary = AggregateSummary::from_samples(&[40.0, 10.0, 30.0, 20.0]);
        assert_eq!(summary.median, 30.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 40.0);
        assert_eq!(summary.total, 100.0);
        assert_eq!(summary.avg, 25.0);
    }

    #[test]
    fn test_odd_count_median() {
        let summary = AggregateSummary::from_samples(&[3.0, 1.0, 2.0]);
        assert_eq!(summary.median, 2.0);
    }

    #[test]
    fn test_non_finite_samples_dropped() {
        let summary = AggregateSummary::from_samples(&[f64::NAN, 4.0, f64::INFINITY]);
        assert_eq!(summary.total, 4.0);
        assert_eq!(summary.median, 4.0);
    }
}
