//! Rolling statistics over a window of readings.

use crate::model::Reading;
use serde::Serialize;

/// Minimum numeric samples before a trend is reported
const TREND_MIN_SAMPLES: usize = 4;
/// Relative change between window halves that counts as a trend
const TREND_RELATIVE: f64 = 0.05;
/// Absolute change used when the earlier half averages to zero
const TREND_ABSOLUTE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std_dev: Option<f64>,
    pub trend: Trend,
}

impl Statistics {
    fn empty() -> Self {
        Self {
            count: 0,
            average: None,
            min: None,
            max: None,
            std_dev: None,
            trend: Trend::Stable,
        }
    }
}

/// Single-pass accumulator (Welford) for mean and variance.
#[derive(Debug, Default)]
struct Accumulator {
    count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, x: f64) {
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn population_std_dev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

/// Computes statistics over readings given in chronological order.
///
/// Readings without a numeric value are skipped.
pub fn compute(readings: &[Reading]) -> Statistics {
    let values: Vec<f64> = readings.iter().filter_map(Reading::numeric_value).collect();
    compute_values(&values)
}

pub fn compute_values(values: &[f64]) -> Statistics {
    if values.is_empty() {
        return Statistics::empty();
    }

    let mut acc = Accumulator::default();
    for &v in values {
        acc.push(v);
    }

    Statistics {
        count: acc.count,
        average: Some(round2(acc.mean)),
        min: Some(round2(acc.min)),
        max: Some(round2(acc.max)),
        std_dev: Some(round2(acc.population_std_dev())),
        trend: trend(values),
    }
}

/// Compares the mean of the later half of the window with the earlier half.
fn trend(values: &[f64]) -> Trend {
    if values.len() < TREND_MIN_SAMPLES {
        return Trend::Stable;
    }

    let mid = values.len() / 2;
    let earlier = mean(&values[..mid]);
    let later = mean(&values[values.len() - mid..]);
    let change = later - earlier;

    let tolerance = if earlier == 0.0 {
        TREND_ABSOLUTE
    } else {
        earlier.abs() * TREND_RELATIVE
    };

    if change > tolerance {
        Trend::Increasing
    } else if change < -tolerance {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn readings(values: &[&str]) -> Vec<Reading> {
        let start = Utc::now() - Duration::minutes(values.len() as i64);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Reading {
                id: i as i64 + 1,
                device_id: "dev-1".to_string(),
                value: v.to_string(),
                unit: None,
                timestamp: start + Duration::minutes(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_empty_window() {
        let stats = compute(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.average, None);
        assert_eq!(stats.std_dev, None);
        assert_eq!(stats.trend, Trend::Stable);
    }

    #[test]
    fn test_basic_statistics() {
        let stats = compute_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert_eq!(stats.average, Some(5.0));
        assert_eq!(stats.min, Some(2.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.std_dev, Some(2.0));
    }

    #[test]
    fn test_single_value() {
        let stats = compute_values(&[21.5]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.average, Some(21.5));
        assert_eq!(stats.std_dev, Some(0.0));
        assert_eq!(stats.trend, Trend::Stable);
    }

    #[test]
    fn test_non_numeric_skipped() {
        let stats = compute(&readings(&["20", "bad", "on,30", "off"]));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average, Some(25.0));
    }

    #[test]
    fn test_rounding() {
        let stats = compute_values(&[1.0, 2.0, 2.0]);
        assert_eq!(stats.average, Some(1.67));
        assert_eq!(stats.std_dev, Some(0.47));
    }

    #[test]
    fn test_trend_increasing() {
        let stats = compute_values(&[20.0, 20.5, 21.0, 23.0, 24.0, 25.0]);
        assert_eq!(stats.trend, Trend::Increasing);
    }

    #[test]
    fn test_trend_decreasing() {
        let stats = compute(&readings(&["60", "58", "50", "45"]));
        assert_eq!(stats.trend, Trend::Decreasing);
    }

    #[test]
    fn test_trend_stable_within_tolerance() {
        let stats = compute_values(&[20.0, 20.2, 20.1, 20.4, 20.3]);
        assert_eq!(stats.trend, Trend::Stable);
    }

    #[test]
    fn test_trend_from_zero_baseline() {
        let stats = compute_values(&[0.0, 0.0, 3.0, 4.0]);
        assert_eq!(stats.trend, Trend::Increasing);
    }

    #[test]
    fn test_trend_needs_enough_samples() {
        let stats = compute_values(&[10.0, 50.0, 90.0]);
        assert_eq!(stats.trend, Trend::Stable);
    }
}
