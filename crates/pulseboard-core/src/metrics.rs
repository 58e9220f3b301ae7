//! Time-bucketed task metrics and the backlog series derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_LOOKBACK_MINUTES: u32 = 360;
/// Number of trailing buckets averaged into the trend rate.
pub const TREND_WINDOW: usize = 3;
pub const TREND_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricBucket {
    #[serde(deserialize_with = "crate::deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub created_count: u64,
    #[serde(default)]
    pub completed_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p99: Option<f64>,
}

impl MetricBucket {
    /// Saturates instead of wrapping on counts beyond `i64::MAX`.
    pub fn net_flow(&self) -> i64 {
        let created = i64::try_from(self.created_count).unwrap_or(i64::MAX);
        let completed = i64::try_from(self.completed_count).unwrap_or(i64::MAX);
        created.saturating_sub(completed)
    }

    pub fn has_latency(&self) -> bool {
        self.p50.is_some() || self.p95.is_some() || self.p99.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsResponse {
    #[serde(default)]
    pub metrics: Vec<MetricBucket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedBucket {
    pub bucket: MetricBucket,
    pub net_flow: i64,
    pub cumulative_backlog: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn arrow(&self) -> &'static str {
        match self {
            TrendDirection::Up => "↑",
            TrendDirection::Down => "↓",
            TrendDirection::Flat => "→",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendLabel {
    AccumulatingBacklog,
    ClearingBacklog,
    Stable,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::AccumulatingBacklog => "Accumulating Backlog",
            TrendLabel::ClearingBacklog => "Clearing Backlog",
            TrendLabel::Stable => "Stable",
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSummary {
    pub trend_rate: f64,
    pub label: TrendLabel,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackpressureSeries {
    pub buckets: Vec<DerivedBucket>,
    pub summary: TrendSummary,
}

impl BackpressureSeries {
    pub fn current_backlog(&self) -> i64 {
        self.buckets
            .last()
            .map(|bucket| bucket.cumulative_backlog)
            .unwrap_or(0)
    }
}

/// Thresholds are exclusive: exactly +/-0.5 is stable.
pub fn classify_trend(trend_rate: f64) -> TrendSummary {
    let (label, direction) = if trend_rate > TREND_THRESHOLD {
        (TrendLabel::AccumulatingBacklog, TrendDirection::Up)
    } else if trend_rate < -TREND_THRESHOLD {
        (TrendLabel::ClearingBacklog, TrendDirection::Down)
    } else {
        (TrendLabel::Stable, TrendDirection::Flat)
    };
    TrendSummary {
        trend_rate,
        label,
        direction,
    }
}

/// Running backlog over the window in bucket order. The backlog restarts at
/// zero for every window, so it is relative to the first bucket fetched.
pub fn derive_backpressure(buckets: &[MetricBucket]) -> BackpressureSeries {
    let mut cumulative = 0i64;
    let derived = buckets
        .iter()
        .map(|bucket| {
            let net_flow = bucket.net_flow();
            cumulative = cumulative.saturating_add(net_flow);
            DerivedBucket {
                bucket: bucket.clone(),
                net_flow,
                cumulative_backlog: cumulative,
            }
        })
        .collect::<Vec<_>>();

    let tail = &derived[derived.len().saturating_sub(TREND_WINDOW)..];
    let trend_rate = if tail.is_empty() {
        0.0
    } else {
        tail.iter().map(|bucket| bucket.net_flow as f64).sum::<f64>() / tail.len() as f64
    };

    BackpressureSeries {
        buckets: derived,
        summary: classify_trend(trend_rate),
    }
}

/// Most recent bucket carrying any latency percentile.
pub fn latest_latency(buckets: &[MetricBucket]) -> Option<&MetricBucket> {
    buckets.iter().rev().find(|bucket| bucket.has_latency())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(minute: i64, created: u64, completed: u64) -> MetricBucket {
        MetricBucket {
            timestamp: DateTime::from_timestamp(minute * 60, 0).expect("valid timestamp"),
            created_count: created,
            completed_count: completed,
            failed_count: 0,
            p50: None,
            p95: None,
            p99: None,
        }
    }

    #[test]
    fn huge_counts_saturate_instead_of_wrapping() {
        assert_eq!(bucket(0, u64::MAX, 0).net_flow(), i64::MAX);
        assert_eq!(bucket(0, 0, u64::MAX).net_flow(), -i64::MAX);
        assert_eq!(bucket(0, u64::MAX, u64::MAX).net_flow(), 0);

        let series = derive_backpressure(&[bucket(0, u64::MAX, 0), bucket(1, u64::MAX, 0)]);
        assert_eq!(series.current_backlog(), i64::MAX);
        assert_eq!(series.summary.label, TrendLabel::AccumulatingBacklog);
    }

    #[test]
    fn cumulative_backlog_is_running_sum() {
        let buckets = vec![bucket(0, 5, 2), bucket(1, 1, 4), bucket(2, 3, 3), bucket(3, 7, 1)];
        let series = derive_backpressure(&buckets);

        let nets = series.buckets.iter().map(|b| b.net_flow).collect::<Vec<_>>();
        let cumulative = series
            .buckets
            .iter()
            .map(|b| b.cumulative_backlog)
            .collect::<Vec<_>>();
        assert_eq!(nets, vec![3, -3, 0, 6]);
        assert_eq!(cumulative, vec![3, 0, 0, 6]);
        assert_eq!(series.current_backlog(), 6);

        // last three nets: -3, 0, 6 -> mean 1.0
        assert_eq!(series.summary.trend_rate, 1.0);
        assert_eq!(series.summary.label, TrendLabel::AccumulatingBacklog);

        assert_eq!(derive_backpressure(&buckets), series);
    }

    #[test]
    fn short_and_empty_windows() {
        let empty = derive_backpressure(&[]);
        assert!(empty.buckets.is_empty());
        assert_eq!(empty.summary.trend_rate, 0.0);
        assert_eq!(empty.summary.label, TrendLabel::Stable);

        let two = derive_backpressure(&[bucket(0, 0, 2), bucket(1, 0, 1)]);
        assert_eq!(two.summary.trend_rate, -1.5);
        assert_eq!(two.summary.direction, TrendDirection::Down);
        assert_eq!(two.current_backlog(), -3);
    }

    #[test]
    fn trend_boundaries_are_exclusive() {
        assert_eq!(classify_trend(0.6).label, TrendLabel::AccumulatingBacklog);
        assert_eq!(classify_trend(0.6).direction, TrendDirection::Up);
        assert_eq!(classify_trend(-0.6).label, TrendLabel::ClearingBacklog);
        assert_eq!(classify_trend(0.3).label, TrendLabel::Stable);
        assert_eq!(classify_trend(0.5).label, TrendLabel::Stable);
        assert_eq!(classify_trend(-0.5).direction, TrendDirection::Flat);
    }

    #[test]
    fn metrics_response_defaults_missing_counters() {
        let response: MetricsResponse = serde_json::from_str(
            r#"{"metrics": [
                {"timestamp": "2026-03-01T10:00:00", "created_count": 4},
                {"timestamp": "2026-03-01T10:01:00", "p50": 0.8, "p95": 2.5, "p99": 4.0}
            ]}"#,
        )
        .expect("parse metrics");

        assert_eq!(response.metrics[0].completed_count, 0);
        assert_eq!(response.metrics[0].net_flow(), 4);
        let latest = latest_latency(&response.metrics).expect("latency bucket");
        assert_eq!(latest.p95, Some(2.5));
    }
}
