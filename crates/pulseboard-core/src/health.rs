//! Worker fleet health and upstream provider status.

use crate::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
            CircuitState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerStatus {
    #[serde(default)]
    pub state: CircuitState,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub fail_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    Stale,
    Unhealthy,
    Unknown,
}

impl WorkerHealth {
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "healthy" => WorkerHealth::Healthy,
            "stale" => WorkerHealth::Stale,
            "no_heartbeat" | "error" | "unhealthy" => WorkerHealth::Unhealthy,
            _ => WorkerHealth::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkerHealth::Healthy => "healthy",
            WorkerHealth::Stale => "stale",
            WorkerHealth::Unhealthy => "unhealthy",
            WorkerHealth::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerDetail {
    pub worker_id: String,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_heartbeat: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heartbeat {
    Never,
    At(DateTime<Utc>),
    Unparsable,
}

impl WorkerDetail {
    pub fn display_name(&self) -> &str {
        self.worker_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.worker_id)
    }

    pub fn health(&self) -> WorkerHealth {
        WorkerHealth::from_status(&self.status)
    }

    /// `last_heartbeat` wins over `timestamp`; numbers are epoch seconds.
    pub fn heartbeat(&self) -> Heartbeat {
        let raw = self
            .last_heartbeat
            .as_ref()
            .filter(|value| !value.is_null())
            .or_else(|| self.timestamp.as_ref().filter(|value| !value.is_null()));
        let Some(raw) = raw else {
            return Heartbeat::Never;
        };
        let parsed = match raw {
            Value::Number(number) => number.as_f64().and_then(epoch_seconds),
            Value::String(text) => parse_timestamp(text),
            _ => None,
        };
        parsed.map(Heartbeat::At).unwrap_or(Heartbeat::Unparsable)
    }

    pub fn heartbeat_label(&self) -> String {
        match self.heartbeat() {
            Heartbeat::Never => "Never".to_string(),
            Heartbeat::Unparsable => "Unknown".to_string(),
            Heartbeat::At(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(whole, nanos.min(999_999_999))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerStatus {
    #[serde(default)]
    pub total_workers: u32,
    #[serde(default)]
    pub healthy_workers: u32,
    #[serde(default)]
    pub stale_workers: u32,
    #[serde(default)]
    pub overall_status: String,
    #[serde(default)]
    pub worker_details: Vec<WorkerDetail>,
}

impl WorkerStatus {
    pub fn overall_health(&self) -> WorkerHealth {
        WorkerHealth::from_status(&self.overall_status)
    }
}

pub const STATUS_CHECK_FAILED: &str = "Status check failed";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub circuit_breaker_open: bool,
    #[serde(default)]
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderBadge {
    Active,
    Limited,
    Issue,
}

impl ProviderBadge {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderBadge::Active => "Service Active",
            ProviderBadge::Limited => "Service Limited",
            ProviderBadge::Issue => "Service Issue",
        }
    }
}

impl ProviderStatus {
    /// Stand-in shown when the status endpoint itself could not be reached.
    pub fn check_failed() -> Self {
        Self {
            status: "error".to_string(),
            message: Some(STATUS_CHECK_FAILED.to_string()),
            ..Self::default()
        }
    }

    pub fn badge(&self) -> ProviderBadge {
        match self.status.trim().to_lowercase().as_str() {
            "active" => ProviderBadge::Active,
            "rate_limited" | "credits_exhausted" => ProviderBadge::Limited,
            _ => ProviderBadge::Issue,
        }
    }

    pub fn detail_line(&self) -> Option<String> {
        if self.circuit_breaker_open {
            return Some(format!(
                "Circuit breaker open ({} failures)",
                self.consecutive_failures
            ));
        }
        if self.consecutive_failures > 0 {
            return Some(format!("{} consecutive failures", self.consecutive_failures));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_status_classification() {
        assert_eq!(WorkerHealth::from_status("healthy"), WorkerHealth::Healthy);
        assert_eq!(WorkerHealth::from_status("Stale"), WorkerHealth::Stale);
        for status in ["no_heartbeat", "error", "unhealthy"] {
            assert_eq!(WorkerHealth::from_status(status), WorkerHealth::Unhealthy);
        }
        assert_eq!(WorkerHealth::from_status("booting"), WorkerHealth::Unknown);
    }

    #[test]
    fn heartbeat_prefers_last_heartbeat_then_timestamp() {
        let worker: WorkerDetail = serde_json::from_str(
            r#"{
                "worker_id": "w-1",
                "status": "healthy",
                "last_heartbeat": 1767225600,
                "timestamp": "2020-01-01T00:00:00Z",
                "circuit_breaker": {"state": "half_open", "success_count": 2, "fail_count": 1}
            }"#,
        )
        .expect("parse worker");
        assert_eq!(worker.heartbeat_label(), "2026-01-01 00:00:00 UTC");
        assert_eq!(worker.circuit_breaker.state, CircuitState::HalfOpen);
        assert_eq!(worker.display_name(), "w-1");

        let fallback: WorkerDetail = serde_json::from_str(
            r#"{"worker_id": "w-2", "worker_name": "pdf-1", "last_heartbeat": null, "timestamp": "2026-01-01T00:00:05"}"#,
        )
        .expect("parse worker");
        assert_eq!(fallback.heartbeat_label(), "2026-01-01 00:00:05 UTC");
        assert_eq!(fallback.display_name(), "pdf-1");
        assert_eq!(fallback.circuit_breaker.state, CircuitState::Unknown);
    }

    #[test]
    fn heartbeat_missing_or_garbage() {
        let never: WorkerDetail =
            serde_json::from_str(r#"{"worker_id": "w-3", "status": "no_heartbeat"}"#)
                .expect("parse worker");
        assert_eq!(never.heartbeat_label(), "Never");

        let garbage: WorkerDetail =
            serde_json::from_str(r#"{"worker_id": "w-4", "last_heartbeat": "soon"}"#)
                .expect("parse worker");
        assert_eq!(garbage.heartbeat(), Heartbeat::Unparsable);
        assert_eq!(garbage.heartbeat_label(), "Unknown");
    }

    #[test]
    fn unknown_circuit_state_is_tolerated() {
        let breaker: CircuitBreakerStatus =
            serde_json::from_str(r#"{"state": "tripping"}"#).expect("parse breaker");
        assert_eq!(breaker.state, CircuitState::Unknown);
    }

    #[test]
    fn provider_badges_and_details() {
        let active = ProviderStatus {
            status: "active".to_string(),
            ..ProviderStatus::default()
        };
        assert_eq!(active.badge().label(), "Service Active");
        assert!(active.detail_line().is_none());

        let limited = ProviderStatus {
            status: "credits_exhausted".to_string(),
            consecutive_failures: 2,
            ..ProviderStatus::default()
        };
        assert_eq!(limited.badge(), ProviderBadge::Limited);
        assert_eq!(limited.detail_line().as_deref(), Some("2 consecutive failures"));

        let tripped = ProviderStatus {
            status: "rate_limited".to_string(),
            circuit_breaker_open: true,
            consecutive_failures: 5,
            ..ProviderStatus::default()
        };
        assert_eq!(
            tripped.detail_line().as_deref(),
            Some("Circuit breaker open (5 failures)")
        );

        let failed = ProviderStatus::check_failed();
        assert_eq!(failed.badge(), ProviderBadge::Issue);
        assert_eq!(failed.message.as_deref(), Some(STATUS_CHECK_FAILED));
    }
}
