use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pulseboard_core::metrics::DEFAULT_LOOKBACK_MINUTES;
use thiserror::Error;
use url::Url;

use crate::event_stream::DEFAULT_RECONNECT_DELAY;
use crate::tasks::DEFAULT_VIEW_URL;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Parser, Debug, Default)]
#[command(name = "pulseboard", about = "Live dashboard for the task pipeline")]
pub struct Args {
    /// API base url (falls back to PULSEBOARD_API_URL)
    #[arg(long, default_value = "")]
    pub api_url: String,
    /// Task history view link to restore filters from (PULSEBOARD_VIEW_URL)
    #[arg(long, default_value = "")]
    pub view_url: String,
    /// Push stream reconnect delay in seconds (PULSEBOARD_RECONNECT_SECS)
    #[arg(long)]
    pub reconnect_secs: Option<u64>,
    /// Metrics lookback window in minutes (PULSEBOARD_METRICS_MINUTES)
    #[arg(long)]
    pub metrics_minutes: Option<u32>,
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,
    /// Append logs to this file (PULSEBOARD_LOG_FILE)
    #[arg(long, default_value = "")]
    pub log_file: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollIntervals {
    pub throughput: Duration,
    pub latency: Duration,
    pub backpressure: Duration,
    pub workers: Duration,
    pub provider: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            throughput: Duration::from_secs(2),
            latency: Duration::from_secs(5),
            backpressure: Duration::from_secs(5),
            workers: Duration::from_secs(30),
            provider: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub view_url: Url,
    pub reconnect_delay: Duration,
    pub metrics_minutes: u32,
    pub request_timeout: Duration,
    pub intervals: PollIntervals,
    pub log_stdout: bool,
    pub log_file: Option<PathBuf>,
}

/// Environment lookups are injected so resolution stays testable.
pub fn load_config<F>(args: Args, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let api_url = resolve_text(&args.api_url, env("PULSEBOARD_API_URL"), DEFAULT_API_URL);
    Url::parse(&api_url).map_err(|err| ConfigError::InvalidUrl {
        field: "api url",
        value: api_url.clone(),
        reason: err.to_string(),
    })?;

    let view_raw = resolve_text(&args.view_url, env("PULSEBOARD_VIEW_URL"), DEFAULT_VIEW_URL);
    let view_url = Url::parse(&view_raw).map_err(|err| ConfigError::InvalidUrl {
        field: "view url",
        value: view_raw.clone(),
        reason: err.to_string(),
    })?;

    let reconnect_delay = args
        .reconnect_secs
        .or_else(|| env("PULSEBOARD_RECONNECT_SECS").and_then(|value| value.trim().parse().ok()))
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RECONNECT_DELAY);

    let metrics_minutes = args
        .metrics_minutes
        .or_else(|| env("PULSEBOARD_METRICS_MINUTES").and_then(|value| value.trim().parse().ok()))
        .filter(|minutes| *minutes > 0)
        .unwrap_or(DEFAULT_LOOKBACK_MINUTES);

    let log_file = resolve_text(&args.log_file, env("PULSEBOARD_LOG_FILE"), "");

    Ok(Config {
        api_url,
        view_url,
        reconnect_delay,
        metrics_minutes,
        request_timeout: Duration::from_secs(args.request_timeout.max(1)),
        intervals: PollIntervals::default(),
        log_stdout: env("PULSEBOARD_LOG_STDOUT")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false),
        log_file: (!log_file.is_empty()).then(|| PathBuf::from(log_file)),
    })
}

fn resolve_text(flag: &str, env_value: Option<String>, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    if let Some(value) = env_value {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    default.to_string()
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
