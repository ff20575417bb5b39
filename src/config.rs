use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::Level;
use worker::Env;

use crate::error::{TrackingError, TrackingResult};

/// D1 binding holding packages, integrations and the notification queue.
pub const DB_BINDING: &str = "DB";

const STALE_AFTER_MINUTES_VAR: &str = "TRACKING_STALE_AFTER_MINUTES";
const BATCH_LIMIT_VAR: &str = "SYNC_BATCH_LIMIT";
const MAX_ATTEMPTS_VAR: &str = "CARRIER_MAX_ATTEMPTS";
const RETRY_DELAY_MS_VAR: &str = "CARRIER_RETRY_DELAY_MS";
const TIMEOUT_MS_VAR: &str = "CARRIER_TIMEOUT_MS";
const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

const DEFAULT_STALE_AFTER_MINUTES: u32 = 60;
const DEFAULT_BATCH_LIMIT: u32 = 50;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Bounded retry for carrier calls: `max_attempts` total tries separated by a
/// fixed `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Tunables for a reconciliation run, read from Worker vars.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// A package is due once its last tracking refresh is older than this.
    pub stale_after: TimeDelta,
    /// Upper bound on packages fetched per run (Worker subrequest budget).
    pub batch_limit: u32,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub log_level: Level,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after: TimeDelta::minutes(i64::from(DEFAULT_STALE_AFTER_MINUTES)),
            batch_limit: DEFAULT_BATCH_LIMIT,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            log_level: Level::INFO,
        }
    }
}

impl SyncConfig {
    pub fn from_env(env: &Env) -> TrackingResult<Self> {
        Self::from_lookup(|name| env.var(name).ok().map(|v| v.to_string()))
    }

    /// Build from an arbitrary variable source; unset variables take defaults.
    pub fn from_lookup<F>(lookup: F) -> TrackingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stale_minutes: u32 = parse_var(&lookup, STALE_AFTER_MINUTES_VAR)?
            .unwrap_or(DEFAULT_STALE_AFTER_MINUTES);
        let batch_limit: u32 = parse_var(&lookup, BATCH_LIMIT_VAR)?.unwrap_or(DEFAULT_BATCH_LIMIT);
        let max_attempts: u32 =
            parse_var(&lookup, MAX_ATTEMPTS_VAR)?.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let retry_delay_ms: u64 =
            parse_var(&lookup, RETRY_DELAY_MS_VAR)?.unwrap_or(DEFAULT_RETRY_DELAY_MS);
        let timeout_ms: u64 = parse_var(&lookup, TIMEOUT_MS_VAR)?.unwrap_or(DEFAULT_TIMEOUT_MS);
        let log_level: Level = parse_var(&lookup, LOG_LEVEL_VAR)?.unwrap_or(Level::INFO);

        if batch_limit == 0 {
            return Err(TrackingError::Config(format!("{BATCH_LIMIT_VAR} must be at least 1")));
        }
        if max_attempts == 0 {
            return Err(TrackingError::Config(format!("{MAX_ATTEMPTS_VAR} must be at least 1")));
        }
        if timeout_ms == 0 {
            return Err(TrackingError::Config(format!("{TIMEOUT_MS_VAR} must be at least 1")));
        }

        Ok(Self {
            stale_after: TimeDelta::minutes(i64::from(stale_minutes)),
            batch_limit,
            retry: RetryPolicy {
                max_attempts,
                delay: Duration::from_millis(retry_delay_ms),
            },
            request_timeout: Duration::from_millis(timeout_ms),
            log_level,
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> TrackingResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| TrackingError::Config(format!("{name}={raw:?} is not valid"))),
    }
}
