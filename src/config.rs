//! Runtime configuration.
//!
//! A small set of independent feature toggles plus two optional periods
//! driving the background tasks. Periods are clamped to a floor so a
//! zero or negative value can never produce a timer storm; `None`
//! disables the periodic task entirely.
//!
//! The struct deserializes with per-field defaults so a hand-edited
//! partial `config.json` still parses.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum period for any background timer (seconds).
pub const MIN_PERIOD_SECS: f64 = 0.1;

/// Default config-file reload period (seconds).
pub const DEFAULT_RELOAD_SECS: f64 = 5.0;

/// Default external-device poll period (seconds).
pub const DEFAULT_POLL_SECS: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Show the default-account warning banner on the root route.
    pub guest_warning: bool,
    /// Allow users to delete their own accounts.
    pub user_self_deletion: bool,
    /// Allow users to edit their own preferences.
    pub user_personalization: bool,
    /// Config-file reload period; `None` disables hot reload.
    pub config_reload_seconds: Option<f64>,
    /// External-device poll period; `None` disables the sync engine.
    pub external_api_poll_seconds: Option<f64>,
    /// External desk API base URL (bulk import + default adapter target).
    pub external_api_url: String,
    /// External desk API access key.
    pub external_api_key: String,
    /// External desk API adapter tag (unknown tags fall back to no-op).
    pub external_api_kind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guest_warning: true,
            user_self_deletion: true,
            user_personalization: true,
            config_reload_seconds: Some(DEFAULT_RELOAD_SECS),
            external_api_poll_seconds: Some(DEFAULT_POLL_SECS),
            external_api_url: String::new(),
            external_api_key: String::new(),
            external_api_kind: String::new(),
        }
    }
}

impl Config {
    /// Clamped config-reload period, or `None` when reloading is off.
    pub fn reload_period(&self) -> Option<Duration> {
        clamped_period(self.config_reload_seconds)
    }

    /// Clamped device-poll period, or `None` when polling is off.
    pub fn poll_period(&self) -> Option<Duration> {
        clamped_period(self.external_api_poll_seconds)
    }
}

fn clamped_period(secs: Option<f64>) -> Option<Duration> {
    let secs = secs?;
    if !secs.is_finite() {
        return Some(Duration::from_secs_f64(MIN_PERIOD_SECS));
    }
    Some(Duration::from_secs_f64(secs.max(MIN_PERIOD_SECS)))
}
