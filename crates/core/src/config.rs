//! Scheduler configuration.
//!
//! Every field has a default matching the scheduler's built-in pacing, so an
//! empty config (or none at all) is valid. Parsed from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchedError;

/// Tunables for a [`Scheduler`](../taktwerk_sched/struct.Scheduler.html).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Route per-job diagnostics to `info` instead of `debug`.
    #[serde(default)]
    pub verbose: bool,

    /// Hold-off after a fired event tick, guarding against a second fire
    /// within the same matched minute.
    #[serde(default = "default_fire_guard_secs")]
    pub fire_guard_secs: u64,

    /// Wait between unmatched event polls. Kept under one minute so no
    /// matching minute can be skipped.
    #[serde(default = "default_poll_slack_secs")]
    pub poll_slack_secs: u64,

    /// Default total attempts per event tick.
    #[serde(default = "default_event_max_attempts")]
    pub event_max_attempts: u32,

    /// Default delay before an event reattempt, in seconds.
    #[serde(default = "default_event_backoff_secs")]
    pub event_backoff_secs: u64,
}

fn default_fire_guard_secs() -> u64 {
    60
}

fn default_poll_slack_secs() -> u64 {
    55
}

fn default_event_max_attempts() -> u32 {
    3
}

fn default_event_backoff_secs() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            fire_guard_secs: default_fire_guard_secs(),
            poll_slack_secs: default_poll_slack_secs(),
            event_max_attempts: default_event_max_attempts(),
            event_backoff_secs: default_event_backoff_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
