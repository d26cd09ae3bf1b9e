// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor configuration surface.
//!
//! Read once at startup; every threshold the detectors and the decision
//! service use lives here so deployments can override the defaults. Duration
//! fields accept human strings ("30s", "5m", "1h") in TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parse a duration string like "30s", "5m", "1h" into a Duration
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the numeric prefix
    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str.parse().map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(format!("unknown duration suffix: {}", other)),
    };

    Ok(Duration::from_secs(num * multiplier))
}

/// Serde helpers for `Duration` fields stored as duration strings.
mod duration_str {
    use super::parse_duration;
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        let secs = d.as_secs();
        let text = if secs > 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else if d.subsec_millis() == 0 {
            format!("{}s", secs)
        } else {
            format!("{}ms", d.as_millis())
        };
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(de)?;
        parse_duration(&text).map_err(de::Error::custom)
    }
}

/// All supervisor tunables, with the design defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Activity monitor polling interval.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Consecutive unchanged samples before an output-idle event fires.
    pub idle_cycles: u32,
    /// Lines captured per activity sample (and per decision cycle).
    pub capture_lines: usize,
    /// Heartbeat age past which a session counts as stale.
    #[serde(with = "duration_str")]
    pub heartbeat_threshold: Duration,
    /// Interval of the shared heartbeat staleness sweep.
    #[serde(with = "duration_str")]
    pub heartbeat_sweep_interval: Duration,
    /// Quiet period before a debounced event is delivered.
    #[serde(with = "duration_str")]
    pub debounce: Duration,
    /// Iteration budget applied to tasks that do not carry their own.
    pub default_max_iterations: u32,
    /// Hard ceiling clamping any task-supplied `max_iterations`.
    pub absolute_max_iterations: u32,
    /// Stuck-or-error retries before escalating (consecutive, not total).
    pub error_retry_budget: u32,
    /// Bound on one analysis pass.
    #[serde(with = "duration_str")]
    pub analysis_timeout: Duration,
    /// Bound on executing one action (session write, record persist).
    #[serde(with = "duration_str")]
    pub action_timeout: Duration,
    /// Grace between SIGTERM and force-kill on terminate.
    #[serde(with = "duration_str")]
    pub terminate_grace: Duration,
    /// Cap on continuation history entries per task.
    pub history_cap: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            idle_cycles: 2,
            capture_lines: 100,
            heartbeat_threshold: Duration::from_secs(30 * 60),
            heartbeat_sweep_interval: Duration::from_secs(60),
            debounce: Duration::from_secs(5),
            default_max_iterations: 10,
            absolute_max_iterations: 50,
            error_retry_budget: 1,
            analysis_timeout: Duration::from_secs(10),
            action_timeout: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(5),
            history_cap: 20,
        }
    }
}

impl SupervisorConfig {
    /// Parse a TOML document, validating the result.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_cycles == 0 {
            return Err(ConfigError::Invalid("idle_cycles must be at least 1".into()));
        }
        if self.absolute_max_iterations == 0 {
            return Err(ConfigError::Invalid("absolute_max_iterations must be at least 1".into()));
        }
        if self.heartbeat_sweep_interval > self.heartbeat_threshold {
            return Err(ConfigError::Invalid(
                "heartbeat_sweep_interval must not exceed heartbeat_threshold".into(),
            ));
        }
        if self.history_cap == 0 {
            return Err(ConfigError::Invalid("history_cap must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
