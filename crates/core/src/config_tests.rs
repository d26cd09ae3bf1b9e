// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    bare_seconds = { "30", 30_000 },
    seconds = { "45s", 45_000 },
    minutes = { "5m", 300_000 },
    hours = { "2h", 7_200_000 },
    days = { "1d", 86_400_000 },
    millis = { "250ms", 250 },
    padded = { "  10s ", 10_000 },
)]
fn parse_duration_accepts(input: &str, expect_ms: u64) {
    assert_eq!(parse_duration(input).unwrap(), Duration::from_millis(expect_ms));
}

#[parameterized(
    empty = { "" },
    no_number = { "s" },
    bad_suffix = { "10y" },
    negative = { "-5s" },
)]
fn parse_duration_rejects(input: &str) {
    assert!(parse_duration(input).is_err());
}

#[test]
fn defaults_match_design_values() {
    let config = SupervisorConfig::default();
    assert_eq!(config.poll_interval, Duration::from_secs(120));
    assert_eq!(config.idle_cycles, 2);
    assert_eq!(config.heartbeat_threshold, Duration::from_secs(1800));
    assert_eq!(config.debounce, Duration::from_secs(5));
    assert_eq!(config.default_max_iterations, 10);
    assert_eq!(config.analysis_timeout, Duration::from_secs(10));
    assert_eq!(config.action_timeout, Duration::from_secs(30));
    assert_eq!(config.history_cap, 20);
}

#[test]
fn toml_overrides_merge_over_defaults() {
    let config = SupervisorConfig::from_toml(
        r#"
        poll_interval = "30s"
        debounce = "500ms"
        default_max_iterations = 3
        "#,
    )
    .unwrap();
    assert_eq!(config.poll_interval, Duration::from_secs(30));
    assert_eq!(config.debounce, Duration::from_millis(500));
    assert_eq!(config.default_max_iterations, 3);
    // untouched fields keep defaults
    assert_eq!(config.idle_cycles, 2);
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(SupervisorConfig::from_toml("pol_interval = \"30s\"").is_err());
}

#[test]
fn zero_idle_cycles_is_invalid() {
    assert!(SupervisorConfig::from_toml("idle_cycles = 0").is_err());
}

#[test]
fn sweep_longer_than_threshold_is_invalid() {
    let result = SupervisorConfig::from_toml(
        r#"
        heartbeat_threshold = "1m"
        heartbeat_sweep_interval = "5m"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn duration_fields_serialize_back_to_strings() {
    let config = SupervisorConfig::default();
    let toml = toml::to_string(&config).unwrap();
    assert!(toml.contains("poll_interval = \"2m\""));
    assert!(toml.contains("heartbeat_threshold = \"30m\""));
    assert!(toml.contains("debounce = \"5s\""));
}
