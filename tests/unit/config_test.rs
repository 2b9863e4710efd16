//! Tests for configuration validation

use std::time::Duration;

use prometheus_orchestrator::config::{PausePolicy, PoolConfig, SchedulerConfig};
use prometheus_orchestrator::util::ResourceKind;

#[test]
fn test_pool_config_validation() {
    let valid = PoolConfig::new([(ResourceKind::Cpu, 4096), (ResourceKind::Memory, 1 << 30)]);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_empty() {
    let invalid = PoolConfig::new(Vec::<(ResourceKind, u64)>::new());
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_zero_capacity() {
    let invalid = PoolConfig::new([(ResourceKind::Cpu, 4096), (ResourceKind::Memory, 0)]);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_zero_tick_rejected() {
    let cfg = SchedulerConfig::new().with_tick_interval(Duration::ZERO);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "pool": { "capacities": { "cpu": 2048, "memory": 1073741824 } },
        "tick_interval_ms": 250,
        "max_start_retries": 2,
        "pause_policy": "release",
        "terminal_retention_secs": null
    }"#;

    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.pool.capacities[&ResourceKind::Cpu], 2048);
    assert_eq!(cfg.tick_interval(), Duration::from_millis(250));
    assert_eq!(cfg.max_start_retries, 2);
    assert_eq!(cfg.pause_policy, PausePolicy::Release);
    assert_eq!(cfg.terminal_retention_secs, None);
    // Unspecified fields keep their defaults.
    assert_eq!(cfg.stop_grace_secs, 10);
    assert_eq!(cfg.state_dir, None);
}

#[test]
fn test_scheduler_config_from_invalid_json() {
    assert!(SchedulerConfig::from_json_str("{ invalid json }").is_err());
    assert!(SchedulerConfig::from_json_str(r#"{ "tick_interval_ms": 0 }"#).is_err());
}

#[test]
fn test_scheduler_config_round_trips_through_json() {
    let cfg = SchedulerConfig::new()
        .with_pool(PoolConfig::new([(ResourceKind::GpuVram, 24_000)]))
        .with_state_dir("/var/lib/orchestrator");
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}
