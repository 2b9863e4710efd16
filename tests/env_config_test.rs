//! `SchedulerConfig::from_env` overrides.
//!
//! Every test here mutates process environment, so they share one lock.

use std::path::PathBuf;

use parking_lot::{const_mutex, Mutex, MutexGuard};
use prometheus_orchestrator::config::{PausePolicy, SchedulerConfig};
use prometheus_orchestrator::util::ResourceKind;

static ENV_LOCK: Mutex<()> = const_mutex(());

const KEYS: [&str; 9] = [
    "ORCHESTRATOR_CONFIG",
    "ORCHESTRATOR_TICK_MS",
    "ORCHESTRATOR_MAX_RETRIES",
    "ORCHESTRATOR_STOP_GRACE_SECS",
    "ORCHESTRATOR_RETENTION_SECS",
    "ORCHESTRATOR_PAUSE_POLICY",
    "ORCHESTRATOR_STATE_DIR",
    "ORCHESTRATOR_CPU_SHARES",
    "ORCHESTRATOR_MEMORY",
];

/// Holds the lock and clears every variable on entry and on drop.
struct EnvGuard {
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn set(vars: &[(&str, &str)]) -> Self {
        let lock = ENV_LOCK.lock();
        clear();
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        Self { _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        clear();
    }
}

fn clear() {
    for key in KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn test_from_env_without_overrides_matches_defaults() {
    let _env = EnvGuard::set(&[]);
    assert_eq!(SchedulerConfig::from_env().unwrap(), SchedulerConfig::default());
}

#[test]
fn test_from_env_applies_every_override() {
    let _env = EnvGuard::set(&[
        ("ORCHESTRATOR_TICK_MS", "250"),
        ("ORCHESTRATOR_MAX_RETRIES", "7"),
        ("ORCHESTRATOR_STOP_GRACE_SECS", " 3 "),
        ("ORCHESTRATOR_RETENTION_SECS", "120"),
        ("ORCHESTRATOR_PAUSE_POLICY", "Release"),
        ("ORCHESTRATOR_STATE_DIR", "/var/lib/orchestrator"),
        ("ORCHESTRATOR_CPU_SHARES", "2048"),
        ("ORCHESTRATOR_MEMORY", "512m"),
    ]);
    let cfg = SchedulerConfig::from_env().unwrap();

    assert_eq!(cfg.tick_interval_ms, 250);
    assert_eq!(cfg.max_start_retries, 7);
    assert_eq!(cfg.stop_grace_secs, 3);
    assert_eq!(cfg.terminal_retention_secs, Some(120));
    assert_eq!(cfg.pause_policy, PausePolicy::Release);
    assert_eq!(cfg.state_dir, Some(PathBuf::from("/var/lib/orchestrator")));
    assert_eq!(cfg.pool.capacities[&ResourceKind::Cpu], 2048);
    assert_eq!(cfg.pool.capacities[&ResourceKind::Memory], 512 * 1024 * 1024);
}

#[test]
fn test_zero_retention_disables_reaping() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_RETENTION_SECS", "0")]);
    let cfg = SchedulerConfig::from_env().unwrap();
    assert_eq!(cfg.terminal_retention_secs, None);
}

#[test]
fn test_unknown_pause_policy_is_rejected() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_PAUSE_POLICY", "freeze")]);
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("unknown pause policy `freeze`"));
}

#[test]
fn test_malformed_number_names_the_variable() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_TICK_MS", "soon")]);
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("ORCHESTRATOR_TICK_MS=soon"));
}

#[test]
fn test_malformed_memory_is_rejected() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_MEMORY", "lots")]);
    assert!(SchedulerConfig::from_env().is_err());
}

#[test]
fn test_zero_tick_fails_validation() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_TICK_MS", "0")]);
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("tick_interval_ms"));
}

#[test]
fn test_config_file_is_the_base_for_overrides() {
    let path = std::env::temp_dir().join(format!("orchestrator-{}.json", uuid::Uuid::new_v4()));
    let base = SchedulerConfig::new()
        .with_max_start_retries(9)
        .with_pause_policy(PausePolicy::Release);
    std::fs::write(&path, serde_json::to_string(&base).unwrap()).unwrap();

    let path_str = path.to_string_lossy().into_owned();
    let _env = EnvGuard::set(&[
        ("ORCHESTRATOR_CONFIG", path_str.as_str()),
        ("ORCHESTRATOR_TICK_MS", "100"),
    ]);
    let cfg = SchedulerConfig::from_env().unwrap();
    assert_eq!(cfg.max_start_retries, 9);
    assert_eq!(cfg.pause_policy, PausePolicy::Release);
    assert_eq!(cfg.tick_interval_ms, 100);

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let _env = EnvGuard::set(&[("ORCHESTRATOR_CONFIG", "/nonexistent/orchestrator.json")]);
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("reading config file"));
}
