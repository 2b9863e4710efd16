//! Pool and scheduler configuration structures.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;
use crate::util::serde::ResourceKind;

const DEFAULT_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;
const DEFAULT_SWAP_BYTES: u64 = 16 * 1024 * 1024 * 1024;
const CPU_SHARES_PER_CORE: u64 = 1024;

/// What happens to a task's reservation while it is paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Keep the full reservation; resume never waits for capacity.
    #[default]
    Retain,
    /// Release the reservation; resume goes back through admission.
    Release,
}

/// Pool capacity configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Capacity per resource dimension.
    pub capacities: BTreeMap<ResourceKind, u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = u64::try_from(num_cpus::get()).unwrap_or(1);
        Self {
            capacities: BTreeMap::from([
                (ResourceKind::Cpu, cores * CPU_SHARES_PER_CORE),
                (ResourceKind::Memory, DEFAULT_MEMORY_BYTES),
                (ResourceKind::MemorySwap, DEFAULT_SWAP_BYTES),
            ]),
        }
    }
}

impl PoolConfig {
    /// Pool with exactly the given capacities.
    pub fn new(capacities: impl IntoIterator<Item = (ResourceKind, u64)>) -> Self {
        Self {
            capacities: capacities.into_iter().collect(),
        }
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacities.is_empty() {
            return Err("at least one resource dimension must be defined".into());
        }
        if let Some((kind, _)) = self.capacities.iter().find(|(_, cap)| **cap == 0) {
            return Err(format!("capacity of {kind} must be greater than 0"));
        }
        Ok(())
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Resource pool capacities.
    pub pool: PoolConfig,
    /// Control-loop period in milliseconds.
    pub tick_interval_ms: u64,
    /// Transient realization failures tolerated before a task goes FAILED.
    pub max_start_retries: u32,
    /// Grace period for a graceful stop before a forced stop is attempted.
    pub stop_grace_secs: u64,
    /// STOPPED/FAILED tasks are reaped this long after their last transition.
    pub terminal_retention_secs: Option<u64>,
    /// Default reservation policy for pause.
    pub pause_policy: PausePolicy,
    /// Directory for persisted state; `None` keeps state in memory.
    pub state_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            tick_interval_ms: 5_000,
            max_start_retries: 3,
            stop_grace_secs: 10,
            terminal_retention_secs: Some(24 * 60 * 60),
            pause_policy: PausePolicy::Retain,
            state_dir: None,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace pool capacities.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the loop period.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the transient-retry bound.
    #[must_use]
    pub fn with_max_start_retries(mut self, retries: u32) -> Self {
        self.max_start_retries = retries;
        self
    }

    /// Set the stop grace period.
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_secs = grace.as_secs();
        self
    }

    /// Set (or disable with `None`) terminal retention.
    #[must_use]
    pub fn with_terminal_retention(mut self, retention: Option<Duration>) -> Self {
        self.terminal_retention_secs = retention.map(|d| d.as_secs());
        self
    }

    /// Set the default pause policy.
    #[must_use]
    pub fn with_pause_policy(mut self, policy: PausePolicy) -> Self {
        self.pause_policy = policy;
        self
    }

    /// Persist state under `dir`.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Loop period as a `Duration`.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Stop grace period as a `Duration`.
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Validate all values.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by `ORCHESTRATOR_*` environment
    /// variables, loading a `.env` file first when present.
    ///
    /// Recognised variables: `ORCHESTRATOR_CONFIG` (path to a JSON config used as the
    /// base), `ORCHESTRATOR_TICK_MS`, `ORCHESTRATOR_MAX_RETRIES`,
    /// `ORCHESTRATOR_STOP_GRACE_SECS`, `ORCHESTRATOR_RETENTION_SECS` (`0` disables
    /// reaping), `ORCHESTRATOR_PAUSE_POLICY` (`retain`/`release`),
    /// `ORCHESTRATOR_STATE_DIR`, `ORCHESTRATOR_CPU_SHARES`, `ORCHESTRATOR_MEMORY`.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("ORCHESTRATOR_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                Self::from_json_str(&raw).map_err(anyhow::Error::msg)?
            }
            Err(_) => Self::default(),
        };

        if let Some(v) = env_parse::<u64>("ORCHESTRATOR_TICK_MS")? {
            cfg.tick_interval_ms = v;
        }
        if let Some(v) = env_parse::<u32>("ORCHESTRATOR_MAX_RETRIES")? {
            cfg.max_start_retries = v;
        }
        if let Some(v) = env_parse::<u64>("ORCHESTRATOR_STOP_GRACE_SECS")? {
            cfg.stop_grace_secs = v;
        }
        if let Some(v) = env_parse::<u64>("ORCHESTRATOR_RETENTION_SECS")? {
            cfg.terminal_retention_secs = (v > 0).then_some(v);
        }
        if let Ok(policy) = std::env::var("ORCHESTRATOR_PAUSE_POLICY") {
            cfg.pause_policy = match policy.to_ascii_lowercase().as_str() {
                "retain" => PausePolicy::Retain,
                "release" => PausePolicy::Release,
                other => anyhow::bail!("unknown pause policy `{other}`"),
            };
        }
        if let Ok(dir) = std::env::var("ORCHESTRATOR_STATE_DIR") {
            cfg.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = env_parse::<u64>("ORCHESTRATOR_CPU_SHARES")? {
            cfg.pool.capacities.insert(ResourceKind::Cpu, v);
        }
        if let Ok(raw) = std::env::var("ORCHESTRATOR_MEMORY") {
            let bytes = crate::util::units::parse_memory(&raw).map_err(anyhow::Error::msg)?;
            cfg.pool.capacities.insert(ResourceKind::Memory, bytes);
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_parse<T>(key: &str) -> AppResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("parsing {key}={raw}")),
        Err(_) => Ok(None),
    }
}
