//! Scheduler construction: validation, store and audit wiring, state restore.

use std::sync::Arc;

use anyhow::Context;

use crate::config::SchedulerConfig;
use crate::core::audit::AuditSink;
use crate::core::scheduler::Scheduler;
use crate::core::{AppResult, SchedulerError};
use crate::infra::store::{JsonFileStore, StateStore};
use crate::runtime::RuntimeDriver;

/// Step-by-step scheduler construction.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    driver: Arc<dyn RuntimeDriver>,
    store: Option<Arc<dyn StateStore>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Start from a configuration and a runtime driver.
    pub fn new(config: SchedulerConfig, driver: Arc<dyn RuntimeDriver>) -> Self {
        Self {
            config,
            driver,
            store: None,
            audit: None,
        }
    }

    /// Persist state to `store` and restore from it on build.
    #[must_use]
    pub fn store(mut self, store: impl StateStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Record lifecycle events to `sink`.
    #[must_use]
    pub fn audit(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(Box::new(sink));
        self
    }

    /// Validate the configuration, assemble the scheduler and restore persisted state.
    ///
    /// Fails with `Capacity` when restored RUNNING/PAUSED tasks no longer fit the
    /// configured pool.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Backend(format!("config invalid: {e}")))?;
        let scheduler = Scheduler::from_parts(self.config, self.driver, self.store, self.audit);
        scheduler.restore()?;
        Ok(scheduler)
    }
}

/// Build a scheduler from configuration, wiring a [`JsonFileStore`] under
/// `state_dir` when one is configured.
pub fn build_scheduler(
    config: SchedulerConfig,
    driver: Arc<dyn RuntimeDriver>,
) -> AppResult<Scheduler> {
    let state_dir = config.state_dir.clone();
    let mut builder = SchedulerBuilder::new(config, driver);
    if let Some(dir) = state_dir {
        let store = JsonFileStore::new(&dir)
            .with_context(|| format!("opening state store in {}", dir.display()))?;
        builder = builder.store(store);
    }
    builder.build().context("building scheduler")
}
