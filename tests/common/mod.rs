//! Shared fixtures for scheduler integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use prometheus_orchestrator::config::{PoolConfig, SchedulerConfig};
use prometheus_orchestrator::core::{
    ResourceRequirements, Scheduler, TaskDescriptor, TaskState,
};
use prometheus_orchestrator::runtime::SimulatedDriver;
use prometheus_orchestrator::util::{Priority, ResourceKind, TaskId};

/// Config with a CPU-only pool, a fast tick, and no reaping.
pub fn config(cpu: u64) -> SchedulerConfig {
    SchedulerConfig::new()
        .with_pool(PoolConfig::new([(ResourceKind::Cpu, cpu)]))
        .with_tick_interval(Duration::from_millis(20))
        .with_stop_grace(Duration::from_secs(1))
        .with_terminal_retention(None)
}

pub fn job(name: &str, priority: Priority, cpu: u64) -> TaskDescriptor {
    TaskDescriptor::new(name, "alpine:3.19")
        .with_priority(priority)
        .with_resources(ResourceRequirements::new().with_cpu_shares(cpu))
}

pub fn setup(cpu: u64) -> (Scheduler, Arc<SimulatedDriver>) {
    setup_with(config(cpu))
}

pub fn setup_with(cfg: SchedulerConfig) -> (Scheduler, Arc<SimulatedDriver>) {
    let driver = Arc::new(SimulatedDriver::new());
    let scheduler = Scheduler::new(cfg, driver.clone()).unwrap();
    (scheduler, driver)
}

pub fn state(scheduler: &Scheduler, id: TaskId) -> TaskState {
    scheduler.get(id).unwrap().state
}

pub fn committed_cpu(scheduler: &Scheduler) -> u64 {
    scheduler
        .system_status()
        .resources
        .iter()
        .find(|u| u.kind == ResourceKind::Cpu)
        .map_or(0, |u| u.committed)
}

/// Poll until `id` reaches `want` or two seconds pass.
pub async fn wait_for_state(scheduler: &Scheduler, id: TaskId, want: TaskState) -> bool {
    for _ in 0..200 {
        if scheduler.get(id).map(|v| v.state).ok() == Some(want) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
