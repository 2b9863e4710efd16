//! In-process runtime driver with scriptable failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::task::ContainerRef;
use crate::runtime::driver::{ContainerSpec, ContainerStatus, DriverError, RuntimeDriver};

/// Driver operation, used to script failures and latency and to count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    /// `ensure_image`.
    EnsureImage,
    /// `create_container`.
    Create,
    /// `start`.
    Start,
    /// `stop`.
    Stop,
    /// `pause`.
    Pause,
    /// `unpause`.
    Unpause,
    /// `remove`.
    Remove,
    /// `inspect`.
    Inspect,
}

#[derive(Debug, Default)]
struct SimState {
    containers: HashMap<ContainerRef, ContainerStatus>,
    images: HashSet<String>,
    next_id: u64,
    failures: HashMap<DriverOp, VecDeque<DriverError>>,
    container_failures: HashMap<(ContainerRef, DriverOp), VecDeque<DriverError>>,
    latency: HashMap<DriverOp, Duration>,
    calls: HashMap<DriverOp, usize>,
}

/// Runtime driver that keeps containers in memory.
///
/// ```rust,ignore
/// let driver = SimulatedDriver::new();
/// driver.fail_times(DriverOp::EnsureImage, 2, DriverError::Transient("pull timeout".into()));
/// ```
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    /// Driver with no containers and no scripted behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: DriverOp, err: DriverError) {
        self.fail_times(op, 1, err);
    }

    /// Fail the next `times` calls of `op` with `err`.
    pub fn fail_times(&self, op: DriverOp, times: usize, err: DriverError) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    /// Fail the next `times` calls of `op` that target container `id`.
    pub fn fail_container(&self, id: &ContainerRef, op: DriverOp, times: usize, err: DriverError) {
        let mut state = self.state.lock();
        let queue = state.container_failures.entry((id.clone(), op)).or_default();
        queue.extend(std::iter::repeat_n(err, times));
    }

    /// Delay every call of `op` by `latency`.
    pub fn set_latency(&self, op: DriverOp, latency: Duration) {
        self.state.lock().latency.insert(op, latency);
    }

    /// Number of calls made to `op` so far.
    pub fn calls(&self, op: DriverOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Status of a container, if it exists.
    pub fn status(&self, id: &ContainerRef) -> Option<ContainerStatus> {
        self.state.lock().containers.get(id).copied()
    }

    /// Number of containers that exist.
    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Make a container's process exit with `code`.
    pub fn exit_container(&self, id: &ContainerRef, code: i64) {
        if let Some(status) = self.state.lock().containers.get_mut(id) {
            *status = ContainerStatus::Exited { code };
        }
    }

    /// Remove a container behind the scheduler's back.
    pub fn vanish(&self, id: &ContainerRef) {
        self.state.lock().containers.remove(id);
    }

    async fn enter(&self, op: DriverOp, target: Option<&ContainerRef>) -> Result<(), DriverError> {
        let (latency, failure) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            let latency = state.latency.get(&op).copied();
            let pinned = target.and_then(|id| {
                state
                    .container_failures
                    .get_mut(&(id.clone(), op))
                    .and_then(VecDeque::pop_front)
            });
            let failure =
                pinned.or_else(|| state.failures.get_mut(&op).and_then(VecDeque::pop_front));
            (latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        failure.map_or(Ok(()), Err)
    }

    fn with_container<T>(
        &self,
        id: &ContainerRef,
        f: impl FnOnce(&mut ContainerStatus) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        let status = state
            .containers
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(id.to_string()))?;
        f(status)
    }
}

#[async_trait]
impl RuntimeDriver for SimulatedDriver {
    async fn ensure_image(&self, image: &str) -> Result<(), DriverError> {
        self.enter(DriverOp::EnsureImage, None).await?;
        self.state.lock().images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, DriverError> {
        self.enter(DriverOp::Create, None).await?;
        let mut state = self.state.lock();
        if !state.images.contains(&spec.image) {
            return Err(DriverError::Fatal(format!("image {} not present", spec.image)));
        }
        state.next_id += 1;
        let id = ContainerRef::new(format!("sim-{:08x}-{}", state.next_id, spec.name));
        state.containers.insert(id.clone(), ContainerStatus::Created);
        Ok(id)
    }

    async fn start(&self, id: &ContainerRef) -> Result<(), DriverError> {
        self.enter(DriverOp::Start, Some(id)).await?;
        self.with_container(id, |status| match status {
            ContainerStatus::Created | ContainerStatus::Exited { .. } => {
                *status = ContainerStatus::Running;
                Ok(())
            }
            ContainerStatus::Running => Ok(()),
            ContainerStatus::Paused => Err(DriverError::Fatal("container is paused".into())),
        })
    }

    async fn stop(&self, id: &ContainerRef, _timeout: Duration) -> Result<(), DriverError> {
        self.enter(DriverOp::Stop, Some(id)).await?;
        self.with_container(id, |status| {
            if !matches!(status, ContainerStatus::Exited { .. }) {
                *status = ContainerStatus::Exited { code: 0 };
            }
            Ok(())
        })
    }

    async fn pause(&self, id: &ContainerRef) -> Result<(), DriverError> {
        self.enter(DriverOp::Pause, Some(id)).await?;
        self.with_container(id, |status| match status {
            ContainerStatus::Running => {
                *status = ContainerStatus::Paused;
                Ok(())
            }
            other => Err(DriverError::Fatal(format!("cannot pause container in state {other}"))),
        })
    }

    async fn unpause(&self, id: &ContainerRef) -> Result<(), DriverError> {
        self.enter(DriverOp::Unpause, Some(id)).await?;
        self.with_container(id, |status| match status {
            ContainerStatus::Paused => {
                *status = ContainerStatus::Running;
                Ok(())
            }
            other => Err(DriverError::Fatal(format!(
                "cannot unpause container in state {other}"
            ))),
        })
    }

    async fn remove(&self, id: &ContainerRef) -> Result<(), DriverError> {
        self.enter(DriverOp::Remove, Some(id)).await?;
        let mut state = self.state.lock();
        match state.containers.get(id) {
            None => Err(DriverError::NotFound(id.to_string())),
            Some(status @ (ContainerStatus::Running | ContainerStatus::Paused)) => Err(
                DriverError::Fatal(format!("cannot remove container in state {status}; stop it first")),
            ),
            Some(_) => {
                state.containers.remove(id);
                Ok(())
            }
        }
    }

    async fn inspect(&self, id: &ContainerRef) -> Result<ContainerStatus, DriverError> {
        self.enter(DriverOp::Inspect, Some(id)).await?;
        self.with_container(id, |status| Ok(*status))
    }
}
