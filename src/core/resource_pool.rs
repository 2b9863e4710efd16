//! Resource pool with per-dimension capacity accounting.
//!
//! The whole pool sits behind one `parking_lot::Mutex`, so a reservation across several
//! dimensions is all-or-nothing and never interleaves with another reserve or release.
//! The lock is only ever held for in-memory bookkeeping; callers must not hold it (or
//! anything derived from it) across a runtime driver call.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::ResourceRequirements;
use crate::util::serde::{ResourceKind, TaskId};

/// Capacity and commitment of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionUsage {
    /// Dimension.
    pub kind: ResourceKind,
    /// Total capacity.
    pub capacity: u64,
    /// Sum of active reservations.
    pub committed: u64,
}

/// First dimension that cannot satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    /// Dimension found short.
    pub kind: ResourceKind,
    /// Amount requested.
    pub requested: u64,
    /// Amount uncommitted.
    pub available: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    capacity: BTreeMap<ResourceKind, u64>,
    committed: BTreeMap<ResourceKind, u64>,
    reservations: HashMap<TaskId, ResourceRequirements>,
}

impl PoolState {
    fn available(&self, kind: ResourceKind) -> u64 {
        let capacity = self.capacity.get(&kind).copied().unwrap_or(0);
        let committed = self.committed.get(&kind).copied().unwrap_or(0);
        capacity.saturating_sub(committed)
    }

    fn shortfall(&self, req: &ResourceRequirements, credit: &ResourceRequirements) -> Option<Shortfall> {
        req.iter().find_map(|(kind, requested)| {
            let available = self.available(kind).saturating_add(credit.get(kind));
            (requested > available).then_some(Shortfall {
                kind,
                requested,
                available,
            })
        })
    }
}

/// Total capacity and per-task reservations for every resource dimension.
#[derive(Debug, Default)]
pub struct ResourcePool {
    state: Mutex<PoolState>,
}

impl ResourcePool {
    /// Create a pool with the given capacities. Dimensions not listed have zero capacity.
    pub fn new(capacities: impl IntoIterator<Item = (ResourceKind, u64)>) -> Self {
        let capacity: BTreeMap<_, _> = capacities.into_iter().collect();
        let committed = capacity.keys().map(|k| (*k, 0)).collect();
        Self {
            state: Mutex::new(PoolState {
                capacity,
                committed,
                reservations: HashMap::new(),
            }),
        }
    }

    /// Total capacity of `kind`.
    pub fn capacity(&self, kind: ResourceKind) -> u64 {
        self.state.lock().capacity.get(&kind).copied().unwrap_or(0)
    }

    /// Sum of reservations on `kind`.
    pub fn committed(&self, kind: ResourceKind) -> u64 {
        self.state.lock().committed.get(&kind).copied().unwrap_or(0)
    }

    /// Uncommitted amount of `kind`.
    pub fn peek_available(&self, kind: ResourceKind) -> u64 {
        self.state.lock().available(kind)
    }

    /// Whether the pool tracks `kind` at all.
    pub fn has_dimension(&self, kind: ResourceKind) -> bool {
        self.state.lock().capacity.contains_key(&kind)
    }

    /// Atomically reserve `req` for `task_id`.
    ///
    /// Either every requested dimension is reserved or none is. A task that already holds
    /// a reservation keeps it unchanged and the call reports success.
    pub fn try_reserve(&self, task_id: TaskId, req: &ResourceRequirements) -> bool {
        let mut state = self.state.lock();
        if state.reservations.contains_key(&task_id) {
            tracing::debug!("task {} already holds a reservation", task_id);
            return true;
        }
        if let Some(short) = state.shortfall(req, &ResourceRequirements::new()) {
            tracing::debug!(
                "reservation for task {} denied: {} requested {}, available {}",
                task_id,
                short.kind,
                short.requested,
                short.available
            );
            return false;
        }
        for (kind, amount) in req.iter() {
            *state.committed.entry(kind).or_insert(0) += amount;
        }
        state.reservations.insert(task_id, req.clone());
        true
    }

    /// Drop every reservation of `task_id`, returning what was freed.
    pub fn release(&self, task_id: TaskId) -> Option<ResourceRequirements> {
        let mut state = self.state.lock();
        let freed = state.reservations.remove(&task_id)?;
        for (kind, amount) in freed.iter() {
            if let Some(committed) = state.committed.get_mut(&kind) {
                *committed = committed.saturating_sub(amount);
            }
        }
        drop(state);
        tracing::debug!("released reservation of task {}", task_id);
        Some(freed)
    }

    /// Reservation currently held by `task_id`.
    pub fn reservation(&self, task_id: TaskId) -> Option<ResourceRequirements> {
        self.state.lock().reservations.get(&task_id).cloned()
    }

    /// First dimension where `req` does not fit, counting `credit` as already freed.
    pub fn shortfall_with_credit(
        &self,
        req: &ResourceRequirements,
        credit: &ResourceRequirements,
    ) -> Option<Shortfall> {
        self.state.lock().shortfall(req, credit)
    }

    /// First dimension where `req` does not fit right now.
    pub fn shortfall(&self, req: &ResourceRequirements) -> Option<Shortfall> {
        self.shortfall_with_credit(req, &ResourceRequirements::new())
    }

    /// Number of tasks holding a reservation.
    pub fn reservation_count(&self) -> usize {
        self.state.lock().reservations.len()
    }

    /// Capacity and commitment of every dimension.
    pub fn usage(&self) -> Vec<DimensionUsage> {
        let state = self.state.lock();
        state
            .capacity
            .iter()
            .map(|(kind, capacity)| DimensionUsage {
                kind: *kind,
                capacity: *capacity,
                committed: state.committed.get(kind).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Check that, for every dimension, the sum of reservations equals the committed
    /// counter and does not exceed capacity.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let mut sums = ResourceRequirements::new();
        for req in state.reservations.values() {
            sums.accumulate(req);
        }
        state.capacity.iter().all(|(kind, capacity)| {
            let committed = state.committed.get(kind).copied().unwrap_or(0);
            sums.get(*kind) == committed && committed <= *capacity
        }) && sums
            .iter()
            .all(|(kind, amount)| amount == 0 || state.capacity.contains_key(&kind))
    }
}
