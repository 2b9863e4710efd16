//! Shared serializable identifiers and scheduling enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique task identifier assigned at submission.
pub type TaskId = uuid::Uuid;

/// Task priority. Declaration order gives `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work, first to be preempted.
    Low,
    /// Default priority.
    #[default]
    #[serde(alias = "medium")]
    Normal,
    /// May preempt lower-priority running tasks.
    High,
    /// May preempt everything else.
    Critical,
}

impl Priority {
    /// Whether tasks of this priority may evict strictly-lower-priority running tasks.
    pub const fn can_preempt(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A resource dimension tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU shares (1024 shares = one core).
    Cpu,
    /// Memory in bytes.
    Memory,
    /// Memory plus swap in bytes.
    MemorySwap,
    /// GPU memory in megabytes.
    GpuVram,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Memory => write!(f, "memory"),
            Self::MemorySwap => write!(f, "memory_swap"),
            Self::GpuVram => write!(f, "gpu_vram"),
        }
    }
}
