// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-capacity surface and task pools.
//!
//! Both pools are sized once at session creation and never grow. Acquire
//! never blocks; exhaustion is reported as `None` and the caller drains a
//! completion before retrying.

mod surface_pool;
mod task_pool;

pub use surface_pool::SurfacePool;
pub use task_pool::{Task, TaskPool};

/// Lifecycle of a pooled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Held by the submitter for one submission.
    CheckedOut,
    /// Owned by the hardware until its completion is drained.
    InFlight,
}

/// Statistics about pool usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub checked_out: usize,
    pub in_flight: usize,
}

impl PoolStats {
    pub(crate) fn from_states<'a>(states: impl Iterator<Item = &'a SlotState>) -> Self {
        let mut stats = PoolStats::default();
        for state in states {
            stats.capacity += 1;
            match state {
                SlotState::Free => stats.free += 1,
                SlotState::CheckedOut => stats.checked_out += 1,
                SlotState::InFlight => stats.in_flight += 1,
            }
        }
        stats
    }
}
