// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{PoolStats, SlotState};
use crate::hw::{DeviceSurfaceId, Surface, SurfaceInfo};

/// Fixed set of frame surfaces allocated once per session.
pub struct SurfacePool {
    surfaces: Vec<Surface>,
    states: Vec<SlotState>,
}

impl SurfacePool {
    /// `count` host-memory surfaces.
    pub fn host(info: SurfaceInfo, count: usize) -> Self {
        Self::from_surfaces((0..count).map(|_| Surface::host(info)).collect())
    }

    /// One surface per device allocation.
    pub fn device(info: SurfaceInfo, ids: &[DeviceSurfaceId]) -> Self {
        Self::from_surfaces(ids.iter().map(|id| Surface::device(info, *id)).collect())
    }

    fn from_surfaces(surfaces: Vec<Surface>) -> Self {
        let states = vec![SlotState::Free; surfaces.len()];
        Self { surfaces, states }
    }

    pub fn capacity(&self) -> usize {
        self.surfaces.len()
    }

    /// Lowest free surface, checked out to the caller.
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self.states.iter().position(|s| *s == SlotState::Free)?;
        self.states[index] = SlotState::CheckedOut;
        Some(index)
    }

    /// Hand a checked-out surface to the hardware.
    pub fn mark_in_flight(&mut self, index: usize) {
        debug_assert_eq!(self.states[index], SlotState::CheckedOut);
        self.states[index] = SlotState::InFlight;
    }

    pub fn release(&mut self, index: usize) {
        if let Some(state) = self.states.get_mut(index) {
            *state = SlotState::Free;
        }
    }

    pub fn get(&self, index: usize) -> &Surface {
        &self.surfaces[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Surface {
        debug_assert_ne!(
            self.states[index],
            SlotState::InFlight,
            "surface {index} mutated while in flight"
        );
        &mut self.surfaces[index]
    }

    pub fn state(&self, index: usize) -> SlotState {
        self.states[index]
    }

    /// Device allocations backing this pool, for freeing at teardown.
    pub fn device_ids(&self) -> Vec<DeviceSurfaceId> {
        self.surfaces.iter().filter_map(|s| s.device_id).collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_states(self.states.iter())
    }
}
