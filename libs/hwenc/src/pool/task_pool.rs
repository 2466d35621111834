// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::{PoolStats, SlotState};
use crate::hw::{RawBitstream, SyncPoint};

/// One outstanding asynchronous encode operation and its output buffer.
#[derive(Debug)]
pub struct Task {
    state: SlotState,
    sync_point: Option<SyncPoint>,
    surface: Option<usize>,
    pub bitstream: RawBitstream,
}

impl Task {
    /// A task is free iff it holds no completion handle and is not checked out.
    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn sync_point(&self) -> Option<SyncPoint> {
        self.sync_point
    }

    pub fn surface(&self) -> Option<usize> {
        self.surface
    }
}

/// Ring of `async_depth` tasks.
///
/// Tasks are handed out in ring order so that in-flight tasks always form one
/// contiguous run; the completion drain walks the same ring from the oldest.
pub struct TaskPool {
    tasks: Vec<Task>,
    submit_cursor: usize,
}

impl TaskPool {
    pub fn new(count: usize, buffer_bytes: usize) -> Self {
        let tasks = (0..count)
            .map(|_| Task {
                state: SlotState::Free,
                sync_point: None,
                surface: None,
                bitstream: RawBitstream::with_capacity(buffer_bytes),
            })
            .collect();
        Self {
            tasks,
            submit_cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.tasks.len()
    }

    /// Index the next submission will use.
    pub fn submit_cursor(&self) -> usize {
        self.submit_cursor
    }

    /// Next task in ring order, if it is free.
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self.submit_cursor;
        let task = self.tasks.get_mut(index)?;
        if !task.is_free() {
            return None;
        }
        task.state = SlotState::CheckedOut;
        Some(index)
    }

    /// Record a successful submission and advance the ring.
    pub fn mark_in_flight(&mut self, index: usize, point: SyncPoint, surface: usize) {
        debug_assert_eq!(index, self.submit_cursor);
        let task = &mut self.tasks[index];
        debug_assert_eq!(task.state, SlotState::CheckedOut);
        task.state = SlotState::InFlight;
        task.sync_point = Some(point);
        task.surface = Some(surface);
        self.submit_cursor = (self.submit_cursor + 1) % self.tasks.len();
    }

    /// Return a checked-out task that was never submitted.
    pub fn release(&mut self, index: usize) {
        if let Some(task) = self.tasks.get_mut(index) {
            debug_assert_ne!(task.state, SlotState::InFlight);
            task.state = SlotState::Free;
            task.bitstream.clear();
        }
    }

    /// Recycle a drained task: its output moves into `scratch` and the
    /// task takes the scratch allocation. Returns the surface it held.
    pub fn complete(&mut self, index: usize, scratch: &mut RawBitstream) -> Option<usize> {
        let task = &mut self.tasks[index];
        std::mem::swap(&mut task.bitstream, scratch);
        task.bitstream.clear();
        task.sync_point = None;
        task.state = SlotState::Free;
        task.surface.take()
    }

    /// Forget an in-flight task whose output will never be collected.
    pub fn abandon(&mut self, index: usize) -> Option<usize> {
        let task = &mut self.tasks[index];
        task.bitstream.clear();
        task.sync_point = None;
        task.state = SlotState::Free;
        task.surface.take()
    }

    pub fn get(&self, index: usize) -> &Task {
        &self.tasks[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Task {
        &mut self.tasks[index]
    }

    pub fn in_flight(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == SlotState::InFlight)
            .count()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_states(self.tasks.iter().map(|t| &t.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_order_acquire() {
        let mut pool = TaskPool::new(3, 64);
        for (i, point) in [(0, 10), (1, 11), (2, 12)] {
            assert_eq!(pool.acquire(), Some(i));
            pool.mark_in_flight(i, SyncPoint(point), i);
        }
        assert_eq!(pool.acquire(), None);
        assert_eq!(pool.in_flight(), 3);

        let mut scratch = RawBitstream::default();
        assert_eq!(pool.complete(0, &mut scratch), Some(0));
        assert_eq!(pool.acquire(), Some(0));
    }

    #[test]
    fn test_release_keeps_cursor() {
        let mut pool = TaskPool::new(2, 64);
        let idx = pool.acquire().unwrap();
        pool.release(idx);
        assert_eq!(pool.acquire(), Some(idx));
    }

    #[test]
    fn test_complete_swaps_buffers() {
        let mut pool = TaskPool::new(1, 4096);
        let idx = pool.acquire().unwrap();
        pool.mark_in_flight(idx, SyncPoint(1), 0);
        pool.get_mut(idx).bitstream.data.extend_from_slice(&[0, 0, 0, 1, 0x65]);

        let mut scratch = RawBitstream::with_capacity(16);
        pool.complete(idx, &mut scratch);

        assert_eq!(scratch.data, vec![0, 0, 0, 1, 0x65]);
        assert!(scratch.capacity() >= 4096);
        assert!(pool.get(idx).is_free());
        assert!(pool.get(idx).sync_point().is_none());
        assert!(pool.get(idx).bitstream.is_empty());
    }
}
