// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Completion drain: collect finished encode tasks in submission order.

use std::time::Duration;

use crate::error::{EncoderError, HwError, Result};
use crate::hw::{HardwareSession, RawBitstream};
use crate::pool::{SurfacePool, TaskPool};

/// Walks the task ring from the oldest in-flight task.
///
/// Completed output is swapped into an owned scratch buffer, so the returned
/// bitstream stays valid until the next call and the task is immediately
/// reusable.
pub struct CompletionDrain {
    first_sync: usize,
    scratch: RawBitstream,
}

impl CompletionDrain {
    pub fn new(buffer_bytes: usize) -> Self {
        Self {
            first_sync: 0,
            scratch: RawBitstream::with_capacity(buffer_bytes),
        }
    }

    /// Index of the oldest task that may still be in flight.
    pub fn first_sync(&self) -> usize {
        self.first_sync
    }

    /// Wait up to `timeout` for the oldest in-flight task.
    ///
    /// Returns `None` when nothing is in flight, or when polling with a zero
    /// timeout and the task has not finished. Any other failure leaves the
    /// task unrecoverable and is returned as a fatal error.
    pub fn wait_next(
        &mut self,
        hw: &mut dyn HardwareSession,
        tasks: &mut TaskPool,
        surfaces: &mut SurfacePool,
        timeout: Duration,
    ) -> Result<Option<&RawBitstream>> {
        let index = self.first_sync;
        let Some(point) = tasks.get(index).sync_point() else {
            return Ok(None);
        };

        match hw.sync(point, timeout, &mut tasks.get_mut(index).bitstream) {
            Ok(()) => {}
            Err(HwError::InExecution) if timeout.is_zero() => return Ok(None),
            Err(HwError::InExecution) => {
                tracing::error!(
                    "[CompletionDrain] Task {} still executing after {:?}",
                    index,
                    timeout
                );
                return Err(EncoderError::Timeout(timeout.as_millis() as u64));
            }
            Err(HwError::Timeout { waited_ms }) => {
                tracing::error!(
                    "[CompletionDrain] Timed out after {} ms waiting for task {}",
                    waited_ms,
                    index
                );
                return Err(EncoderError::Timeout(waited_ms));
            }
            Err(HwError::DeviceLost(msg)) => {
                tracing::error!("[CompletionDrain] Device lost waiting for task {}", index);
                return Err(EncoderError::DeviceLost(msg));
            }
            Err(e) => {
                tracing::error!("[CompletionDrain] Sync failed for task {}: {}", index, e);
                return Err(EncoderError::SyncFailed(e.to_string()));
            }
        }

        if let Some(surface) = tasks.complete(index, &mut self.scratch) {
            surfaces.release(surface);
        }
        self.first_sync = (index + 1) % tasks.capacity();

        tracing::trace!(
            task = index,
            pts = self.scratch.pts,
            bytes = self.scratch.data.len(),
            "[CompletionDrain] Task completed"
        );
        Ok(Some(&self.scratch))
    }

    /// Block until every in-flight task has completed, handing each output
    /// to `on_complete` in submission order.
    ///
    /// On failure all remaining tasks are abandoned and their surfaces
    /// released before the error is returned.
    pub fn drain_all(
        &mut self,
        hw: &mut dyn HardwareSession,
        tasks: &mut TaskPool,
        surfaces: &mut SurfacePool,
        timeout: Duration,
        on_complete: &mut dyn FnMut(&RawBitstream),
    ) -> Result<usize> {
        let mut drained = 0;
        loop {
            match self.wait_next(hw, tasks, surfaces, timeout) {
                Ok(Some(bitstream)) => {
                    on_complete(bitstream);
                    drained += 1;
                }
                Ok(None) => return Ok(drained),
                Err(e) => {
                    self.abandon_all(tasks, surfaces);
                    return Err(e);
                }
            }
        }
    }

    /// Drop every in-flight task without collecting its output.
    pub fn abandon_all(&mut self, tasks: &mut TaskPool, surfaces: &mut SurfacePool) {
        let mut abandoned = 0;
        for index in 0..tasks.capacity() {
            if tasks.get(index).sync_point().is_none() {
                continue;
            }
            if let Some(surface) = tasks.abandon(index) {
                surfaces.release(surface);
            }
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::warn!("[CompletionDrain] Abandoned {} in-flight tasks", abandoned);
        }
        self.first_sync = tasks.submit_cursor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecKind, Profile, RateControlParams};
    use crate::config::EncoderSettings;
    use crate::format::{ColorSpace, PixelFormat, Rational, VideoRange};
    use crate::hw::loopback::{LoopbackDevice, LoopbackOptions};
    use crate::hw::{EncodeDevice, SessionParams, SyncPoint};

    const WAIT: Duration = Duration::from_secs(1);

    struct Rig {
        hw: Box<dyn HardwareSession>,
        tasks: TaskPool,
        surfaces: SurfacePool,
        drain: CompletionDrain,
        capacity: usize,
    }

    impl Rig {
        fn new(options: LoopbackOptions, depth: usize) -> Self {
            let device = LoopbackDevice::new(options);
            let mut hw = device.open_session(CodecKind::Avc).unwrap();
            let params = SessionParams {
                codec: CodecKind::Avc,
                profile: Profile::High,
                width: 64,
                height: 64,
                surface_format: PixelFormat::Nv12,
                range: VideoRange::Partial,
                color_space: ColorSpace::Bt709,
                fps: Rational::new(30, 1),
                rate: RateControlParams::from_settings(&EncoderSettings::default()),
                gop_frames: 0,
                bframes: 0,
                async_depth: depth as u16,
                low_power: false,
                device_surfaces: false,
                buffer_size_kb: 0,
            };
            hw.init(&params).unwrap();
            let active = hw.video_param().unwrap();
            let capacity = active.output_buffer_bytes();
            Self {
                surfaces: SurfacePool::host(active.surface_info(), depth + 1),
                tasks: TaskPool::new(depth, capacity),
                drain: CompletionDrain::new(capacity),
                hw,
                capacity,
            }
        }

        fn submit(&mut self, pts: i64) -> usize {
            let task = self.tasks.acquire().unwrap();
            let surface = self.surfaces.acquire().unwrap();
            self.surfaces.get_mut(surface).timestamp = pts;
            let point = self
                .hw
                .encode_async(self.surfaces.get(surface), self.capacity)
                .unwrap();
            self.surfaces.mark_in_flight(surface);
            self.tasks.mark_in_flight(task, point, surface);
            task
        }

        fn wait(&mut self, timeout: Duration) -> Result<Option<i64>> {
            Ok(self
                .drain
                .wait_next(
                    self.hw.as_mut(),
                    &mut self.tasks,
                    &mut self.surfaces,
                    timeout,
                )?
                .map(|b| b.pts))
        }
    }

    #[test]
    fn test_nothing_in_flight() {
        let mut rig = Rig::new(LoopbackOptions::default(), 2);
        assert_eq!(rig.wait(WAIT).unwrap(), None);
    }

    #[test]
    fn test_completions_in_submission_order() {
        let mut rig = Rig::new(LoopbackOptions::default().with_latency(0), 3);
        for pts in 0..3 {
            rig.submit(pts * 10);
        }
        assert_eq!(rig.wait(WAIT).unwrap(), Some(0));
        assert_eq!(rig.wait(WAIT).unwrap(), Some(10));

        // ring wraps: the freed slot 0 is next for submission
        assert_eq!(rig.submit(30), 0);
        assert_eq!(rig.wait(WAIT).unwrap(), Some(20));
        assert_eq!(rig.wait(WAIT).unwrap(), Some(30));
        assert_eq!(rig.wait(WAIT).unwrap(), None);
        assert_eq!(rig.surfaces.stats().in_flight, 0);
    }

    #[test]
    fn test_zero_timeout_polls() {
        let mut rig = Rig::new(LoopbackOptions::default().with_latency(1), 2);
        rig.submit(0);
        assert_eq!(rig.wait(Duration::ZERO).unwrap(), None);
        assert_eq!(rig.tasks.in_flight(), 1);

        rig.submit(1);
        assert_eq!(rig.wait(Duration::ZERO).unwrap(), Some(0));
    }

    #[test]
    fn test_stall_is_fatal_timeout() {
        let mut rig = Rig::new(LoopbackOptions::default().stalling_after(0), 2);
        rig.submit(0);
        let err = rig.wait(WAIT).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, EncoderError::Timeout(_)));
    }

    #[test]
    fn test_drain_all_releases_everything() {
        let mut rig = Rig::new(LoopbackOptions::default().with_latency(2), 3);
        for pts in 0..3 {
            rig.submit(pts);
        }
        let mut seen = Vec::new();
        let drained = rig
            .drain
            .drain_all(
                rig.hw.as_mut(),
                &mut rig.tasks,
                &mut rig.surfaces,
                WAIT,
                &mut |b: &RawBitstream| seen.push(b.pts),
            )
            .unwrap();
        assert_eq!(drained, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(rig.tasks.in_flight(), 0);
        assert_eq!(rig.surfaces.stats().free, 4);
    }

    #[test]
    fn test_failed_drain_abandons_tasks() {
        let mut rig = Rig::new(LoopbackOptions::default().stalling_after(1), 3);
        rig.submit(0);
        rig.submit(1);
        rig.submit(2);
        let mut seen = Vec::new();
        let result = rig.drain.drain_all(
            rig.hw.as_mut(),
            &mut rig.tasks,
            &mut rig.surfaces,
            WAIT,
            &mut |b: &RawBitstream| seen.push(b.pts),
        );
        assert!(result.is_err());
        assert_eq!(seen, vec![0]);
        assert_eq!(rig.tasks.in_flight(), 0);
        assert_eq!(rig.surfaces.stats().free, rig.surfaces.capacity());
        assert_eq!(rig.drain.first_sync(), 0);
    }

    #[test]
    fn test_unknown_sync_point_is_an_error() {
        let mut rig = Rig::new(LoopbackOptions::default(), 2);
        let task = rig.tasks.acquire().unwrap();
        let surface = rig.surfaces.acquire().unwrap();
        rig.surfaces.mark_in_flight(surface);
        rig.tasks.mark_in_flight(task, SyncPoint(999), surface);
        let err = rig.wait(WAIT).unwrap_err();
        assert!(matches!(err, EncoderError::SyncFailed(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_failed_sync_is_fatal_even_when_polling() {
        let options = LoopbackOptions {
            fail_sync_after: Some(0),
            ..Default::default()
        };
        let mut rig = Rig::new(options.with_latency(0), 2);
        rig.submit(0);
        let err = rig.wait(Duration::ZERO).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(rig.tasks.in_flight(), 1);
    }
}
