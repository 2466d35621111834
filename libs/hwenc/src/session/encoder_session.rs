// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::codec::{CodecKind, RateControlParams};
use crate::config::EncoderSettings;
use crate::drain::CompletionDrain;
use crate::error::{EncoderError, Result};
use crate::format::VideoFormat;
use crate::hw::{DeviceContext, HardwareSession, RawBitstream, SessionParams};
use crate::pool::{PoolStats, SurfacePool, TaskPool};
use crate::submit::{FrameInput, FrameSubmitter};

/// Unique identity of one hardware session.
///
/// A soft reconfiguration keeps the id; a hard one produces a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work done on behalf of one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Completions drained to free a surface or task first.
    pub drain_waits: u32,
    /// Busy answers retried before the hardware accepted the frame.
    pub busy_retries: u32,
}

/// An initialized hardware session and the pools sized for it.
pub struct EncoderSession {
    id: SessionId,
    device: Arc<DeviceContext>,
    hw: Box<dyn HardwareSession>,
    format: VideoFormat,
    settings: EncoderSettings,
    params: SessionParams,
    surfaces: SurfacePool,
    tasks: TaskPool,
    drain: CompletionDrain,
    submitter: FrameSubmitter,
    completion_timeout: Duration,
    closed: bool,
}

impl EncoderSession {
    pub(crate) fn from_parts(
        device: Arc<DeviceContext>,
        hw: Box<dyn HardwareSession>,
        format: VideoFormat,
        settings: EncoderSettings,
        params: SessionParams,
        surfaces: SurfacePool,
        submitter: FrameSubmitter,
    ) -> Self {
        let buffer_bytes = params.output_buffer_bytes();
        Self {
            id: SessionId::new(),
            device,
            hw,
            completion_timeout: Duration::from_millis(settings.completion_timeout_ms),
            format,
            settings,
            tasks: TaskPool::new(params.async_depth as usize, buffer_bytes),
            drain: CompletionDrain::new(buffer_bytes),
            params,
            surfaces,
            submitter,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn codec(&self) -> CodecKind {
        self.params.codec
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Parameters in effect, as reported by the hardware.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn surface_stats(&self) -> PoolStats {
        self.surfaces.stats()
    }

    pub fn task_stats(&self) -> PoolStats {
        self.tasks.stats()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.in_flight()
    }

    /// Submit one frame.
    ///
    /// When no surface or task is free, the oldest completion is drained
    /// first and handed to `on_complete`. On failure the acquired surface and
    /// task go back to their pools.
    pub fn submit(
        &mut self,
        frame: &FrameInput<'_>,
        pts: i64,
        on_complete: &mut dyn FnMut(&RawBitstream),
    ) -> Result<SubmitReport> {
        if self.closed {
            return Err(EncoderError::InvalidState("session is closed".to_string()));
        }

        let mut report = SubmitReport::default();
        let (task, surface) = loop {
            let task = self.tasks.acquire();
            let surface = self.surfaces.acquire();
            if let (Some(task), Some(surface)) = (task, surface) {
                break (task, surface);
            }
            if let Some(task) = task {
                self.tasks.release(task);
            }
            if let Some(surface) = surface {
                self.surfaces.release(surface);
            }

            report.drain_waits += 1;
            tracing::trace!(
                session = %self.id,
                in_flight = self.tasks.in_flight(),
                "[EncoderSession] Pools exhausted, waiting for a completion"
            );

            match self.drain.wait_next(
                self.hw.as_mut(),
                &mut self.tasks,
                &mut self.surfaces,
                self.completion_timeout,
            )? {
                Some(bitstream) => on_complete(bitstream),
                None => {
                    return Err(EncoderError::InvalidState(
                        "no free surface or task and nothing in flight".to_string(),
                    ));
                }
            }
        };

        let output_capacity = self.params.output_buffer_bytes();
        let submitted = self.submitter.submit(
            self.hw.as_mut(),
            self.surfaces.get_mut(surface),
            frame,
            pts,
            output_capacity,
        );

        match submitted {
            Ok((point, busy_retries)) => {
                self.surfaces.mark_in_flight(surface);
                self.tasks.mark_in_flight(task, point, surface);
                report.busy_retries = busy_retries;
                Ok(report)
            }
            Err(e) => {
                self.tasks.release(task);
                self.surfaces.release(surface);
                Err(e)
            }
        }
    }

    /// Collect the oldest completion if it has already finished.
    pub fn poll(&mut self) -> Result<Option<&RawBitstream>> {
        self.drain.wait_next(
            self.hw.as_mut(),
            &mut self.tasks,
            &mut self.surfaces,
            Duration::ZERO,
        )
    }

    /// Wait for every in-flight task, in submission order.
    pub fn drain_all(&mut self, on_complete: &mut dyn FnMut(&RawBitstream)) -> Result<usize> {
        self.drain.drain_all(
            self.hw.as_mut(),
            &mut self.tasks,
            &mut self.surfaces,
            self.completion_timeout,
            on_complete,
        )
    }

    /// Apply new rate control to the live session.
    ///
    /// Some drivers accept the call but keep the old bitrate; that is logged
    /// and the session keeps running with whatever is in effect.
    pub fn update_rate_control(&mut self, settings: &EncoderSettings) -> Result<()> {
        let requested = RateControlParams::from_settings(settings);
        let before = self.hw.rate_control();

        self.hw.set_rate_control(&requested)?;

        let after = self.hw.rate_control();
        if requested.target_kbps != before.target_kbps && after.target_kbps == before.target_kbps
        {
            tracing::warn!(
                session = %self.id,
                "[EncoderSession] Bitrate update to {} kbps did not take effect, still {} kbps",
                requested.target_kbps,
                after.target_kbps
            );
        } else {
            tracing::info!(
                session = %self.id,
                "[EncoderSession] Rate control updated: {:?} {} kbps (max {} kbps)",
                after.mode,
                after.target_kbps,
                after.max_kbps
            );
        }

        self.params.rate = after;
        self.settings = settings.clone();
        Ok(())
    }

    /// Drain, free device surfaces and close the hardware session.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Close without waiting on the hardware. In-flight tasks are abandoned.
    ///
    /// Used once a wait has already failed fatally; another wait on the same
    /// task would block for the full completion timeout again.
    pub fn abort(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let in_flight = self.tasks.in_flight();
        self.drain.abandon_all(&mut self.tasks, &mut self.surfaces);
        let closed = self.release_hardware();
        tracing::warn!(
            session = %self.id,
            "[EncoderSession] Aborted on '{}' ({} in-flight tasks abandoned)",
            self.device.name(),
            in_flight
        );
        closed
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let drained = self.drain.drain_all(
            self.hw.as_mut(),
            &mut self.tasks,
            &mut self.surfaces,
            self.completion_timeout,
            &mut |_: &RawBitstream| {},
        );
        let closed = self.release_hardware();

        match &drained {
            Ok(discarded) => tracing::info!(
                session = %self.id,
                "[EncoderSession] Closed on '{}' ({} pending outputs discarded)",
                self.device.name(),
                discarded
            ),
            Err(e) => tracing::warn!(
                session = %self.id,
                "[EncoderSession] Closed after failed drain: {}",
                e
            ),
        }

        drained?;
        closed
    }

    /// Free device surfaces and close the hardware session. Nothing may be
    /// in flight.
    fn release_hardware(&mut self) -> Result<()> {
        let device_surfaces = self.surfaces.device_ids();
        if !device_surfaces.is_empty() {
            if let Err(e) = self.hw.free_surfaces(&device_surfaces) {
                tracing::warn!(
                    session = %self.id,
                    "[EncoderSession] Failed to free {} device surfaces: {}",
                    device_surfaces.len(),
                    e
                );
            }
        }

        debug_assert_eq!(
            self.tasks.in_flight(),
            0,
            "hardware session closed with tasks in flight"
        );
        self.hw.close()?;
        Ok(())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(
                session = %self.id,
                "[EncoderSession] Error during teardown: {}",
                e
            );
        }
    }
}
