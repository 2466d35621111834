// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::EncoderSession;
use crate::codec::{CodecKind, RateControlParams};
use crate::config::{ChangeKind, EncoderSettings};
use crate::error::{EncoderError, HwError, Result};
use crate::format::VideoFormat;
use crate::hw::{DeviceContext, HardwareSession, RawBitstream, SessionParams};
use crate::pool::SurfacePool;
use crate::submit::{FrameSubmitter, RetryPolicy};

/// Consecutive B-frames requested when B-frames are enabled.
const BFRAMES: u16 = 2;

/// Creates, reconfigures and destroys hardware sessions on one device.
pub struct SessionManager {
    device: Arc<DeviceContext>,
}

impl SessionManager {
    pub fn new(device: Arc<DeviceContext>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    /// Negotiate parameters, initialize a hardware session and size its pools.
    ///
    /// Nothing stays allocated on failure.
    pub fn create(
        &self,
        codec: CodecKind,
        format: &VideoFormat,
        settings: &EncoderSettings,
    ) -> Result<EncoderSession> {
        format.validate()?;
        settings.validate()?;

        let proposal = self.propose(codec, format, settings)?;
        let mut hw = self.device.open_session(codec)?;

        let built = Self::negotiate(hw.as_mut(), &proposal)
            .and_then(|params| Self::allocate_surfaces(hw.as_mut(), params));
        let (params, surfaces) = match built {
            Ok(built) => built,
            Err(e) => {
                if let Err(close_err) = hw.close() {
                    tracing::warn!(
                        "[SessionManager] Failed to close rejected session: {}",
                        close_err
                    );
                }
                tracing::error!(
                    "[SessionManager] Failed to create {} session on '{}': {}",
                    codec,
                    self.device.name(),
                    e
                );
                return Err(e);
            }
        };

        log_session_params(&params, settings, surfaces.capacity());

        let retry = RetryPolicy::default()
            .with_deadline(std::time::Duration::from_millis(settings.completion_timeout_ms));
        Ok(EncoderSession::from_parts(
            Arc::clone(&self.device),
            hw,
            *format,
            settings.clone(),
            params,
            surfaces,
            FrameSubmitter::new(retry),
        ))
    }

    /// Apply `format` and `settings` to `session`.
    ///
    /// Rate-control-only changes are pushed to the live session. Anything
    /// else drains the session (handing outputs to `on_complete`), builds a
    /// replacement and closes the old one. If the replacement cannot be
    /// built the drained session is left in place and the error returned.
    /// Once the replacement is installed, errors closing the old session are
    /// only logged.
    pub fn reconfigure(
        &self,
        session: &mut EncoderSession,
        format: &VideoFormat,
        settings: &EncoderSettings,
        on_complete: &mut dyn FnMut(&RawBitstream),
    ) -> Result<ChangeKind> {
        format.validate()?;
        settings.validate()?;

        let kind = if format != session.format() {
            ChangeKind::Hard
        } else {
            session.settings().classify_change(settings)
        };

        match kind {
            ChangeKind::None => {}
            ChangeKind::Soft => session.update_rate_control(settings)?,
            ChangeKind::Hard => {
                let drained = session.drain_all(on_complete)?;
                tracing::info!(
                    session = %session.id(),
                    "[SessionManager] Hard reconfiguration, {} outputs drained",
                    drained
                );

                let replacement = self.create(session.codec(), format, settings)?;
                let old = std::mem::replace(session, replacement);
                let old_id = old.id();
                // The replacement is live; a failed close of the drained
                // session must not undo the switch.
                if let Err(e) = self.destroy(old) {
                    tracing::warn!(
                        session = %old_id,
                        "[SessionManager] Replaced session reported on close: {}",
                        e
                    );
                }
            }
        }
        Ok(kind)
    }

    /// Drain and close `session`. In-flight output is discarded.
    pub fn destroy(&self, session: EncoderSession) -> Result<()> {
        session.close()
    }

    fn propose(
        &self,
        codec: CodecKind,
        format: &VideoFormat,
        settings: &EncoderSettings,
    ) -> Result<SessionParams> {
        let profile = codec.resolve_profile(settings.profile, format.pixel_format)?;

        let bframes = if settings.use_bframes && profile.allows_bframes() {
            BFRAMES
        } else {
            0
        };
        // The fixed-function path cannot produce B-frames.
        let low_power = settings.low_power && bframes == 0;

        let mut rate = RateControlParams::from_settings(settings);
        if low_power && rate.lookahead_depth > 0 {
            tracing::debug!("[SessionManager] Look-ahead disabled on the low-power path");
            rate.lookahead_depth = 0;
        }

        Ok(SessionParams {
            codec,
            profile,
            width: format.width,
            height: format.height,
            surface_format: format.pixel_format.surface_format(),
            range: format.range,
            color_space: format.color_space,
            fps: format.fps,
            rate,
            gop_frames: format.fps.frames_in(settings.keyframe_interval_secs),
            bframes,
            async_depth: settings.async_depth,
            low_power,
            device_surfaces: self.device.supports_device_surfaces(),
            buffer_size_kb: 0,
        })
    }

    /// Query, then commit. A rejected low-power request is retried once on
    /// the standard path.
    fn negotiate(hw: &mut dyn HardwareSession, proposal: &SessionParams) -> Result<SessionParams> {
        match Self::try_negotiate(hw, proposal) {
            Ok(params) => Ok(params),
            Err(HwError::Incompatible(reason)) if proposal.low_power => {
                tracing::warn!(
                    "[SessionManager] Low-power encoding rejected ({}), retrying on the standard path",
                    reason
                );
                let mut fallback = proposal.clone();
                fallback.low_power = false;
                fallback.rate.lookahead_depth = 0;

                Self::try_negotiate(hw, &fallback).map_err(|e| {
                    tracing::warn!(
                        "[SessionManager] Standard encode path also rejected: {}",
                        e
                    );
                    EncoderError::from(e)
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_negotiate(
        hw: &mut dyn HardwareSession,
        proposal: &SessionParams,
    ) -> std::result::Result<SessionParams, HwError> {
        let corrected = hw.query(proposal)?;
        if corrected.async_depth != proposal.async_depth {
            tracing::debug!(
                "[SessionManager] Async depth corrected from {} to {}",
                proposal.async_depth,
                corrected.async_depth
            );
        }
        hw.init(&corrected)?;
        hw.video_param()
    }

    /// Size and allocate the surface pool: the hardware's suggestion plus
    /// one surface per async slot.
    fn allocate_surfaces(
        hw: &mut dyn HardwareSession,
        params: SessionParams,
    ) -> Result<(SessionParams, SurfacePool)> {
        if params.async_depth == 0 {
            return Err(EncoderError::ParameterRejected(
                "hardware reported an async depth of 0".to_string(),
            ));
        }

        let request = hw.query_surfaces(&params)?;
        let count = request.suggested.max(request.min) as usize + params.async_depth as usize;
        let info = params.surface_info();

        let surfaces = if params.device_surfaces {
            let ids = hw.allocate_surfaces(&info, count)?;
            SurfacePool::device(info, &ids)
        } else {
            SurfacePool::host(info, count)
        };
        Ok((params, surfaces))
    }
}

fn log_session_params(params: &SessionParams, settings: &EncoderSettings, surfaces: usize) {
    tracing::info!(
        "[SessionManager] {} session: {}x{} {} @ {} fps, profile {:?}",
        params.codec,
        params.width,
        params.height,
        params.surface_format,
        params.fps,
        params.profile
    );
    tracing::info!(
        "[SessionManager] rate control {:?}: target {} kbps, max {} kbps, quality {:.2}, lookahead {}",
        params.rate.mode,
        params.rate.target_kbps,
        params.rate.max_kbps,
        params.rate.quality,
        params.rate.lookahead_depth
    );
    if let Some(limit) = params.rate.limit {
        tracing::info!(
            "[SessionManager] data rate limit: {} bytes per {:.1} s",
            limit.bytes,
            limit.window_secs
        );
    }
    tracing::info!(
        "[SessionManager] keyint {} frames ({} s), b-frames {}, low power {}, async depth {}, surfaces {} ({})",
        params.gop_frames,
        settings.keyframe_interval_secs,
        params.bframes,
        params.low_power,
        params.async_depth,
        surfaces,
        if params.device_surfaces { "device" } else { "host" }
    );
    tracing::debug!(
        "[SessionManager] output buffer {} KB, range {:?}, color space {:?}",
        params.buffer_size_kb,
        params.range,
        params.color_space
    );
}
