// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Caller-facing encoder.
//!
//! Owns one hardware session at a time and turns each submitted frame into
//! at most one Annex B packet. Fatal hardware failures destroy the session;
//! per-sample failures only drop that sample.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::bitstream::AnnexBNormalizer;
use crate::codec::CodecKind;
use crate::config::{ChangeKind, EncoderSettings};
use crate::error::{EncoderError, Result};
use crate::format::{Rational, VideoFormat};
use crate::hw::{DeviceContext, RawBitstream};
use crate::packet::EncodedPacket;
use crate::session::{EncoderSession, SessionId, SessionManager};
use crate::submit::FrameInput;

/// Frames DTS is shifted back by when B-frames are enabled.
const DTS_OFFSET_FRAMES: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EncoderState {
    Uninitialized,
    Ready,
    Reconfiguring,
    Destroyed,
}

/// Counters over the encoder's lifetime, across hard reconfigurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncoderStats {
    pub frames_submitted: u64,
    pub packets_emitted: u64,
    /// Submissions that had to wait for a completion to free a slot.
    pub drain_waits: u64,
    pub busy_retries: u64,
    /// Samples lost to malformed output or an undersized buffer.
    pub dropped_samples: u64,
    pub soft_reconfigurations: u64,
    pub hard_reconfigurations: u64,
    /// Samples normalized with the assumed parameter-set layout.
    pub parameter_set_fallbacks: u64,
}

/// Turns drained hardware output into packets.
struct PacketSink {
    normalizer: AnnexBNormalizer,
    ready: VecDeque<EncodedPacket>,
    fps: Rational,
    bframes: bool,
    stats: EncoderStats,
    retired_fallbacks: u64,
}

impl PacketSink {
    fn new(codec: CodecKind) -> Self {
        Self {
            normalizer: AnnexBNormalizer::new(codec),
            ready: VecDeque::new(),
            fps: Rational::default(),
            bframes: false,
            stats: EncoderStats::default(),
            retired_fallbacks: 0,
        }
    }

    /// Start collecting for a new session. Cached parameter sets belong to
    /// the old one and are dropped.
    fn restart(&mut self, session: &EncoderSession) {
        self.retired_fallbacks += self.normalizer.fallback_count();
        self.normalizer = AnnexBNormalizer::new(session.codec());
        self.fps = session.params().fps;
        self.bframes = session.params().bframes > 0;
    }

    fn accept(&mut self, raw: &RawBitstream) {
        let sample = match self.normalizer.to_self_delimited(raw) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.dropped_samples += 1;
                tracing::warn!("[Encoder] Dropped sample at pts {}: {}", raw.pts, e);
                return;
            }
        };

        if sample.data.is_empty() {
            tracing::debug!("[Encoder] Empty output at pts {}", raw.pts);
            return;
        }
        if sample.captured_parameter_sets {
            tracing::info!(
                "[Encoder] Captured {} bytes of parameter sets",
                self.normalizer.extra_data().len()
            );
        }

        let dts = match raw.dts {
            Some(dts) if self.bframes => dts - DTS_OFFSET_FRAMES,
            Some(dts) => dts,
            None => raw.pts,
        };

        tracing::trace!(
            pts = raw.pts,
            dts,
            keyframe = sample.keyframe,
            bytes = sample.data.len(),
            "[Encoder] Packet ready"
        );

        self.stats.packets_emitted += 1;
        self.ready.push_back(EncodedPacket {
            data: Bytes::from(sample.data),
            pts: raw.pts,
            dts,
            keyframe: sample.keyframe,
            priority: sample.priority,
            fps: self.fps,
        });
    }
}

pub struct Encoder {
    state: EncoderState,
    codec: CodecKind,
    manager: SessionManager,
    session: Option<EncoderSession>,
    sink: PacketSink,
    format: Option<VideoFormat>,
    settings: EncoderSettings,
    last_error: Option<String>,
}

impl Encoder {
    /// An encoder bound to `device`, not yet initialized.
    pub fn new(device: Arc<DeviceContext>, codec: CodecKind) -> Self {
        Self {
            state: EncoderState::Uninitialized,
            codec,
            manager: SessionManager::new(device),
            session: None,
            sink: PacketSink::new(codec),
            format: None,
            settings: EncoderSettings::default(),
            last_error: None,
        }
    }

    /// Create and initialize in one step.
    pub fn create(
        device: Arc<DeviceContext>,
        codec: CodecKind,
        format: VideoFormat,
        settings: EncoderSettings,
    ) -> Result<Self> {
        let mut encoder = Self::new(device, codec);
        encoder.initialize(format, settings)?;
        Ok(encoder)
    }

    /// Open the hardware session. On failure the encoder is destroyed and
    /// [`last_error`](Self::last_error) holds a message for the user.
    pub fn initialize(&mut self, format: VideoFormat, settings: EncoderSettings) -> Result<()> {
        if self.state != EncoderState::Uninitialized {
            return Err(EncoderError::InvalidState(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        match self.manager.create(self.codec, &format, &settings) {
            Ok(session) => {
                tracing::info!(
                    session = %session.id(),
                    "[Encoder] {} encoder ready on '{}'",
                    self.codec,
                    self.manager.device().name()
                );
                self.sink.restart(&session);
                self.session = Some(session);
                self.format = Some(format);
                self.settings = settings;
                self.state = EncoderState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!("[Encoder] Failed to initialize {} encoder: {}", self.codec, e);
                self.last_error = Some(e.user_message());
                self.state = EncoderState::Destroyed;
                Err(e)
            }
        }
    }

    /// Submit one frame with presentation timestamp `pts` (frame-count units).
    ///
    /// Returns the next packet if one is ready. A sample lost to malformed
    /// output or an undersized buffer yields `Ok(None)`.
    pub fn encode(&mut self, frame: FrameInput<'_>, pts: i64) -> Result<Option<EncodedPacket>> {
        self.ensure_ready()?;

        match self.submit_and_collect(&frame, pts) {
            Ok(()) => {}
            Err(e) if e.is_per_sample() => {
                self.sink.stats.dropped_samples += 1;
                tracing::warn!("[Encoder] Dropped frame at pts {}: {}", pts, e);
            }
            Err(e) => return Err(self.fail(e)),
        }
        Ok(self.sink.ready.pop_front())
    }

    fn submit_and_collect(&mut self, frame: &FrameInput<'_>, pts: i64) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| EncoderError::InvalidState("no active session".to_string()))?;
        let sink = &mut self.sink;

        let report = session.submit(frame, pts, &mut |raw: &RawBitstream| sink.accept(raw))?;
        sink.stats.frames_submitted += 1;
        sink.stats.drain_waits += report.drain_waits as u64;
        sink.stats.busy_retries += report.busy_retries as u64;

        if sink.ready.is_empty() {
            if let Some(raw) = session.poll()? {
                sink.accept(raw);
            }
        }
        Ok(())
    }

    /// Apply new settings to the current format.
    pub fn update(&mut self, settings: EncoderSettings) -> Result<ChangeKind> {
        let format = self
            .format
            .ok_or_else(|| EncoderError::InvalidState("encoder not initialized".to_string()))?;
        self.reconfigure(format, settings)
    }

    /// Apply a new format and settings.
    ///
    /// Rate-control-only changes keep the session. Anything else drains the
    /// session (its packets stay queued) and replaces it, resetting
    /// [`extra_data`](Self::extra_data) until the next keyframe.
    pub fn reconfigure(
        &mut self,
        format: VideoFormat,
        settings: EncoderSettings,
    ) -> Result<ChangeKind> {
        self.ensure_ready()?;
        let Some(session) = self.session.as_mut() else {
            return Err(EncoderError::InvalidState("no active session".to_string()));
        };

        self.state = EncoderState::Reconfiguring;
        let sink = &mut self.sink;
        let result = self.manager.reconfigure(
            session,
            &format,
            &settings,
            &mut |raw: &RawBitstream| sink.accept(raw),
        );
        self.state = EncoderState::Ready;

        let kind = match result {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("[Encoder] Reconfiguration failed: {}", e);
                return Err(self.fail(e));
            }
        };

        match kind {
            ChangeKind::None => {}
            ChangeKind::Soft => self.sink.stats.soft_reconfigurations += 1,
            ChangeKind::Hard => {
                self.sink.stats.hard_reconfigurations += 1;
                if let Some(session) = &self.session {
                    self.sink.restart(session);
                }
            }
        }
        self.format = Some(format);
        self.settings = settings;
        Ok(kind)
    }

    /// Wait for every in-flight frame and return all queued packets.
    pub fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        self.ensure_ready()?;

        let result = match self.session.as_mut() {
            Some(session) => {
                let sink = &mut self.sink;
                session.drain_all(&mut |raw: &RawBitstream| sink.accept(raw))
            }
            None => Ok(0),
        };
        if let Err(e) = result {
            return Err(self.fail(e));
        }
        Ok(self.sink.ready.drain(..).collect())
    }

    /// Parameter sets of the current session, Annex B framed. Empty until
    /// the first keyframe has been produced.
    pub fn extra_data(&self) -> &[u8] {
        self.sink.normalizer.extra_data()
    }

    /// Drain and release the session. Queued packets are discarded.
    pub fn destroy(&mut self) {
        if self.state == EncoderState::Destroyed {
            return;
        }
        self.teardown();
        self.sink.ready.clear();
        self.state = EncoderState::Destroyed;
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn format(&self) -> Option<&VideoFormat> {
        self.format.as_ref()
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(EncoderSession::id)
    }

    pub fn session(&self) -> Option<&EncoderSession> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> EncoderStats {
        let mut stats = self.sink.stats.clone();
        stats.parameter_set_fallbacks =
            self.sink.retired_fallbacks + self.sink.normalizer.fallback_count();
        stats
    }

    /// User-facing message for the failure that stopped the encoder, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            EncoderState::Ready => Ok(()),
            EncoderState::Uninitialized => Err(EncoderError::InvalidState(
                "encoder not initialized".to_string(),
            )),
            EncoderState::Reconfiguring => Err(EncoderError::InvalidState(
                "encoder is reconfiguring".to_string(),
            )),
            EncoderState::Destroyed => Err(EncoderError::InvalidState(
                self.last_error
                    .clone()
                    .unwrap_or_else(|| "encoder destroyed".to_string()),
            )),
        }
    }

    /// Record `error`; fatal ones tear the session down.
    fn fail(&mut self, error: EncoderError) -> EncoderError {
        if error.is_fatal() {
            tracing::error!("[Encoder] Fatal hardware error: {}", error);
            if let Some(session) = &self.session {
                match serde_json::to_string_pretty(session.params()) {
                    Ok(dump) => tracing::error!("[Encoder] Session parameters:\n{}", dump),
                    Err(e) => tracing::debug!("[Encoder] Could not serialize parameters: {}", e),
                }
            }
            self.abort();
            self.state = EncoderState::Destroyed;
        }
        self.last_error = Some(error.user_message());
        error
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id();
            if let Err(e) = self.manager.destroy(session) {
                tracing::warn!(session = %id, "[Encoder] Session teardown reported: {}", e);
            }
        }
    }

    /// Release the session without waiting on hardware that already failed.
    fn abort(&mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id();
            if let Err(e) = session.abort() {
                tracing::warn!(session = %id, "[Encoder] Session abort reported: {}", e);
            }
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.destroy();
    }
}
