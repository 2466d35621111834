// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Deterministic in-process encode device.
//!
//! Models an asynchronous hardware encoder closely enough to exercise the
//! session, pool and drain logic: bounded async depth, completion latency,
//! transient busy status, length-prefixed output with out-of-band parameter
//! sets, and the failure modes real drivers exhibit. No pixels are compressed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    DeviceSurfaceId, EncodeDevice, FormatDescription, FrameType, HardwareSession, RawBitstream,
    SessionParams, Surface, SurfaceInfo, SurfaceRequest, SyncPoint,
};
use crate::codec::{CodecKind, RateControlParams, avc, hevc};
use crate::error::HwError;

/// Slice priority the loopback writes into AVC headers. Lower than what
/// transports expect, as real hardware does.
const EMITTED_REF_PRIORITY: u8 = 1;

/// GOP length used when the session leaves it to the hardware.
const DEFAULT_GOP_FRAMES: u64 = 250;

/// Behavior knobs for [`LoopbackDevice`].
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    pub name: String,
    /// Surfaces the hardware asks for on top of the async depth.
    pub min_surfaces: u16,
    /// Async depth is clamped to this.
    pub max_async_depth: u16,
    /// Output buffer size reported after init.
    pub buffer_size_kb: u32,
    /// Width of NAL length prefixes: 1, 2 or 4.
    pub nal_length_size: u8,
    /// When false, the parameter-set layout query fails with
    /// [`HwError::InvalidParameter`].
    pub report_layout: bool,
    pub supports_hevc: bool,
    pub reject_low_power: bool,
    pub device_surfaces: bool,
    /// `encode_async` answers [`HwError::Busy`] this many times per frame.
    pub busy_cycles: u32,
    /// A task completes once this many later frames have been submitted.
    pub latency: u32,
    /// Payload bytes per ordinary slice.
    pub slice_bytes: usize,
    /// Every n-th frame gets a length prefix overrunning the buffer.
    pub corrupt_every: Option<u64>,
    /// Every n-th frame does not fit the output buffer.
    pub oversize_every: Option<u64>,
    /// Frames from this index on never complete.
    pub stall_after: Option<u64>,
    /// The device disappears once this many frames were submitted.
    pub lose_device_after: Option<u64>,
    /// Waiting on frames from this index on fails with [`HwError::Failed`].
    pub fail_sync_after: Option<u64>,
    /// Accept rate-control updates without applying them.
    pub ignore_rate_updates: bool,
    pub fail_init: bool,
    /// `close` releases the session but reports an error.
    pub fail_close: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            name: "Loopback".to_string(),
            min_surfaces: 2,
            max_async_depth: 8,
            buffer_size_kb: 512,
            nal_length_size: 4,
            report_layout: true,
            supports_hevc: true,
            reject_low_power: false,
            device_surfaces: false,
            busy_cycles: 0,
            latency: 1,
            slice_bytes: 48,
            corrupt_every: None,
            oversize_every: None,
            stall_after: None,
            lose_device_after: None,
            fail_sync_after: None,
            ignore_rate_updates: false,
            fail_init: false,
            fail_close: false,
        }
    }
}

impl LoopbackOptions {
    pub fn with_nal_length_size(mut self, size: u8) -> Self {
        self.nal_length_size = size;
        self
    }

    pub fn with_latency(mut self, frames: u32) -> Self {
        self.latency = frames;
        self
    }

    pub fn with_busy_cycles(mut self, cycles: u32) -> Self {
        self.busy_cycles = cycles;
        self
    }

    pub fn with_device_surfaces(mut self, enabled: bool) -> Self {
        self.device_surfaces = enabled;
        self
    }

    pub fn rejecting_low_power(mut self) -> Self {
        self.reject_low_power = true;
        self
    }

    pub fn without_layout(mut self) -> Self {
        self.report_layout = false;
        self
    }

    pub fn corrupting_every(mut self, n: u64) -> Self {
        self.corrupt_every = Some(n);
        self
    }

    pub fn oversizing_every(mut self, n: u64) -> Self {
        self.oversize_every = Some(n);
        self
    }

    pub fn stalling_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }

    pub fn losing_device_after(mut self, frames: u64) -> Self {
        self.lose_device_after = Some(frames);
        self
    }
}

/// Resource bookkeeping shared by a device and its sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackCounters {
    pub sessions_opened: u64,
    pub live_sessions: u64,
    pub live_device_surfaces: u64,
    pub frames_submitted: u64,
    pub busy_returned: u64,
    /// `sync` calls made with a non-zero timeout.
    pub blocking_syncs: u64,
    /// Sessions closed while tasks were still in flight.
    pub closed_with_pending: u64,
    /// Sessions dropped without an explicit close.
    pub dropped_without_close: u64,
}

/// Read access to a [`LoopbackDevice`]'s counters after the device has been
/// handed to a [`DeviceContext`](super::DeviceContext).
#[derive(Debug, Clone)]
pub struct LoopbackMonitor(Arc<Mutex<LoopbackCounters>>);

impl LoopbackMonitor {
    pub fn snapshot(&self) -> LoopbackCounters {
        self.0.lock().clone()
    }
}

pub struct LoopbackDevice {
    options: LoopbackOptions,
    counters: Arc<Mutex<LoopbackCounters>>,
}

impl LoopbackDevice {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            counters: Arc::new(Mutex::new(LoopbackCounters::default())),
        }
    }

    pub fn monitor(&self) -> LoopbackMonitor {
        LoopbackMonitor(Arc::clone(&self.counters))
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new(LoopbackOptions::default())
    }
}

impl EncodeDevice for LoopbackDevice {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn supports_device_surfaces(&self) -> bool {
        self.options.device_surfaces
    }

    fn open_session(&self, codec: CodecKind) -> Result<Box<dyn HardwareSession>, HwError> {
        if codec == CodecKind::Hevc && !self.options.supports_hevc {
            return Err(HwError::Unsupported(format!(
                "{} encoding on {}",
                codec, self.options.name
            )));
        }

        {
            let mut counters = self.counters.lock();
            counters.sessions_opened += 1;
            counters.live_sessions += 1;
        }

        Ok(Box::new(LoopbackSession {
            codec,
            options: self.options.clone(),
            counters: Arc::clone(&self.counters),
            params: None,
            rate: None,
            format: None,
            pending: VecDeque::new(),
            next_point: 1,
            submitted: 0,
            busy_left: self.options.busy_cycles,
            last_key: 0,
            surfaces: HashSet::new(),
            next_surface_id: 1,
            texture_keys: HashMap::new(),
            lost: false,
            closed: false,
        }))
    }
}

struct PendingTask {
    point: SyncPoint,
    frame_index: u64,
    sample: RawBitstream,
}

pub struct LoopbackSession {
    codec: CodecKind,
    options: LoopbackOptions,
    counters: Arc<Mutex<LoopbackCounters>>,
    params: Option<SessionParams>,
    rate: Option<RateControlParams>,
    format: Option<Arc<FormatDescription>>,
    pending: VecDeque<PendingTask>,
    next_point: u64,
    /// Frames consumed so far; also the index of the next frame.
    submitted: u64,
    busy_left: u32,
    /// Index of the most recent keyframe.
    last_key: u64,
    surfaces: HashSet<u32>,
    next_surface_id: u32,
    /// Current keyed-mutex value per shared texture.
    texture_keys: HashMap<u64, u64>,
    lost: bool,
    closed: bool,
}

impl LoopbackSession {
    fn ensure_open(&self) -> Result<&SessionParams, HwError> {
        if self.closed {
            return Err(HwError::Failed("session closed".to_string()));
        }
        if self.lost {
            return Err(HwError::DeviceLost("adapter removed".to_string()));
        }
        self.params
            .as_ref()
            .ok_or_else(|| HwError::Failed("session not initialized".to_string()))
    }

    fn parameter_sets(&self, params: &SessionParams) -> Vec<Vec<u8>> {
        let idc = params.profile.profile_idc(self.codec);
        let dims = [
            0x80 | ((params.width >> 7) & 0x7f) as u8,
            0x80 | (params.width & 0x7f) as u8,
            0x80 | ((params.height >> 7) & 0x7f) as u8,
            0x80 | (params.height & 0x7f) as u8,
        ];

        match self.codec {
            CodecKind::Avc => {
                let mut sps = vec![0x60 | avc::NAL_SPS, idc, 0x40, 0x1f];
                sps.extend_from_slice(&dims);
                vec![sps, vec![0x60 | avc::NAL_PPS, 0xce, 0x3c, 0x80]]
            }
            CodecKind::Hevc => {
                let mut sps = vec![hevc::NAL_SPS << 1, 0x01, 0x01, 0x80 | idc];
                sps.extend_from_slice(&dims);
                vec![
                    vec![hevc::NAL_VPS << 1, 0x01, 0x0c, 0x01],
                    sps,
                    vec![hevc::NAL_PPS << 1, 0x01, 0xc1, 0x72],
                ]
            }
        }
    }

    fn frame_type(&mut self, index: u64, gop: u64, bframes: u16) -> FrameType {
        if index == 0 || index - self.last_key >= gop {
            self.last_key = index;
            return FrameType::IDR | FrameType::I | FrameType::REF;
        }
        if bframes > 0 && (index - self.last_key) % 2 == 1 {
            FrameType::B
        } else {
            FrameType::P | FrameType::REF
        }
    }

    fn slice_header(&self, frame_type: FrameType) -> Vec<u8> {
        match self.codec {
            CodecKind::Avc => {
                let priority = if frame_type.contains(FrameType::REF) {
                    EMITTED_REF_PRIORITY
                } else {
                    0
                };
                let nal_type = if frame_type.contains(FrameType::IDR) {
                    avc::NAL_SLICE_IDR
                } else {
                    avc::NAL_SLICE
                };
                vec![(priority << 5) | nal_type]
            }
            CodecKind::Hevc => {
                let nal_type = if frame_type.contains(FrameType::IDR) {
                    hevc::NAL_IDR_W_RADL
                } else if frame_type.contains(FrameType::REF) {
                    hevc::NAL_TRAIL_R
                } else {
                    0
                };
                vec![nal_type << 1, 0x01]
            }
        }
    }

    fn put_unit(&self, out: &mut Vec<u8>, unit: &[u8], declared: usize) {
        match self.options.nal_length_size {
            1 => out.push(declared.min(u8::MAX as usize) as u8),
            2 => out.extend_from_slice(&(declared.min(u16::MAX as usize) as u16).to_be_bytes()),
            _ => out.extend_from_slice(&(declared as u32).to_be_bytes()),
        }
        out.extend_from_slice(unit);
    }

    fn build_sample(&mut self, surface: &Surface, params: &SessionParams) -> RawBitstream {
        let index = self.submitted;
        let gop = if params.gop_frames == 0 {
            DEFAULT_GOP_FRAMES
        } else {
            params.gop_frames as u64
        };
        let frame_type = self.frame_type(index, gop, params.bframes);

        let payload_len = if frame_type.contains(FrameType::IDR) {
            self.options.slice_bytes * 4
        } else {
            self.options.slice_bytes
        };

        let mut unit = self.slice_header(frame_type);
        unit.extend((0..payload_len).map(|k| 0x80 | ((index as usize + k) & 0x7f) as u8));

        let corrupt = self
            .options
            .corrupt_every
            .is_some_and(|n| n > 0 && (index + 1) % n == 0);
        let declared = if corrupt { unit.len() + 16 } else { unit.len() };

        let mut data = Vec::with_capacity(unit.len() + 4);
        self.put_unit(&mut data, &unit, declared);

        RawBitstream {
            data,
            pts: surface.timestamp,
            dts: (params.bframes > 0).then_some(surface.timestamp),
            frame_type,
            format: self.format.clone(),
        }
    }
}

impl HardwareSession for LoopbackSession {
    fn query(&mut self, params: &SessionParams) -> Result<SessionParams, HwError> {
        if self.closed {
            return Err(HwError::Failed("session closed".to_string()));
        }
        if params.low_power && self.options.reject_low_power {
            return Err(HwError::Incompatible(
                "low-power encoding is not available on this adapter".to_string(),
            ));
        }
        if params.device_surfaces && !self.options.device_surfaces {
            return Err(HwError::Unsupported("device-resident surfaces".to_string()));
        }
        if ![1, 2, 4].contains(&self.options.nal_length_size) {
            return Err(HwError::Failed(format!(
                "unsupported NAL length size {}",
                self.options.nal_length_size
            )));
        }

        let mut corrected = params.clone();
        corrected.async_depth = params.async_depth.min(self.options.max_async_depth);
        if corrected.low_power {
            corrected.bframes = 0;
        }
        Ok(corrected)
    }

    fn query_surfaces(&mut self, params: &SessionParams) -> Result<SurfaceRequest, HwError> {
        Ok(SurfaceRequest {
            min: self.options.min_surfaces,
            suggested: self.options.min_surfaces + params.bframes,
        })
    }

    fn init(&mut self, params: &SessionParams) -> Result<(), HwError> {
        if self.options.fail_init {
            return Err(HwError::Failed("encoder init failed".to_string()));
        }

        let mut active = self.query(params)?;
        active.buffer_size_kb = self.options.buffer_size_kb;

        let sets = self.parameter_sets(&active);
        let format = if self.options.report_layout {
            FormatDescription::new(self.options.nal_length_size, sets)
        } else {
            FormatDescription::without_layout(
                HwError::InvalidParameter("parameter set layout unavailable".to_string()),
                sets,
            )
        };

        self.format = Some(Arc::new(format));
        self.rate = Some(active.rate);
        self.params = Some(active);
        Ok(())
    }

    fn video_param(&self) -> Result<SessionParams, HwError> {
        let mut params = self.ensure_open()?.clone();
        if let Some(rate) = self.rate {
            params.rate = rate;
        }
        Ok(params)
    }

    fn allocate_surfaces(
        &mut self,
        _info: &SurfaceInfo,
        count: usize,
    ) -> Result<Vec<DeviceSurfaceId>, HwError> {
        if !self.options.device_surfaces {
            return Err(HwError::Unsupported("device-resident surfaces".to_string()));
        }
        let ids: Vec<DeviceSurfaceId> = (0..count)
            .map(|_| {
                let id = self.next_surface_id;
                self.next_surface_id += 1;
                self.surfaces.insert(id);
                DeviceSurfaceId(id)
            })
            .collect();
        self.counters.lock().live_device_surfaces += count as u64;
        Ok(ids)
    }

    fn free_surfaces(&mut self, ids: &[DeviceSurfaceId]) -> Result<(), HwError> {
        let mut freed = 0;
        for id in ids {
            if self.surfaces.remove(&id.0) {
                freed += 1;
            }
        }
        self.counters.lock().live_device_surfaces -= freed;
        Ok(())
    }

    fn write_surface(
        &mut self,
        id: DeviceSurfaceId,
        _planes: &[Vec<u8>; 2],
    ) -> Result<(), HwError> {
        self.ensure_open()?;
        if !self.surfaces.contains(&id.0) {
            return Err(HwError::InvalidParameter(format!("unknown surface {}", id.0)));
        }
        Ok(())
    }

    fn copy_texture(
        &mut self,
        id: DeviceSurfaceId,
        handle: u64,
        acquire_key: u64,
        release_key: u64,
    ) -> Result<(), HwError> {
        self.ensure_open()?;
        if !self.surfaces.contains(&id.0) {
            return Err(HwError::InvalidParameter(format!("unknown surface {}", id.0)));
        }

        let current = self.texture_keys.get(&handle).copied().unwrap_or(0);
        if current != acquire_key {
            return Err(HwError::Failed(format!(
                "texture {:#x} is held with key {}, acquire requested {}",
                handle, current, acquire_key
            )));
        }
        self.texture_keys.insert(handle, release_key);
        Ok(())
    }

    fn encode_async(
        &mut self,
        surface: &Surface,
        output_capacity: usize,
    ) -> Result<SyncPoint, HwError> {
        let params = self.ensure_open()?.clone();

        if self
            .options
            .lose_device_after
            .is_some_and(|n| self.submitted >= n)
        {
            self.lost = true;
            return Err(HwError::DeviceLost("adapter removed".to_string()));
        }

        if self.busy_left > 0 {
            self.busy_left -= 1;
            self.counters.lock().busy_returned += 1;
            return Err(HwError::Busy);
        }
        self.busy_left = self.options.busy_cycles;

        let oversize = self
            .options
            .oversize_every
            .is_some_and(|n| n > 0 && (self.submitted + 1) % n == 0);
        let sample = self.build_sample(surface, &params);
        let frame_index = self.submitted;
        self.submitted += 1;
        self.counters.lock().frames_submitted += 1;

        if oversize || sample.data.len() > output_capacity {
            return Err(HwError::NotEnoughBuffer {
                needed: sample.data.len().max(output_capacity + 1),
                capacity: output_capacity,
            });
        }

        let point = SyncPoint(self.next_point);
        self.next_point += 1;
        self.pending.push_back(PendingTask {
            point,
            frame_index,
            sample,
        });
        Ok(point)
    }

    fn sync(
        &mut self,
        point: SyncPoint,
        timeout: Duration,
        out: &mut RawBitstream,
    ) -> Result<(), HwError> {
        if !timeout.is_zero() {
            self.counters.lock().blocking_syncs += 1;
        }
        if self.lost {
            return Err(HwError::DeviceLost("adapter removed".to_string()));
        }

        let pos = self
            .pending
            .iter()
            .position(|task| task.point == point)
            .ok_or_else(|| HwError::InvalidParameter(format!("unknown sync point {}", point.0)))?;

        let task = &self.pending[pos];
        if self
            .options
            .fail_sync_after
            .is_some_and(|n| task.frame_index >= n)
        {
            return Err(HwError::Failed(format!(
                "sync on frame {} failed",
                task.frame_index
            )));
        }
        let stalled = self
            .options
            .stall_after
            .is_some_and(|n| task.frame_index >= n);
        let finished = self.submitted - (task.frame_index + 1) >= self.options.latency as u64;

        if stalled {
            return Err(if timeout.is_zero() {
                HwError::InExecution
            } else {
                HwError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                }
            });
        }
        if !finished && timeout.is_zero() {
            return Err(HwError::InExecution);
        }

        let Some(task) = self.pending.remove(pos) else {
            return Err(HwError::InvalidParameter(format!(
                "unknown sync point {}",
                point.0
            )));
        };

        out.clear();
        out.data.extend_from_slice(&task.sample.data);
        out.pts = task.sample.pts;
        out.dts = task.sample.dts;
        out.frame_type = task.sample.frame_type;
        out.format = task.sample.format;
        Ok(())
    }

    fn set_rate_control(&mut self, rate: &RateControlParams) -> Result<(), HwError> {
        self.ensure_open()?;
        if !self.options.ignore_rate_updates {
            self.rate = Some(*rate);
        }
        Ok(())
    }

    fn rate_control(&self) -> RateControlParams {
        match (self.rate, self.params.as_ref()) {
            (Some(rate), _) => rate,
            (None, Some(params)) => params.rate,
            (None, None) => RateControlParams::from_settings(&Default::default()),
        }
    }

    fn close(&mut self) -> Result<(), HwError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut counters = self.counters.lock();
        counters.live_sessions -= 1;
        if !self.pending.is_empty() {
            counters.closed_with_pending += 1;
        }
        self.pending.clear();
        if self.options.fail_close {
            return Err(HwError::Failed("close reported an error".to_string()));
        }
        Ok(())
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if !self.closed {
            self.counters.lock().dropped_without_close += 1;
            let _ = self.close();
        }
    }
}
