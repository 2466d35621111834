// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use serde::Serialize;

use super::{DeviceSurfaceId, RawBitstream, Surface, SurfaceInfo};
use crate::codec::{CodecKind, Profile, RateControlParams};
use crate::error::HwError;
use crate::format::{ColorSpace, PixelFormat, Rational, VideoRange, align16};

/// Opaque completion token returned by [`HardwareSession::encode_async`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncPoint(pub u64);

/// Surface counts reported by the hardware for a parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub min: u16,
    pub suggested: u16,
}

/// Video parameters proposed to and reported by a hardware session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionParams {
    pub codec: CodecKind,
    pub profile: Profile,
    /// Visible frame size.
    pub width: u32,
    pub height: u32,
    pub surface_format: PixelFormat,
    pub range: VideoRange,
    pub color_space: ColorSpace,
    pub fps: Rational,
    pub rate: RateControlParams,
    /// Frames between IDRs; 0 leaves it to the hardware.
    pub gop_frames: u32,
    /// Consecutive B-frames; 0 disables them.
    pub bframes: u16,
    pub async_depth: u16,
    pub low_power: bool,
    pub device_surfaces: bool,
    /// Output buffer size reported after init; 0 before.
    pub buffer_size_kb: u32,
}

impl SessionParams {
    pub fn surface_info(&self) -> SurfaceInfo {
        SurfaceInfo {
            format: self.surface_format,
            width: align16(self.width),
            height: align16(self.height),
            crop_width: self.width,
            crop_height: self.height,
        }
    }

    /// Bytes each task's output buffer is allocated with.
    pub fn output_buffer_bytes(&self) -> usize {
        self.buffer_size_kb as usize * 1000
    }
}

/// One hardware encode session.
///
/// Mirrors the query/init/submit/sync shape of vendor media SDKs. All calls
/// happen on the encoder's submission thread.
pub trait HardwareSession: Send {
    /// Validate `params`, returning the hardware-corrected set. Rejection of
    /// a requested mode is reported as [`HwError::Incompatible`].
    fn query(&mut self, params: &SessionParams) -> Result<SessionParams, HwError>;

    fn query_surfaces(&mut self, params: &SessionParams) -> Result<SurfaceRequest, HwError>;

    fn init(&mut self, params: &SessionParams) -> Result<(), HwError>;

    /// Parameters actually in effect after [`init`](Self::init).
    fn video_param(&self) -> Result<SessionParams, HwError>;

    fn allocate_surfaces(
        &mut self,
        info: &SurfaceInfo,
        count: usize,
    ) -> Result<Vec<DeviceSurfaceId>, HwError>;

    fn free_surfaces(&mut self, ids: &[DeviceSurfaceId]) -> Result<(), HwError>;

    /// Upload host planes into a device surface.
    fn write_surface(&mut self, id: DeviceSurfaceId, planes: &[Vec<u8>; 2])
    -> Result<(), HwError>;

    /// Copy a shared texture into a device surface. The texture is acquired
    /// with `acquire_key` and released with `release_key`.
    fn copy_texture(
        &mut self,
        id: DeviceSurfaceId,
        handle: u64,
        acquire_key: u64,
        release_key: u64,
    ) -> Result<(), HwError>;

    /// Queue `surface` for encoding. Returns immediately.
    fn encode_async(
        &mut self,
        surface: &Surface,
        output_capacity: usize,
    ) -> Result<SyncPoint, HwError>;

    /// Wait up to `timeout` for `point` and write its output into `out`.
    ///
    /// A zero timeout polls: [`HwError::InExecution`] means not finished yet.
    fn sync(
        &mut self,
        point: SyncPoint,
        timeout: Duration,
        out: &mut RawBitstream,
    ) -> Result<(), HwError>;

    fn set_rate_control(&mut self, rate: &RateControlParams) -> Result<(), HwError>;

    /// Rate control currently in effect.
    fn rate_control(&self) -> RateControlParams;

    fn close(&mut self) -> Result<(), HwError>;
}
