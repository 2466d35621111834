// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame submission: load a frame into a pooled surface and queue it.

use std::time::{Duration, Instant};

use crate::error::{EncoderError, HwError, Result};
use crate::format::PixelFormat;
use crate::hw::{HardwareSession, Surface, SyncPoint};

// ============================================================================
// FRAME INPUT
// ============================================================================

/// CPU-resident planar frame with per-plane strides.
#[derive(Debug, Clone)]
pub struct PlanarFrame<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<&'a [u8]>,
    pub strides: Vec<usize>,
}

impl<'a> PlanarFrame<'a> {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            planes: Vec::with_capacity(3),
            strides: Vec::with_capacity(3),
        }
    }

    /// Append the next plane (luma first).
    pub fn with_plane(mut self, data: &'a [u8], stride: usize) -> Self {
        self.planes.push(data);
        self.strides.push(stride);
        self
    }

    /// Check plane count, strides and buffer lengths against the format.
    pub fn validate(&self) -> Result<()> {
        let layouts = self.format.plane_layouts(self.width, self.height);
        if self.planes.len() != layouts.len() || self.strides.len() != layouts.len() {
            return Err(EncoderError::InvalidFrame(format!(
                "{} frame needs {} planes, got {}",
                self.format,
                layouts.len(),
                self.planes.len()
            )));
        }

        for (i, layout) in layouts.iter().enumerate() {
            let stride = self.strides[i];
            if stride < layout.line_size {
                return Err(EncoderError::InvalidFrame(format!(
                    "plane {} stride {} shorter than line size {}",
                    i, stride, layout.line_size
                )));
            }
            let needed = layout.required_len(stride);
            if self.planes[i].len() < needed {
                return Err(EncoderError::InvalidFrame(format!(
                    "plane {} has {} bytes, needs {}",
                    i,
                    self.planes[i].len(),
                    needed
                )));
            }
        }
        Ok(())
    }
}

/// Shared device texture, copied hardware-to-hardware under a keyed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFrame {
    pub handle: u64,
    /// Key the producer released the texture with.
    pub acquire_key: u64,
    /// Key to release the texture with after the copy.
    pub release_key: u64,
}

/// One upstream frame.
#[derive(Debug, Clone)]
pub enum FrameInput<'a> {
    Planar(PlanarFrame<'a>),
    Texture(TextureFrame),
}

impl<'a> From<PlanarFrame<'a>> for FrameInput<'a> {
    fn from(frame: PlanarFrame<'a>) -> Self {
        FrameInput::Planar(frame)
    }
}

impl From<TextureFrame> for FrameInput<'_> {
    fn from(frame: TextureFrame) -> Self {
        FrameInput::Texture(frame)
    }
}

// ============================================================================
// PLANE COPY
// ============================================================================

fn copy_plane(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    line_size: usize,
    rows: usize,
) {
    for row in 0..rows {
        let d = row * dst_pitch;
        let s = row * src_pitch;
        dst[d..d + line_size].copy_from_slice(&src[s..s + line_size]);
    }
}

/// Interleave planar U and V rows into a bi-planar UV plane.
fn interleave_chroma(
    dst: &mut [u8],
    dst_pitch: usize,
    u: &[u8],
    v: &[u8],
    src_pitch: usize,
    width: usize,
    rows: usize,
) {
    for row in 0..rows {
        let d = &mut dst[row * dst_pitch..row * dst_pitch + width * 2];
        let u_row = &u[row * src_pitch..row * src_pitch + width];
        let v_row = &v[row * src_pitch..row * src_pitch + width];
        for (x, pair) in d.chunks_exact_mut(2).enumerate() {
            pair[0] = u_row[x];
            pair[1] = v_row[x];
        }
    }
}

/// Copy `frame` into the host planes of `surface`, row by row.
pub fn load_planar(frame: &PlanarFrame<'_>, surface: &mut Surface) -> Result<()> {
    frame.validate()?;

    let info = surface.info;
    if frame.format.surface_format() != info.format {
        return Err(EncoderError::InvalidFrame(format!(
            "{} frame cannot be loaded into a {} surface",
            frame.format, info.format
        )));
    }
    if frame.width != info.crop_width || frame.height != info.crop_height {
        return Err(EncoderError::InvalidFrame(format!(
            "frame is {}x{}, session expects {}x{}",
            frame.width, frame.height, info.crop_width, info.crop_height
        )));
    }

    let pitch = info.pitch();
    let layouts = frame.format.plane_layouts(frame.width, frame.height);
    let [luma, chroma] = &mut surface.planes;

    copy_plane(
        luma,
        pitch,
        frame.planes[0],
        frame.strides[0],
        layouts[0].line_size,
        layouts[0].rows,
    );

    match frame.format {
        PixelFormat::I420 => {
            if frame.strides[1] != frame.strides[2] {
                return Err(EncoderError::InvalidFrame(
                    "I420 chroma planes must share a stride".to_string(),
                ));
            }
            interleave_chroma(
                chroma,
                pitch,
                frame.planes[1],
                frame.planes[2],
                frame.strides[1],
                layouts[1].line_size,
                layouts[1].rows,
            );
        }
        _ => copy_plane(
            chroma,
            pitch,
            frame.planes[1],
            frame.strides[1],
            layouts[1].line_size,
            layouts[1].rows,
        ),
    }
    Ok(())
}

// ============================================================================
// BUSY RETRY
// ============================================================================

/// Bounded retry with exponential backoff for transient busy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total time spent retrying before giving up with a timeout.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            deadline: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sleep before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run `op` until it stops answering [`HwError::Busy`].
    ///
    /// Returns the value and the number of busy retries. Any other error is
    /// returned immediately.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> std::result::Result<T, HwError>,
    ) -> Result<(T, u32)> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok((value, attempt)),
                Err(HwError::Busy) => {
                    if started.elapsed() >= self.deadline {
                        tracing::error!(
                            "[Submitter] Device still busy after {} retries over {:?}",
                            attempt,
                            self.deadline
                        );
                        return Err(EncoderError::Timeout(self.deadline.as_millis() as u64));
                    }
                    std::thread::sleep(self.delay_for(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ============================================================================
// SUBMITTER
// ============================================================================

/// Loads frames into surfaces and queues them on the hardware.
pub struct FrameSubmitter {
    retry: RetryPolicy,
}

impl FrameSubmitter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Load `frame` into `surface`, stamp it with `pts` and queue it.
    ///
    /// Returns the completion token and how many busy retries it took.
    pub fn submit(
        &self,
        hw: &mut dyn HardwareSession,
        surface: &mut Surface,
        frame: &FrameInput<'_>,
        pts: i64,
        output_capacity: usize,
    ) -> Result<(SyncPoint, u32)> {
        match frame {
            FrameInput::Planar(planar) => {
                load_planar(planar, surface)?;
                if let Some(id) = surface.device_id {
                    hw.write_surface(id, &surface.planes)?;
                }
            }
            FrameInput::Texture(texture) => {
                let id = surface.device_id.ok_or_else(|| {
                    EncoderError::NotSupported(
                        "texture input requires device-resident surfaces".to_string(),
                    )
                })?;
                hw.copy_texture(
                    id,
                    texture.handle,
                    texture.acquire_key,
                    texture.release_key,
                )?;
            }
        }

        surface.timestamp = pts;

        let surface = &*surface;
        let (point, retries) = self
            .retry
            .run(|| hw.encode_async(surface, output_capacity))?;

        if retries > 0 {
            tracing::trace!(pts, retries, "[Submitter] Accepted after busy retries");
        }
        Ok((point, retries))
    }
}
