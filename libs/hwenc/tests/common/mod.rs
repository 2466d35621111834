// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use hwenc::hw::loopback::{LoopbackDevice, LoopbackMonitor, LoopbackOptions};
use hwenc::{
    CodecKind, DeviceContext, EncodedPacket, Encoder, EncoderSettings, PixelFormat, PlanarFrame,
    Rational, Result, VideoFormat,
};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

pub fn device(options: LoopbackOptions) -> (Arc<DeviceContext>, LoopbackMonitor) {
    let device = LoopbackDevice::new(options);
    let monitor = device.monitor();
    (DeviceContext::new(device), monitor)
}

pub fn format() -> VideoFormat {
    VideoFormat::new(WIDTH, HEIGHT, PixelFormat::Nv12).with_fps(Rational::new(30, 1))
}

pub fn encoder(
    options: LoopbackOptions,
    codec: CodecKind,
    settings: EncoderSettings,
) -> (Encoder, LoopbackMonitor) {
    let (device, monitor) = device(options);
    let encoder = Encoder::create(device, codec, format(), settings).expect("encoder creation");
    (encoder, monitor)
}

/// Host planes for one NV12 frame of the given size.
pub struct Nv12Planes {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
    pub chroma: Vec<u8>,
}

impl Nv12Planes {
    pub fn new(width: u32, height: u32, seed: u8) -> Self {
        let w = width as usize;
        let h = height as usize;
        Self {
            width,
            height,
            luma: (0..w * h).map(|i| (i as u8).wrapping_add(seed)).collect(),
            chroma: vec![128; w * h.div_ceil(2)],
        }
    }

    pub fn frame(&self) -> PlanarFrame<'_> {
        PlanarFrame::new(PixelFormat::Nv12, self.width, self.height)
            .with_plane(&self.luma, self.width as usize)
            .with_plane(&self.chroma, self.width as usize)
    }
}

/// Encode `count` frames starting at `first_pts`, collecting returned packets.
pub fn encode_frames(
    encoder: &mut Encoder,
    first_pts: i64,
    count: usize,
) -> Result<Vec<EncodedPacket>> {
    let format = *encoder.format().expect("initialized encoder");
    let planes = Nv12Planes::new(format.width, format.height, 7);
    let mut packets = Vec::new();
    for i in 0..count {
        if let Some(packet) = encoder.encode(planes.frame().into(), first_pts + i as i64)? {
            packets.push(packet);
        }
    }
    Ok(packets)
}

/// Encode `count` frames and flush.
pub fn encode_all(encoder: &mut Encoder, count: usize) -> Result<Vec<EncodedPacket>> {
    let mut packets = encode_frames(encoder, 0, count)?;
    packets.extend(encoder.flush()?);
    Ok(packets)
}

/// Number of 4-byte start codes in `data`.
pub fn count_long_start_codes(data: &[u8]) -> usize {
    data.windows(4).filter(|w| *w == [0u8, 0, 0, 1]).count()
}
