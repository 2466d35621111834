// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Drive the encoder with synthetic frames on the loopback device.
//!
//! Usage:
//! ```bash
//! encode-test --frames 300 --width 1280 --height 720 --output out.h264
//! RUST_LOG=hwenc=debug encode-test --codec hevc --config settings.yaml
//! ```

#![allow(clippy::disallowed_macros)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use hwenc::hw::loopback::{LoopbackDevice, LoopbackOptions};
use hwenc::{
    CodecKind, DeviceContext, Encoder, EncoderSettings, PixelFormat, PlanarFrame, Rational,
    VideoFormat,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecArg {
    Avc,
    Hevc,
}

impl From<CodecArg> for CodecKind {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Avc => CodecKind::Avc,
            CodecArg::Hevc => CodecKind::Hevc,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "encode-test")]
#[command(version, about = "Encode synthetic frames on the loopback device")]
struct Args {
    #[arg(long, value_enum, default_value = "avc")]
    codec: CodecArg,

    #[arg(long, default_value = "640")]
    width: u32,

    #[arg(long, default_value = "360")]
    height: u32,

    /// Frames per second (integer)
    #[arg(long, default_value = "30")]
    fps: u32,

    #[arg(long, default_value = "120")]
    frames: u32,

    /// Encoder settings (YAML); defaults are used if missing
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the Annex B stream here
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Allocate surfaces in device memory
    #[arg(long)]
    device_surfaces: bool,
}

/// NV12 frame with a moving luma ramp.
fn synthetic_frame(width: u32, height: u32, index: u32) -> (Vec<u8>, Vec<u8>) {
    let w = width as usize;
    let h = height as usize;
    let luma = (0..w * h)
        .map(|i| ((i % w) as u32 + index) as u8)
        .collect();
    let chroma = vec![128u8; w * h.div_ceil(2)];
    (luma, chroma)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => EncoderSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => EncoderSettings::default(),
    };

    let device = LoopbackDevice::new(
        LoopbackOptions::default().with_device_surfaces(args.device_surfaces),
    );
    let monitor = device.monitor();
    let device = DeviceContext::new(device);

    let format = VideoFormat::new(args.width, args.height, PixelFormat::Nv12)
        .with_fps(Rational::new(args.fps, 1));
    let mut encoder = Encoder::create(device, args.codec.into(), format, settings)
        .context("Failed to create encoder")?;

    let mut sink: Option<BufWriter<File>> = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let mut bytes_out = 0usize;
    let mut write = |data: &[u8]| -> Result<()> {
        bytes_out += data.len();
        if let Some(out) = sink.as_mut() {
            out.write_all(data)?;
        }
        Ok(())
    };

    let stride = args.width as usize;
    for index in 0..args.frames {
        let (luma, chroma) = synthetic_frame(args.width, args.height, index);
        let frame = PlanarFrame::new(PixelFormat::Nv12, args.width, args.height)
            .with_plane(&luma, stride)
            .with_plane(&chroma, stride);

        if let Some(packet) = encoder.encode(frame.into(), index as i64)? {
            write(&packet.data[..])?;
        }
    }
    for packet in encoder.flush()? {
        write(&packet.data[..])?;
    }

    if let Some(mut out) = sink.take() {
        out.flush()?;
    }

    let stats = encoder.stats();
    tracing::info!(
        "Encoded {} frames into {} packets ({} bytes), extra data {} bytes",
        stats.frames_submitted,
        stats.packets_emitted,
        bytes_out,
        encoder.extra_data().len()
    );

    encoder.destroy();
    let counters = monitor.snapshot();
    if counters.live_sessions != 0 || counters.live_device_surfaces != 0 {
        anyhow::bail!(
            "loopback reports leaked resources: {} sessions, {} device surfaces",
            counters.live_sessions,
            counters.live_device_surfaces
        );
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
