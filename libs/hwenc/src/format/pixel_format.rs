// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pixel layouts the frame source may deliver.

use serde::{Deserialize, Serialize};

/// Pixel layout of an upstream frame.
///
/// Only the planar and bi-planar 4:2:0 layouts are accepted by the encoder;
/// the remaining variants exist so an unsupported upstream can be reported
/// precisely instead of being coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    // ===========================================
    // Encodable 4:2:0 formats
    // ===========================================
    /// Planar YUV 4:2:0, 8-bit: Y, U, V planes.
    I420,
    /// Bi-planar YUV 4:2:0, 8-bit: Y plane + interleaved UV plane.
    #[default]
    Nv12,
    /// Bi-planar YUV 4:2:0, 10-bit in 16-bit little-endian words.
    P010,

    // ===========================================
    // Not encodable by the hardware path
    // ===========================================
    /// Planar YUV 4:4:4, 8-bit.
    I444,
    /// Packed YUV 4:2:2, 8-bit.
    Yuy2,
    /// 32-bit RGBA.
    Rgba,
    /// 32-bit BGRA.
    Bgra,
}

/// Byte geometry of one plane at a given frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Bytes of pixel data per row (excluding stride padding).
    pub line_size: usize,
    /// Number of rows.
    pub rows: usize,
}

impl PlaneLayout {
    pub const fn new(line_size: usize, rows: usize) -> Self {
        Self { line_size, rows }
    }

    /// Minimum buffer length for this plane with the given stride.
    pub fn required_len(&self, stride: usize) -> usize {
        if self.rows == 0 {
            0
        } else {
            stride * (self.rows - 1) + self.line_size
        }
    }
}

impl PixelFormat {
    /// Whether the hardware path can encode this layout.
    pub const fn is_supported_for_encode(&self) -> bool {
        matches!(self, Self::I420 | Self::Nv12 | Self::P010)
    }

    /// Whether samples are wider than 8 bits.
    pub const fn is_ten_bit(&self) -> bool {
        matches!(self, Self::P010)
    }

    /// Bytes per luma sample.
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::P010 => 2,
            Self::Rgba | Self::Bgra => 4,
            Self::Yuy2 => 2,
            Self::I420 | Self::Nv12 | Self::I444 => 1,
        }
    }

    pub const fn plane_count(&self) -> usize {
        match self {
            Self::I420 | Self::I444 => 3,
            Self::Nv12 | Self::P010 => 2,
            Self::Yuy2 | Self::Rgba | Self::Bgra => 1,
        }
    }

    /// Layout of the device surface this format is uploaded into.
    ///
    /// Hardware surfaces are always bi-planar; planar I420 is interleaved
    /// into NV12 on upload.
    pub const fn surface_format(&self) -> Self {
        match self {
            Self::I420 => Self::Nv12,
            other => *other,
        }
    }

    /// Per-plane geometry for a `width` x `height` frame.
    pub fn plane_layouts(&self, width: u32, height: u32) -> Vec<PlaneLayout> {
        let w = width as usize;
        let h = height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        match self {
            Self::I420 => vec![
                PlaneLayout::new(w, h),
                PlaneLayout::new(cw, ch),
                PlaneLayout::new(cw, ch),
            ],
            Self::Nv12 => vec![PlaneLayout::new(w, h), PlaneLayout::new(cw * 2, ch)],
            Self::P010 => vec![PlaneLayout::new(w * 2, h), PlaneLayout::new(cw * 4, ch)],
            Self::I444 => vec![
                PlaneLayout::new(w, h),
                PlaneLayout::new(w, h),
                PlaneLayout::new(w, h),
            ],
            Self::Yuy2 => vec![PlaneLayout::new(w * 2, h)],
            Self::Rgba | Self::Bgra => vec![PlaneLayout::new(w * 4, h)],
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::P010 => "P010",
            Self::I444 => "I444",
            Self::Yuy2 => "YUY2",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
