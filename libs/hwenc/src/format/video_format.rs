// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use super::PixelFormat;
use crate::error::{EncoderError, Result};

/// Largest frame edge accepted for a hardware session.
pub const MAX_DIMENSION: u32 = 8192;

/// Round up to the 16-pixel macroblock grid hardware surfaces are allocated on.
pub const fn align16(value: u32) -> u32 {
    (value + 15) & !15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoRange {
    /// Limited ("video") range: 16-235 luma.
    #[default]
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Bt601,
    #[default]
    Bt709,
    /// BT.2100 with the PQ transfer function.
    Bt2100Pq,
    /// BT.2100 with the HLG transfer function.
    Bt2100Hlg,
    Srgb,
}

impl ColorSpace {
    pub const fn is_hdr(&self) -> bool {
        matches!(self, Self::Bt2100Pq | Self::Bt2100Hlg)
    }
}

/// Rational number used for frame rates and time bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Seconds represented by `ticks` frame-count units at this frame rate.
    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        if self.num == 0 {
            return 0.0;
        }
        ticks as f64 * self.den as f64 / self.num as f64
    }

    /// Whole frames in `secs` seconds, rounded down.
    pub fn frames_in(&self, secs: u32) -> u32 {
        if self.den == 0 {
            return 0;
        }
        ((secs as u64 * self.num as u64) / self.den as u64) as u32
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Video format reported by the frame source once at encoder creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub range: VideoRange,
    #[serde(default)]
    pub color_space: ColorSpace,
    #[serde(default)]
    pub fps: Rational,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            range: VideoRange::default(),
            color_space: ColorSpace::default(),
            fps: Rational::default(),
        }
    }

    pub fn with_fps(mut self, fps: Rational) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_range(mut self, range: VideoRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    /// Surface width on the hardware allocation grid.
    pub fn aligned_width(&self) -> u32 {
        align16(self.width)
    }

    /// Surface height on the hardware allocation grid.
    pub fn aligned_height(&self) -> u32 {
        align16(self.height)
    }

    /// Check that the hardware path can encode this format.
    pub fn validate(&self) -> Result<()> {
        if !self.pixel_format.is_supported_for_encode() {
            return Err(EncoderError::UnsupportedFormat(format!(
                "pixel format {} is not one of I420, NV12, P010",
                self.pixel_format
            )));
        }

        if self.color_space.is_hdr() && !self.pixel_format.is_ten_bit() {
            return Err(EncoderError::UnsupportedFormat(format!(
                "{:?} requires a 10-bit pixel format, got {}",
                self.color_space, self.pixel_format
            )));
        }

        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(EncoderError::Configuration(format!(
                "frame size {}x{} outside 1..={}",
                self.width, self.height, MAX_DIMENSION
            )));
        }

        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(EncoderError::Configuration(format!(
                "invalid frame rate {}",
                self.fps
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align16() {
        assert_eq!(align16(0), 0);
        assert_eq!(align16(1), 16);
        assert_eq!(align16(1080), 1088);
        assert_eq!(align16(1920), 1920);
    }

    #[test]
    fn test_rational_seconds() {
        let fps = Rational::new(30000, 1001);
        assert!((fps.as_f64() - 29.97).abs() < 0.01);
        assert!((fps.ticks_to_seconds(30) - 1.001).abs() < 1e-9);
        assert_eq!(Rational::new(30, 1).frames_in(2), 60);
    }

    #[test]
    fn test_validate_rejects_rgb() {
        let format = VideoFormat::new(1280, 720, PixelFormat::Bgra);
        assert!(matches!(
            format.validate(),
            Err(EncoderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_8bit_hdr() {
        let format =
            VideoFormat::new(1280, 720, PixelFormat::Nv12).with_color_space(ColorSpace::Bt2100Pq);
        assert!(matches!(
            format.validate(),
            Err(EncoderError::UnsupportedFormat(_))
        ));

        let format =
            VideoFormat::new(1280, 720, PixelFormat::P010).with_color_space(ColorSpace::Bt2100Pq);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let format = VideoFormat::new(0, 720, PixelFormat::Nv12);
        assert!(matches!(
            format.validate(),
            Err(EncoderError::Configuration(_))
        ));
    }
}
