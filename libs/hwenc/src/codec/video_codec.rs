// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Codec kinds and the codec-specific policy values the encoder depends on.

use serde::{Deserialize, Serialize};

use crate::error::{EncoderError, Result};
use crate::format::PixelFormat;

/// FourCC code for H.264/AVC ('avc1').
pub const FOURCC_H264: u32 = 0x61766331; // 'avc1' in ASCII
/// FourCC code for H.265/HEVC ('hvc1').
pub const FOURCC_HEVC: u32 = 0x68766331; // 'hvc1' in ASCII

/// H.264 NAL unit types and header bit layout.
pub mod avc {
    pub const NAL_SLICE: u8 = 1;
    pub const NAL_SLICE_IDR: u8 = 5;
    pub const NAL_SEI: u8 = 6;
    pub const NAL_SPS: u8 = 7;
    pub const NAL_PPS: u8 = 8;
    pub const NAL_AUD: u8 = 9;

    /// `nal_unit_type` occupies the low five bits of the header byte.
    pub const fn nal_type(header: u8) -> u8 {
        header & 0x1f
    }
}

/// H.265 NAL unit types and header bit layout.
pub mod hevc {
    pub const NAL_TRAIL_R: u8 = 1;
    pub const NAL_IDR_W_RADL: u8 = 19;
    pub const NAL_IDR_N_LP: u8 = 20;
    pub const NAL_CRA: u8 = 21;
    pub const NAL_VPS: u8 = 32;
    pub const NAL_SPS: u8 = 33;
    pub const NAL_PPS: u8 = 34;
    pub const NAL_AUD: u8 = 35;

    /// `nal_unit_type` is bits 1-6 of the first header byte.
    pub const fn nal_type(header: u8) -> u8 {
        (header >> 1) & 0x3f
    }
}

/// Codec produced by an encoder session.
///
/// One encoder implementation serves both codecs; everything that differs
/// between them is a method here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Avc,
    Hevc,
}

impl CodecKind {
    pub const fn name(&self) -> &'static str {
        match self {
            CodecKind::Avc => "H.264",
            CodecKind::Hevc => "HEVC",
        }
    }

    /// FourCC code for this codec.
    pub const fn fourcc(&self) -> u32 {
        match self {
            CodecKind::Avc => FOURCC_H264,
            CodecKind::Hevc => FOURCC_HEVC,
        }
    }

    /// MIME type for this codec.
    pub const fn mime_type(&self) -> &'static str {
        match self {
            CodecKind::Avc => "video/h264",
            CodecKind::Hevc => "video/h265",
        }
    }

    /// Profile used when the settings leave it unspecified.
    pub const fn default_profile(&self, pixel_format: PixelFormat) -> Profile {
        match self {
            CodecKind::Avc => Profile::Main,
            CodecKind::Hevc if pixel_format.is_ten_bit() => Profile::Main10,
            CodecKind::Hevc => Profile::Main,
        }
    }

    /// Resolve `requested` against this codec and input format.
    pub fn resolve_profile(&self, requested: Profile, pixel_format: PixelFormat) -> Result<Profile> {
        let profile = match requested {
            Profile::Default => self.default_profile(pixel_format),
            other => other,
        };

        let valid = match (self, profile) {
            (CodecKind::Avc, Profile::Baseline | Profile::Main | Profile::High) => true,
            (CodecKind::Hevc, Profile::Main) => !pixel_format.is_ten_bit(),
            (CodecKind::Hevc, Profile::Main10) => true,
            _ => false,
        };

        if valid {
            Ok(profile)
        } else {
            Err(EncoderError::Configuration(format!(
                "profile {:?} is not valid for {} with {} input",
                profile,
                self.name(),
                pixel_format
            )))
        }
    }

    /// Extract the NAL unit type from the first header byte.
    pub const fn nal_type(&self, header: u8) -> u8 {
        match self {
            CodecKind::Avc => avc::nal_type(header),
            CodecKind::Hevc => hevc::nal_type(header),
        }
    }

    /// Whether `nal_type` is a parameter set (SPS/PPS, plus VPS for HEVC).
    pub const fn is_parameter_set(&self, nal_type: u8) -> bool {
        match self {
            CodecKind::Avc => matches!(nal_type, avc::NAL_SPS | avc::NAL_PPS),
            CodecKind::Hevc => matches!(nal_type, hevc::NAL_VPS | hevc::NAL_SPS | hevc::NAL_PPS),
        }
    }

    /// Whether `nal_type` is an instantaneous decoder refresh slice.
    pub const fn is_idr(&self, nal_type: u8) -> bool {
        match self {
            CodecKind::Avc => nal_type == avc::NAL_SLICE_IDR,
            CodecKind::Hevc => matches!(nal_type, hevc::NAL_IDR_W_RADL | hevc::NAL_IDR_N_LP),
        }
    }

    /// Only AVC carries a priority field (`nal_ref_idc`) in its NAL header.
    pub const fn corrects_priority(&self) -> bool {
        matches!(self, CodecKind::Avc)
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding profile. `Default` defers to [`CodecKind::default_profile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Default,
    /// H.264 Baseline - most compatible, no B-frames.
    Baseline,
    /// H.264 Main / HEVC Main.
    Main,
    /// H.264 High.
    High,
    /// HEVC Main 10.
    Main10,
}

impl Profile {
    /// Get the profile_idc value written into the SPS.
    pub fn profile_idc(&self, codec: CodecKind) -> u8 {
        match (codec, self) {
            (CodecKind::Avc, Profile::Baseline) => 66,
            (CodecKind::Avc, Profile::High) => 100,
            (CodecKind::Avc, _) => 77,
            (CodecKind::Hevc, Profile::Main10) => 2,
            (CodecKind::Hevc, _) => 1,
        }
    }

    /// Whether this profile allows B-frames at all.
    pub const fn allows_bframes(&self) -> bool {
        !matches!(self, Profile::Baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles() {
        assert_eq!(CodecKind::Avc.default_profile(PixelFormat::Nv12), Profile::Main);
        assert_eq!(CodecKind::Hevc.default_profile(PixelFormat::Nv12), Profile::Main);
        assert_eq!(CodecKind::Hevc.default_profile(PixelFormat::P010), Profile::Main10);
    }

    #[test]
    fn test_resolve_profile_rejects_cross_codec() {
        assert!(CodecKind::Hevc
            .resolve_profile(Profile::High, PixelFormat::Nv12)
            .is_err());
        assert!(CodecKind::Avc
            .resolve_profile(Profile::Main10, PixelFormat::Nv12)
            .is_err());
        assert!(CodecKind::Hevc
            .resolve_profile(Profile::Main, PixelFormat::P010)
            .is_err());
        assert_eq!(
            CodecKind::Avc
                .resolve_profile(Profile::Default, PixelFormat::I420)
                .unwrap(),
            Profile::Main
        );
    }

    #[test]
    fn test_nal_type_extraction() {
        assert_eq!(CodecKind::Avc.nal_type(0x67), avc::NAL_SPS);
        assert_eq!(CodecKind::Avc.nal_type(0x65), avc::NAL_SLICE_IDR);
        assert_eq!(CodecKind::Hevc.nal_type(0x40), hevc::NAL_VPS);
        assert_eq!(CodecKind::Hevc.nal_type(0x42), hevc::NAL_SPS);
        assert_eq!(CodecKind::Hevc.nal_type(0x26), hevc::NAL_IDR_W_RADL);
    }

    #[test]
    fn test_parameter_set_recognition() {
        assert!(CodecKind::Avc.is_parameter_set(avc::NAL_PPS));
        assert!(!CodecKind::Avc.is_parameter_set(avc::NAL_SLICE));
        assert!(CodecKind::Hevc.is_parameter_set(hevc::NAL_VPS));
        assert!(!CodecKind::Hevc.is_parameter_set(hevc::NAL_IDR_W_RADL));
    }
}
