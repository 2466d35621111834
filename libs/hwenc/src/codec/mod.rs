// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Codec kinds, profiles and rate-control parameters.

mod rate_control;
mod video_codec;

pub use rate_control::{DataRateLimit, RateControlMode, RateControlParams};
pub use video_codec::{CodecKind, FOURCC_H264, FOURCC_HEVC, Profile, avc, hevc};
