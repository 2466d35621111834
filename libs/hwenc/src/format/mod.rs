// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Upstream video format description: pixel layout, range, color space, rate.

mod pixel_format;
mod video_format;

pub use pixel_format::{PixelFormat, PlaneLayout};
pub use video_format::{ColorSpace, Rational, VideoFormat, VideoRange, align16};
