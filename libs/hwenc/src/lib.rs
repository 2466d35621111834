// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hardware video encoder abstraction.
//!
//! Drives a session-based hardware compression engine through fixed-size
//! surface and task pools, collects asynchronous completions in submission
//! order, and normalizes the vendor's length-prefixed output into an Annex B
//! byte stream with cached parameter sets.
//!
//! The vendor SDK sits behind the [`hw::EncodeDevice`] / [`hw::HardwareSession`]
//! traits. [`hw::loopback`] provides a deterministic in-process backend.

pub mod bitstream;
pub mod codec;
pub mod config;
pub mod drain;
pub mod encoder;
pub mod error;
pub mod format;
pub mod hw;
pub mod packet;
pub mod pool;
pub mod session;
pub mod submit;

pub use bitstream::{AnnexBNormalizer, NalPriority, NormalizedSample, ParameterSetCache};
pub use codec::{CodecKind, Profile, RateControlMode, RateControlParams};
pub use config::{ChangeKind, EncoderSettings};
pub use encoder::{Encoder, EncoderState, EncoderStats};
pub use error::{EncoderError, HwError, Result};
pub use format::{ColorSpace, PixelFormat, Rational, VideoFormat, VideoRange};
pub use hw::{DeviceContext, EncodeDevice, HardwareSession};
pub use packet::EncodedPacket;
pub use session::{EncoderSession, SessionId, SessionManager};
pub use submit::{FrameInput, PlanarFrame, RetryPolicy, TextureFrame};
