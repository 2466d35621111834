// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The hardware capability seam.
//!
//! Vendor SDK call sequences live behind [`EncodeDevice`] and
//! [`HardwareSession`]. Everything above this module is backend-agnostic.

mod bitstream;
mod device;
pub mod loopback;
mod session;
mod surface;

pub use bitstream::{FormatDescription, FrameType, ParameterSetLayout, RawBitstream};
pub use device::{DeviceContext, EncodeDevice};
pub use session::{HardwareSession, SessionParams, SurfaceRequest, SyncPoint};
pub use surface::{DeviceSurfaceId, Surface, SurfaceInfo};
