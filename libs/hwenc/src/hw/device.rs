// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::HardwareSession;
use crate::codec::CodecKind;
use crate::error::HwError;

/// A shared encode-capable device (GPU adapter, media engine).
pub trait EncodeDevice: Send + Sync {
    /// Human-readable adapter name for logs.
    fn name(&self) -> &str;

    /// Whether sessions can allocate device-resident surfaces. Texture input
    /// requires this.
    fn supports_device_surfaces(&self) -> bool;

    /// Open an uninitialized session for `codec`.
    fn open_session(&self, codec: CodecKind) -> Result<Box<dyn HardwareSession>, HwError>;
}

/// Owned device handle shared by every session created on it.
///
/// Always held as `Arc<DeviceContext>`: each live session keeps a clone and
/// the device is released when the last one goes away.
pub struct DeviceContext {
    device: Box<dyn EncodeDevice>,
}

impl DeviceContext {
    pub fn new(device: impl EncodeDevice + 'static) -> Arc<Self> {
        tracing::info!("[hwenc] Acquired encode device '{}'", device.name());
        Arc::new(Self {
            device: Box::new(device),
        })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn supports_device_surfaces(&self) -> bool {
        self.device.supports_device_surfaces()
    }

    pub fn open_session(&self, codec: CodecKind) -> Result<Box<dyn HardwareSession>, HwError> {
        self.device.open_session(codec)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        tracing::info!("[hwenc] Released encode device '{}'", self.device.name());
    }
}
