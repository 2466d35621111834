// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::format::PixelFormat;

/// Identifier of a surface allocated in device memory by the hardware session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSurfaceId(pub u32);

/// Geometry of a pooled surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    /// Bi-planar layout of the surface (NV12 or P010).
    pub format: PixelFormat,
    /// Allocated width, aligned to 16.
    pub width: u32,
    /// Allocated height, aligned to 16.
    pub height: u32,
    /// Visible width.
    pub crop_width: u32,
    /// Visible height.
    pub crop_height: u32,
}

impl SurfaceInfo {
    /// Bytes per row of both planes.
    pub fn pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_sample()
    }

    /// Byte length of each plane.
    pub fn plane_sizes(&self) -> [usize; 2] {
        let pitch = self.pitch();
        [pitch * self.height as usize, pitch * (self.height as usize / 2)]
    }
}

/// A pooled frame buffer handed to the hardware for one encode operation.
///
/// Host planes are always present. For device-resident surfaces they serve as
/// the staging copy uploaded with
/// [`HardwareSession::write_surface`](super::HardwareSession::write_surface).
#[derive(Debug)]
pub struct Surface {
    pub info: SurfaceInfo,
    pub planes: [Vec<u8>; 2],
    pub device_id: Option<DeviceSurfaceId>,
    /// Presentation timestamp of the frame currently loaded.
    pub timestamp: i64,
}

impl Surface {
    pub fn host(info: SurfaceInfo) -> Self {
        let [luma, chroma] = info.plane_sizes();
        Self {
            info,
            planes: [vec![0; luma], vec![0; chroma]],
            device_id: None,
            timestamp: 0,
        }
    }

    pub fn device(info: SurfaceInfo, id: DeviceSurfaceId) -> Self {
        Self {
            device_id: Some(id),
            ..Self::host(info)
        }
    }

    pub fn is_device(&self) -> bool {
        self.device_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_sizes() {
        let info = SurfaceInfo {
            format: PixelFormat::P010,
            width: 1920,
            height: 1088,
            crop_width: 1920,
            crop_height: 1080,
        };
        assert_eq!(info.pitch(), 3840);
        assert_eq!(info.plane_sizes(), [3840 * 1088, 3840 * 544]);

        let surface = Surface::host(info);
        assert_eq!(surface.planes[1].len(), 3840 * 544);
        assert!(!surface.is_device());
    }
}
