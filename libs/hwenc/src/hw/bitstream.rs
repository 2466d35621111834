// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::HwError;

bitflags! {
    /// Frame type flags reported with a completed bitstream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameType: u16 {
        const I = 0x0001;
        const P = 0x0002;
        const B = 0x0004;
        /// Used as a reference by later frames.
        const REF = 0x0040;
        /// Instantaneous decoder refresh.
        const IDR = 0x0080;
    }
}

/// Parameter-set count and length-prefix width of a vendor bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSetLayout {
    pub count: usize,
    /// Bytes in each big-endian NAL length prefix: 1, 2 or 4.
    pub nal_length_size: u8,
}

/// Out-of-band stream description attached to completed samples.
///
/// Carries the parameter sets and the NAL length-prefix width. Some drivers
/// cannot report the layout; [`FormatDescription::layout`] then returns the
/// driver's error and the caller decides how to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    layout: Result<ParameterSetLayout, HwError>,
    parameter_sets: Vec<Vec<u8>>,
}

impl FormatDescription {
    pub fn new(nal_length_size: u8, parameter_sets: Vec<Vec<u8>>) -> Self {
        Self {
            layout: Ok(ParameterSetLayout {
                count: parameter_sets.len(),
                nal_length_size,
            }),
            parameter_sets,
        }
    }

    /// A description whose layout query fails with `error`.
    pub fn without_layout(error: HwError, parameter_sets: Vec<Vec<u8>>) -> Self {
        Self {
            layout: Err(error),
            parameter_sets,
        }
    }

    pub fn layout(&self) -> Result<ParameterSetLayout, HwError> {
        self.layout.clone()
    }

    pub fn parameter_set(&self, index: usize) -> Result<&[u8], HwError> {
        self.parameter_sets
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                HwError::InvalidParameter(format!(
                    "parameter set index {} out of range ({} available)",
                    index,
                    self.parameter_sets.len()
                ))
            })
    }
}

/// Vendor-framed output of one encode task.
///
/// Tasks own one of these as their output buffer; the completion drain swaps
/// it with a scratch buffer instead of copying.
#[derive(Debug, Clone, Default)]
pub struct RawBitstream {
    /// Length-prefixed NAL units.
    pub data: Vec<u8>,
    /// Presentation timestamp in frame-count units.
    pub pts: i64,
    /// Decode timestamp, if the hardware reported one.
    pub dts: Option<i64>,
    pub frame_type: FrameType,
    pub format: Option<Arc<FormatDescription>>,
}

impl RawBitstream {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Bytes the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Reset contents while keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pts = 0;
        self.dts = None;
        self.frame_type = FrameType::empty();
        self.format = None;
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type.intersects(FrameType::IDR | FrameType::I)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
