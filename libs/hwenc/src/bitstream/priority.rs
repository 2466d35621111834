// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! AVC slice priority correction.
//!
//! Hardware encoders tend to mark slices with a lower `nal_ref_idc` than
//! stream transports expect, which prevents them from recovering after
//! dropping frames. Priorities are rewritten in place after normalization.

use serde::Serialize;

use super::nal::annex_b_units;
use crate::codec::avc;

/// Two-bit AVC `nal_ref_idc`, bits 5-6 of the NAL header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum NalPriority {
    #[default]
    Disposable = 0,
    Low = 1,
    High = 2,
    Highest = 3,
}

impl NalPriority {
    const SHIFT: u8 = 5;
    const MASK: u8 = 0x3 << Self::SHIFT;

    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Disposable,
            1 => Self::Low,
            2 => Self::High,
            _ => Self::Highest,
        }
    }

    /// Priority carried by an AVC NAL header byte.
    pub const fn of_header(header: u8) -> Self {
        Self::from_bits(header >> Self::SHIFT)
    }

    /// `header` with its priority bits replaced by `self`.
    pub const fn apply(self, header: u8) -> u8 {
        (header & !Self::MASK) | ((self as u8) << Self::SHIFT)
    }
}

/// Rewrite slice priorities in an Annex B AVC buffer.
///
/// IDR slices become [`NalPriority::Highest`]. Other slices become
/// [`NalPriority::High`] unless they were already
/// [`NalPriority::Disposable`], which is kept. Returns the highest slice
/// priority in the buffer after correction.
pub fn correct_avc_priorities(data: &mut [u8]) -> NalPriority {
    let headers: Vec<usize> = annex_b_units(data)
        .filter(|(_, unit)| !unit.is_empty())
        .map(|(offset, _)| offset)
        .collect();

    let mut highest = NalPriority::Disposable;
    for offset in headers {
        let header = data[offset];
        let nal_type = avc::nal_type(header);
        if nal_type != avc::NAL_SLICE_IDR && nal_type != avc::NAL_SLICE {
            continue;
        }

        let previous = NalPriority::of_header(header);
        let corrected = if nal_type == avc::NAL_SLICE_IDR {
            NalPriority::Highest
        } else if previous != NalPriority::Disposable {
            NalPriority::High
        } else {
            previous
        };

        data[offset] = corrected.apply(header);
        highest = highest.max(corrected);
    }
    highest
}
