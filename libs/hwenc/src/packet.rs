// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoded packet handed to the caller.

use bytes::Bytes;

use crate::bitstream::NalPriority;
use crate::format::Rational;

/// One encoded access unit in Annex B form.
///
/// Output of the encoder and input to muxers/network transmitters.
/// Timestamps are in frame-count units of `fps`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Start-code delimited NAL units; parameter sets lead on keyframes.
    pub data: Bytes,

    pub pts: i64,

    /// Decode timestamp. Shifted back two frames when B-frames are enabled
    /// so that it never exceeds `pts`.
    pub dts: i64,

    /// Whether this is a keyframe (IDR).
    pub keyframe: bool,

    /// Highest slice priority in the packet.
    pub priority: NalPriority,

    /// Frame rate the timestamps count in.
    pub fps: Rational,
}

impl EncodedPacket {
    pub fn pts_seconds(&self) -> f64 {
        self.fps.ticks_to_seconds(self.pts)
    }

    pub fn dts_seconds(&self) -> f64 {
        self.fps.ticks_to_seconds(self.dts)
    }

    /// Returns the size of the encoded data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_in_seconds() {
        let packet = EncodedPacket {
            data: Bytes::from_static(&[0, 0, 1, 0x65]),
            pts: 60,
            dts: 58,
            keyframe: true,
            priority: NalPriority::Highest,
            fps: Rational::new(30, 1),
        };
        assert_eq!(packet.pts_seconds(), 2.0);
        assert!((packet.dts_seconds() - 58.0 / 30.0).abs() < 1e-9);
        assert_eq!(packet.len(), 4);
    }
}
