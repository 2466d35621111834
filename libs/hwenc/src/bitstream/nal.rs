// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// NAL unit framing helpers
//
// - Length-prefixed (AVCC/HVCC) - what hardware encoders emit
// - Annex B (start-code-prefixed) - what muxers and transports consume

/// Short start code, used before slice data.
pub const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];
/// Long start code, used before parameter sets.
pub const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Read a big-endian NAL length prefix of `size` bytes (1, 2 or 4).
pub fn read_length_prefix(data: &[u8], size: u8) -> Option<usize> {
    let bytes = data.get(..size as usize)?;
    match size {
        1 => Some(bytes[0] as usize),
        2 => Some(u16::from_be_bytes([bytes[0], bytes[1]]) as usize),
        4 => Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize),
        _ => None,
    }
}

/// Find the next start code at or after `from`.
///
/// Returns `(position, length)`; a `00 00 01` preceded by a zero byte is
/// reported as the 4-byte form.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i + 2] > 1 {
            i += 3;
            continue;
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > from && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Iterate the NAL units of an Annex B buffer as `(offset, unit)` pairs,
/// where `offset` is the position of the unit's first header byte.
pub fn annex_b_units(data: &[u8]) -> AnnexBUnits<'_> {
    let next = find_start_code(data, 0).map(|(pos, len)| pos + len);
    AnnexBUnits { data, next }
}

pub struct AnnexBUnits<'a> {
    data: &'a [u8],
    next: Option<usize>,
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        match find_start_code(self.data, start) {
            Some((pos, len)) => {
                self.next = Some(pos + len);
                Some((start, &self.data[start..pos]))
            }
            None => {
                self.next = None;
                Some((start, &self.data[start..]))
            }
        }
    }
}
