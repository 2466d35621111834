// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Length-prefixed to Annex B normalization with parameter-set capture.

use super::nal::{START_CODE_3, START_CODE_4, read_length_prefix};
use super::priority::{NalPriority, correct_avc_priorities};
use crate::codec::CodecKind;
use crate::error::{EncoderError, HwError, Result};
use crate::hw::{ParameterSetLayout, RawBitstream};

/// Layout assumed when a driver cannot report the parameter-set count or the
/// NAL length width. Only known to hold for specific driver versions.
pub const FALLBACK_LAYOUT: ParameterSetLayout = ParameterSetLayout {
    count: 2,
    nal_length_size: 4,
};

/// Concatenated parameter sets, captured from the first keyframe and
/// read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ParameterSetCache {
    data: Vec<u8>,
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sets` unless something was already captured. Returns whether
    /// the cache was written.
    pub fn store_once(&mut self, sets: &[u8]) -> bool {
        if !self.data.is_empty() || sets.is_empty() {
            return false;
        }
        self.data.extend_from_slice(sets);
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_captured(&self) -> bool {
        !self.data.is_empty()
    }
}

/// One sample converted to Annex B.
#[derive(Debug, Clone)]
pub struct NormalizedSample {
    pub data: Vec<u8>,
    pub keyframe: bool,
    /// Highest slice priority after correction; `Highest` for codecs without
    /// a priority field on keyframes, `High` otherwise.
    pub priority: NalPriority,
    /// This sample's parameter sets were the first captured for the session.
    pub captured_parameter_sets: bool,
}

/// Converts vendor bitstreams into one self-delimited Annex B buffer.
pub struct AnnexBNormalizer {
    codec: CodecKind,
    cache: ParameterSetCache,
    fallbacks: u64,
}

impl AnnexBNormalizer {
    pub fn new(codec: CodecKind) -> Self {
        Self {
            codec,
            cache: ParameterSetCache::new(),
            fallbacks: 0,
        }
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// Parameter sets captured so far; empty before the first keyframe.
    pub fn extra_data(&self) -> &[u8] {
        self.cache.as_bytes()
    }

    /// Samples converted with [`FALLBACK_LAYOUT`].
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks
    }

    /// Normalize one sample.
    ///
    /// Parameter sets are emitted first, with 4-byte start codes, on
    /// keyframes. Every other unit gets a 3-byte start code. Fails with
    /// [`EncoderError::MalformedOutput`] without producing partial output.
    pub fn to_self_delimited(&mut self, raw: &RawBitstream) -> Result<NormalizedSample> {
        let keyframe = raw.is_keyframe();
        let format = raw.format.as_deref().ok_or_else(|| {
            EncoderError::MalformedOutput("sample has no format description".to_string())
        })?;

        let layout = match format.layout() {
            Ok(layout) => layout,
            Err(HwError::InvalidParameter(reason)) => {
                self.fallbacks += 1;
                if self.fallbacks == 1 {
                    tracing::warn!(
                        "[Normalizer] Parameter set layout unavailable ({}), assuming {} parameter sets and {}-byte NAL length",
                        reason,
                        FALLBACK_LAYOUT.count,
                        FALLBACK_LAYOUT.nal_length_size
                    );
                } else {
                    tracing::debug!(
                        fallbacks = self.fallbacks,
                        "[Normalizer] Using fallback parameter set layout"
                    );
                }
                FALLBACK_LAYOUT
            }
            Err(e) => {
                tracing::error!("[Normalizer] Failed to get parameter set count: {}", e);
                return Err(EncoderError::MalformedOutput(format!(
                    "parameter set query failed: {e}"
                )));
            }
        };

        let mut out = Vec::with_capacity(raw.data.len() + 64);

        if keyframe {
            for index in 0..layout.count {
                let set = format.parameter_set(index).map_err(|e| {
                    tracing::error!("[Normalizer] Failed to get parameter set {}: {}", index, e);
                    EncoderError::MalformedOutput(format!("parameter set {index}: {e}"))
                })?;
                out.extend_from_slice(&START_CODE_4);
                out.extend_from_slice(set);
            }
        }
        let header_len = out.len();

        self.append_units(&raw.data, layout.nal_length_size, &mut out)?;

        let captured_parameter_sets = keyframe && self.cache.store_once(&out[..header_len]);
        if captured_parameter_sets {
            tracing::info!(
                "[Normalizer] Captured {} bytes of {} parameter sets",
                header_len,
                self.codec
            );
        }

        let priority = if self.codec.corrects_priority() {
            correct_avc_priorities(&mut out)
        } else if keyframe {
            NalPriority::Highest
        } else {
            NalPriority::High
        };

        Ok(NormalizedSample {
            data: out,
            keyframe,
            priority,
            captured_parameter_sets,
        })
    }

    fn append_units(&self, data: &[u8], nal_length_size: u8, out: &mut Vec<u8>) -> Result<()> {
        let width = nal_length_size as usize;
        if !matches!(width, 1 | 2 | 4) {
            return Err(EncoderError::MalformedOutput(format!(
                "unsupported NAL length size {nal_length_size}"
            )));
        }

        let mut pos = 0;
        while pos < data.len() {
            let unit_len = read_length_prefix(&data[pos..], nal_length_size).ok_or_else(|| {
                EncoderError::MalformedOutput(format!(
                    "truncated length prefix at offset {pos} ({} bytes left)",
                    data.len() - pos
                ))
            })?;
            pos += width;

            let remaining = data.len() - pos;
            if unit_len > remaining {
                tracing::error!(
                    "[Normalizer] Invalid NAL block: length {} exceeds remaining {} at offset {}",
                    unit_len,
                    remaining,
                    pos - width
                );
                return Err(EncoderError::MalformedOutput(format!(
                    "NAL length {unit_len} exceeds remaining {remaining} bytes"
                )));
            }

            out.extend_from_slice(&START_CODE_3);
            out.extend_from_slice(&data[pos..pos + unit_len]);
            pos += unit_len;
        }
        Ok(())
    }
}
