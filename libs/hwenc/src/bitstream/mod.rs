// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Vendor bitstream to Annex B conversion.

mod annex_b;
mod nal;
mod priority;

pub use annex_b::{AnnexBNormalizer, FALLBACK_LAYOUT, NormalizedSample, ParameterSetCache};
pub use nal::{START_CODE_3, START_CODE_4, annex_b_units, find_start_code, read_length_prefix};
pub use priority::{NalPriority, correct_avc_priorities};
