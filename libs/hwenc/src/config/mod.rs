// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoder settings and change classification.

mod encoder_settings;

pub use encoder_settings::{ChangeKind, EncoderSettings};
