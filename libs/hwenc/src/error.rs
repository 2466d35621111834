// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

/// Status reported by a [`HardwareSession`](crate::hw::HardwareSession) call.
///
/// Backends translate their vendor status codes into these; the rest of the
/// crate only ever sees [`EncoderError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    #[error("device busy")]
    Busy,

    #[error("operation still in execution")]
    InExecution,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("incompatible video parameters: {0}")]
    Incompatible(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("bitstream buffer too small: need {needed} bytes, have {capacity}")]
    NotEnoughBuffer { needed: usize, capacity: usize },

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("sync timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    #[error("hardware call failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),

    #[error("Hardware rejected parameters: {0}")]
    ParameterRejected(String),

    #[error("Device busy")]
    DeviceBusy,

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Timed out after {0} ms waiting for the hardware")]
    Timeout(u64),

    #[error("Waiting on an in-flight encode failed: {0}")]
    SyncFailed(String),

    #[error("Malformed encoder output: {0}")]
    MalformedOutput(String),

    #[error("Output buffer too small: need {needed} bytes, have {capacity}")]
    NotEnoughBuffer { needed: usize, capacity: usize },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid encoder state: {0}")]
    InvalidState(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

impl From<HwError> for EncoderError {
    fn from(err: HwError) -> Self {
        match err {
            HwError::Busy => EncoderError::DeviceBusy,
            HwError::InvalidParameter(msg) | HwError::Incompatible(msg) => {
                EncoderError::ParameterRejected(msg)
            }
            HwError::Unsupported(msg) => EncoderError::NotSupported(msg),
            HwError::NotEnoughBuffer { needed, capacity } => {
                EncoderError::NotEnoughBuffer { needed, capacity }
            }
            HwError::DeviceLost(msg) => EncoderError::DeviceLost(msg),
            HwError::Timeout { waited_ms } => EncoderError::Timeout(waited_ms),
            HwError::InExecution => {
                EncoderError::Hardware("operation still in execution".to_string())
            }
            HwError::Failed(msg) => EncoderError::Hardware(msg),
        }
    }
}

impl EncoderError {
    /// Session is unrecoverable; the caller must destroy and recreate the encoder.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EncoderError::DeviceLost(_) | EncoderError::Timeout(_) | EncoderError::SyncFailed(_)
        )
    }

    /// Affects a single sample only. Reported as "no packet", never as a session failure.
    pub fn is_per_sample(&self) -> bool {
        matches!(
            self,
            EncoderError::MalformedOutput(_) | EncoderError::NotEnoughBuffer { .. }
        )
    }

    /// Message suitable for showing to an end user when the encoder fails to start.
    pub fn user_message(&self) -> String {
        match self {
            EncoderError::UnsupportedFormat(detail) => format!(
                "The hardware encoder does not support this video format ({detail}). \
                 Switch the output format to NV12, I420 or P010."
            ),
            EncoderError::ParameterRejected(detail) => format!(
                "The hardware encoder rejected the selected settings ({detail}). \
                 Try a different rate control mode or profile."
            ),
            EncoderError::DeviceLost(_)
            | EncoderError::Timeout(_)
            | EncoderError::SyncFailed(_) => {
                "The hardware encoder stopped responding. Restart the output to recover."
                    .to_string()
            }
            EncoderError::Configuration(detail) => {
                format!("Invalid encoder settings: {detail}")
            }
            EncoderError::NotSupported(detail) => {
                format!("This encoder is not available on the current device: {detail}")
            }
            other => format!("Failed to open the hardware encoder: {other}"),
        }
    }
}
