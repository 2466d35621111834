// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EncoderSettings;
use crate::error::EncoderError;

/// Rate-control mode. `vbr`, `cqp` and `icq` are accepted as aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateControlMode {
    /// Constant bitrate.
    #[default]
    Cbr,
    /// Average bitrate, optionally capped by a data-rate limit.
    #[serde(alias = "vbr")]
    Abr,
    /// Constant quality.
    #[serde(alias = "cqp", alias = "icq")]
    Crf,
}

impl RateControlMode {
    /// Whether the target bitrate drives this mode.
    pub const fn uses_bitrate(&self) -> bool {
        matches!(self, Self::Cbr | Self::Abr)
    }
}

impl FromStr for RateControlMode {
    type Err = EncoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbr" => Ok(Self::Cbr),
            "abr" | "vbr" => Ok(Self::Abr),
            "crf" | "cqp" | "icq" => Ok(Self::Crf),
            other => Err(EncoderError::Configuration(format!(
                "unknown rate control mode '{other}'"
            ))),
        }
    }
}

/// Coded picture buffer constraint: at most `bytes` over `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRateLimit {
    pub bytes: u64,
    pub window_secs: f64,
}

/// Rate-control values pushed to a hardware session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateControlParams {
    pub mode: RateControlMode,
    pub target_kbps: u32,
    pub max_kbps: u32,
    /// 0.0 (smallest) ..= 1.0 (best). Used by [`RateControlMode::Crf`].
    pub quality: f32,
    pub limit: Option<DataRateLimit>,
    /// Frames of look-ahead analysis; 0 disables it.
    pub lookahead_depth: u16,
}

impl RateControlParams {
    pub fn from_settings(settings: &EncoderSettings) -> Self {
        let limit = if settings.limit_bitrate {
            if settings.rate_control == RateControlMode::Cbr {
                tracing::debug!("[RateControl] limit_bitrate ignored for CBR");
                None
            } else {
                // kbps * 1000 / 8 = bytes per second
                let bytes = (settings.max_bitrate_kbps as f64
                    * 125.0
                    * settings.max_bitrate_window_secs) as u64;
                Some(DataRateLimit {
                    bytes,
                    window_secs: settings.max_bitrate_window_secs,
                })
            }
        } else {
            None
        };

        let (target_kbps, max_kbps) = match settings.rate_control {
            RateControlMode::Cbr => (settings.bitrate_kbps, settings.bitrate_kbps),
            RateControlMode::Abr if limit.is_some() => {
                (settings.bitrate_kbps, settings.max_bitrate_kbps)
            }
            RateControlMode::Abr => (settings.bitrate_kbps, settings.bitrate_kbps),
            RateControlMode::Crf => (0, limit.map_or(0, |_| settings.max_bitrate_kbps)),
        };

        Self {
            mode: settings.rate_control,
            target_kbps,
            max_kbps,
            quality: settings.quality as f32 / 100.0,
            limit,
            lookahead_depth: settings.lookahead_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_aliases() {
        assert_eq!("VBR".parse::<RateControlMode>().unwrap(), RateControlMode::Abr);
        assert_eq!("icq".parse::<RateControlMode>().unwrap(), RateControlMode::Crf);
        assert_eq!("cqp".parse::<RateControlMode>().unwrap(), RateControlMode::Crf);
        assert!("lossless".parse::<RateControlMode>().is_err());
    }

    #[test]
    fn test_serde_aliases() {
        let mode: RateControlMode = serde_yaml::from_str("vbr").unwrap();
        assert_eq!(mode, RateControlMode::Abr);
        let mode: RateControlMode = serde_yaml::from_str("icq").unwrap();
        assert_eq!(mode, RateControlMode::Crf);
    }

    #[test]
    fn test_abr_limit_cpb_size() {
        let settings = EncoderSettings::default()
            .with_rate_control(RateControlMode::Abr)
            .with_bitrate(2500)
            .with_max_bitrate(4000, 1.5);
        let params = RateControlParams::from_settings(&settings);
        let limit = params.limit.unwrap();
        assert_eq!(limit.bytes, 750_000);
        assert_eq!(params.max_kbps, 4000);
        assert_eq!(params.target_kbps, 2500);
    }

    #[test]
    fn test_cbr_ignores_limit() {
        let settings = EncoderSettings::default()
            .with_rate_control(RateControlMode::Cbr)
            .with_max_bitrate(4000, 1.5);
        let params = RateControlParams::from_settings(&settings);
        assert!(params.limit.is_none());
        assert_eq!(params.max_kbps, params.target_kbps);
    }

    #[test]
    fn test_crf_quality_scale() {
        let settings = EncoderSettings::default()
            .with_rate_control(RateControlMode::Crf)
            .with_quality(60);
        let params = RateControlParams::from_settings(&settings);
        assert!((params.quality - 0.6).abs() < f32::EPSILON);
        assert_eq!(params.target_kbps, 0);
    }
}
