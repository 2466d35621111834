// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! User-facing encoder settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{Profile, RateControlMode};
use crate::error::{EncoderError, Result};

/// How a settings change must be applied to a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Nothing the hardware cares about changed.
    None,
    /// Rate parameters only; pushed to the live session.
    Soft,
    /// Requires tearing the session down and recreating it.
    Hard,
}

/// Encoder settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub rate_control: RateControlMode,
    /// Target bitrate in kilobits per second.
    pub bitrate_kbps: u32,
    /// Quality 0-100, used by constant-quality rate control.
    pub quality: u32,
    /// Cap the data rate over `max_bitrate_window_secs`.
    pub limit_bitrate: bool,
    pub max_bitrate_kbps: u32,
    pub max_bitrate_window_secs: f64,
    /// Seconds between keyframes; 0 lets the hardware choose.
    pub keyframe_interval_secs: u32,
    pub profile: Profile,
    pub use_bframes: bool,
    /// Encode operations the hardware may have outstanding at once.
    pub async_depth: u16,
    /// Request the low-power (fixed-function) encode path.
    pub low_power: bool,
    /// Look-ahead depth in frames; 0 disables look-ahead rate control.
    pub lookahead_depth: u16,
    /// Upper bound on a single completion wait.
    pub completion_timeout_ms: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            rate_control: RateControlMode::Cbr,
            bitrate_kbps: 2500,
            quality: 60,
            limit_bitrate: false,
            max_bitrate_kbps: 2500,
            max_bitrate_window_secs: 1.5,
            keyframe_interval_secs: 0,
            profile: Profile::Default,
            use_bframes: true,
            async_depth: 4,
            low_power: true,
            lookahead_depth: 0,
            completion_timeout_ms: 60_000,
        }
    }
}

impl EncoderSettings {
    /// Parse settings from a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| EncoderError::Configuration(format!("Failed to parse settings: {}", e)))
    }

    /// Load settings from a YAML file. Returns error if the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EncoderError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let settings: Self = serde_yaml::from_str(&content).map_err(|e| {
            EncoderError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded encoder settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings from a YAML file, returning defaults if the file is
    /// missing or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Reject values no hardware session could accept.
    pub fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(EncoderError::Configuration(format!(
                "quality {} outside 0..=100",
                self.quality
            )));
        }
        if self.async_depth == 0 {
            return Err(EncoderError::Configuration(
                "async_depth must be at least 1".to_string(),
            ));
        }
        if self.rate_control.uses_bitrate() && self.bitrate_kbps == 0 {
            return Err(EncoderError::Configuration(format!(
                "{:?} requires a non-zero bitrate",
                self.rate_control
            )));
        }
        if self.limit_bitrate && self.rate_control != RateControlMode::Cbr {
            if self.max_bitrate_kbps == 0 {
                return Err(EncoderError::Configuration(
                    "limit_bitrate requires max_bitrate_kbps > 0".to_string(),
                ));
            }
            if self.max_bitrate_window_secs.is_nan() || self.max_bitrate_window_secs <= 0.0 {
                return Err(EncoderError::Configuration(format!(
                    "max_bitrate_window_secs must be positive, got {}",
                    self.max_bitrate_window_secs
                )));
            }
        }
        if self.completion_timeout_ms == 0 {
            return Err(EncoderError::Configuration(
                "completion_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Classify the change from `self` to `new`.
    pub fn classify_change(&self, new: &EncoderSettings) -> ChangeKind {
        if self == new {
            return ChangeKind::None;
        }

        let rate_only = EncoderSettings {
            bitrate_kbps: self.bitrate_kbps,
            quality: self.quality,
            limit_bitrate: self.limit_bitrate,
            max_bitrate_kbps: self.max_bitrate_kbps,
            max_bitrate_window_secs: self.max_bitrate_window_secs,
            ..new.clone()
        };

        if rate_only == *self {
            ChangeKind::Soft
        } else {
            ChangeKind::Hard
        }
    }

    pub fn with_rate_control(mut self, mode: RateControlMode) -> Self {
        self.rate_control = mode;
        self
    }

    /// Set the target bitrate in kilobits per second.
    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = kbps;
        self
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Enable the data-rate cap.
    pub fn with_max_bitrate(mut self, kbps: u32, window_secs: f64) -> Self {
        self.limit_bitrate = true;
        self.max_bitrate_kbps = kbps;
        self.max_bitrate_window_secs = window_secs;
        self
    }

    pub fn with_keyframe_interval(mut self, secs: u32) -> Self {
        self.keyframe_interval_secs = secs;
        self
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_bframes(mut self, enabled: bool) -> Self {
        self.use_bframes = enabled;
        self
    }

    pub fn with_async_depth(mut self, depth: u16) -> Self {
        self.async_depth = depth;
        self
    }

    pub fn with_low_power(mut self, enabled: bool) -> Self {
        self.low_power = enabled;
        self
    }

    pub fn with_lookahead(mut self, depth: u16) -> Self {
        self.lookahead_depth = depth;
        self
    }

    pub fn with_completion_timeout(mut self, ms: u64) -> Self {
        self.completion_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = EncoderSettings::default();
        assert_eq!(settings.bitrate_kbps, 2500);
        assert_eq!(settings.quality, 60);
        assert_eq!(settings.max_bitrate_kbps, 2500);
        assert!((settings.max_bitrate_window_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(settings.keyframe_interval_secs, 0);
        assert_eq!(settings.profile, Profile::Default);
        assert!(settings.use_bframes);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let settings = EncoderSettings::from_yaml_str(
            "rate_control: vbr\nbitrate_kbps: 6000\nprofile: high\n",
        )
        .unwrap();
        assert_eq!(settings.rate_control, RateControlMode::Abr);
        assert_eq!(settings.bitrate_kbps, 6000);
        assert_eq!(settings.profile, Profile::High);
        assert_eq!(settings.quality, 60);
    }

    #[test]
    fn test_load_and_load_or_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("encoder.yaml");

        assert!(EncoderSettings::load(&path).is_err());
        assert_eq!(
            EncoderSettings::load_or_default(&path),
            EncoderSettings::default()
        );

        std::fs::write(&path, "bitrate_kbps: 8000\nuse_bframes: false\n").unwrap();
        let settings = EncoderSettings::load(&path).unwrap();
        assert_eq!(settings.bitrate_kbps, 8000);
        assert!(!settings.use_bframes);

        std::fs::write(&path, "bitrate_kbps: [not a number\n").unwrap();
        assert!(matches!(
            EncoderSettings::load(&path),
            Err(EncoderError::Configuration(_))
        ));
        assert_eq!(
            EncoderSettings::load_or_default(&path),
            EncoderSettings::default()
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(EncoderSettings::default().with_quality(101).validate().is_err());
        assert!(EncoderSettings::default().with_async_depth(0).validate().is_err());
        assert!(EncoderSettings::default().with_bitrate(0).validate().is_err());
        assert!(EncoderSettings::default()
            .with_rate_control(RateControlMode::Abr)
            .with_max_bitrate(4000, 0.0)
            .validate()
            .is_err());
        assert!(EncoderSettings::default()
            .with_rate_control(RateControlMode::Crf)
            .with_bitrate(0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_classify_change() {
        let base = EncoderSettings::default();
        assert_eq!(base.classify_change(&base.clone()), ChangeKind::None);
        assert_eq!(
            base.classify_change(&base.clone().with_bitrate(6000)),
            ChangeKind::Soft
        );
        assert_eq!(
            base.classify_change(&base.clone().with_max_bitrate(5000, 2.0)),
            ChangeKind::Soft
        );
        assert_eq!(
            base.classify_change(&base.clone().with_profile(Profile::High)),
            ChangeKind::Hard
        );
        assert_eq!(
            base.classify_change(&base.clone().with_bitrate(6000).with_bframes(false)),
            ChangeKind::Hard
        );
    }
}
