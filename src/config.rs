//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (`{}`) is a valid
//! configuration. Keys are camelCase to match the zone and location payloads.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mapper::IntensityRange;

/// Upper bound on either fade ramp, in seconds.
pub const MAX_FADE_SECS: f64 = 10.0;

/// Which kind of voice a newly activated zone gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundMode {
    /// Periodic synthesized clicks; zone intensity drives the click rate.
    Click,
    /// Looped samples; zone intensity selects the sample.
    Loop,
}

impl fmt::Display for SoundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoundMode::Click => write!(f, "click"),
            SoundMode::Loop => write!(f, "loop"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of concurrently sounding voices.
    pub voice_capacity: usize,
    /// Driver tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// GeoJSON feature property carrying the zone intensity.
    pub intensity_property: String,
    /// Range used when no zone carries a numeric intensity.
    pub fallback_range: [f64; 2],
    /// Click rate range in Hz, `[slowest, fastest]`.
    pub rate_range: [f64; 2],
    /// Shaping exponent applied to the normalized intensity.
    pub gamma: f64,
    /// Number of loop samples; sample ids are `1..=sample_count`.
    pub sample_count: u32,
    /// Asset name for a sample id, `{}` is replaced by the id.
    pub sample_pattern: String,
    /// Fade-in ramp length in seconds.
    pub fade_in_secs: f64,
    /// Fade-out ramp length in seconds.
    pub fade_out_secs: f64,
    /// Minimum spacing between two output resume attempts.
    pub resume_backoff_ms: u64,
    /// Sound mode at startup.
    pub mode: SoundMode,
    /// Per-subject history cap of the in-memory location store.
    pub max_points_per_subject: usize,
    /// Relative pitch/level jitter inside click synthesis.
    pub click_jitter: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice_capacity: 6,
            tick_interval_ms: 1200,
            sample_rate: 44_100,
            intensity_property: "DN".to_string(),
            fallback_range: [0.0, 1.0],
            rate_range: [1.0, 18.0],
            gamma: 1.0,
            sample_count: 3,
            sample_pattern: "zone_sound{}.mp3".to_string(),
            fade_in_secs: 0.15,
            fade_out_secs: 0.12,
            resume_backoff_ms: 1000,
            mode: SoundMode::Loop,
            max_points_per_subject: 1000,
            click_jitter: 0.05,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voice_capacity == 0 {
            return Err(ConfigError::Invalid("voiceCapacity must be at least 1".into()));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sampleRate must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tickIntervalMs must be positive".into()));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "gamma must be a positive number, got {}",
                self.gamma
            )));
        }
        if self.rate_range.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "rateRange must hold positive rates, got {:?}",
                self.rate_range
            )));
        }
        if self.sample_count == 0 {
            return Err(ConfigError::Invalid("sampleCount must be at least 1".into()));
        }
        if self.fallback_range.iter().any(|r| !r.is_finite()) {
            return Err(ConfigError::Invalid("fallbackRange must be finite".into()));
        }
        if !(self.fade_in_secs.is_finite() && (0.0..=MAX_FADE_SECS).contains(&self.fade_in_secs)) {
            return Err(ConfigError::Invalid(format!(
                "fadeInSecs must be within 0..={MAX_FADE_SECS}, got {}",
                self.fade_in_secs
            )));
        }
        // a stop always ramps; zero would cut the voice
        if !(self.fade_out_secs.is_finite()
            && self.fade_out_secs > 0.0
            && self.fade_out_secs <= MAX_FADE_SECS)
        {
            return Err(ConfigError::Invalid(format!(
                "fadeOutSecs must be above 0 and at most {MAX_FADE_SECS}, got {}",
                self.fade_out_secs
            )));
        }
        if !(self.click_jitter.is_finite() && (0.0..1.0).contains(&self.click_jitter)) {
            return Err(ConfigError::Invalid(format!(
                "clickJitter must be within 0..1, got {}",
                self.click_jitter
            )));
        }
        if self.max_points_per_subject == 0 {
            return Err(ConfigError::Invalid("maxPointsPerSubject must be at least 1".into()));
        }
        Ok(())
    }

    pub fn fallback_range(&self) -> IntensityRange {
        IntensityRange::new(self.fallback_range[0], self.fallback_range[1])
    }

    /// Asset name of a 1-based sample id.
    pub fn sample_name(&self, sample_id: u32) -> String {
        sample_asset_name(&self.sample_pattern, sample_id)
    }

    /// Number of output frames produced per driver tick.
    pub fn frames_per_tick(&self) -> usize {
        (self.sample_rate as u64 * self.tick_interval_ms / 1000) as usize
    }
}

/// Substitute `{}` in an asset pattern with the sample id.
pub fn sample_asset_name(pattern: &str, sample_id: u32) -> String {
    pattern.replace("{}", &sample_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.voice_capacity, 6);
        assert_eq!(config.tick_interval_ms, 1200);
        assert_eq!(config.intensity_property, "DN");
        assert_eq!(config.mode, SoundMode::Loop);
    }

    #[test]
    fn camel_case_keys_override() {
        let config =
            EngineConfig::from_json_str(r#"{"voiceCapacity": 2, "mode": "click", "gamma": 2.0}"#)
                .unwrap();
        assert_eq!(config.voice_capacity, 2);
        assert_eq!(config.mode, SoundMode::Click);
        assert!((config.gamma - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = EngineConfig::from_json_str(r#"{"voiceCapacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn negative_gamma_rejected() {
        assert!(EngineConfig::from_json_str(r#"{"gamma": -1.0}"#).is_err());
    }

    #[test]
    fn fade_out_must_be_a_bounded_ramp() {
        for json in [
            r#"{"fadeOutSecs": 0}"#,
            r#"{"fadeOutSecs": -3}"#,
            r#"{"fadeOutSecs": 1e300}"#,
        ] {
            let err = EngineConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{json} gave {err:?}");
        }
        let config = EngineConfig::from_json_str(r#"{"fadeOutSecs": 0.5}"#).unwrap();
        assert!((config.fade_out_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fade_in_may_be_zero_but_not_negative() {
        assert!(EngineConfig::from_json_str(r#"{"fadeInSecs": 0}"#).is_ok());
        assert!(EngineConfig::from_json_str(r#"{"fadeInSecs": -0.1}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"fadeInSecs": 86400}"#).is_err());
    }

    #[test]
    fn click_jitter_outside_unit_range_rejected() {
        assert!(EngineConfig::from_json_str(r#"{"clickJitter": -0.2}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"clickJitter": 1.5}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"clickJitter": 0}"#).is_ok());
    }

    #[test]
    fn sample_name_substitutes_id() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_name(2), "zone_sound2.mp3");
    }

    #[test]
    fn frames_per_tick_matches_interval() {
        let config = EngineConfig {
            sample_rate: 1000,
            tick_interval_ms: 1200,
            ..EngineConfig::default()
        };
        assert_eq!(config.frames_per_tick(), 1200);
    }
}
