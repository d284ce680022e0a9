//! # Simulation Configuration
//!
//! Loaded once from TOML at startup. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! capacity = 16384
//! max_cascade_depth = 16
//! seconds_per_hour = "0.25"
//! speed = 1
//! start_year = 1444
//!
//! [[tiers]]
//! max_relevance = 2
//! interval = 1
//!
//! [[tiers]]
//! max_relevance = 4294967295
//! interval = 24
//! ```

use std::path::Path;

use regnum_core::{FixedPoint64, MAX_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::{validate_tiers, TierConfig};

/// Startup configuration of a [`crate::Simulation`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Entity slots allocated up front.
    pub capacity: usize,
    /// Event passes allowed per `process` call.
    pub max_cascade_depth: u32,
    /// Initial queue capacity per event type.
    pub event_queue_capacity: usize,
    /// Real seconds per simulated hour at speed 1.
    pub seconds_per_hour: FixedPoint64,
    /// Initial speed multiplier.
    pub speed: FixedPoint64,
    /// Catch-up cap per `advance` call.
    pub max_ticks_per_advance: u32,
    /// Calendar year of tick 0.
    pub start_year: i32,
    /// Ticks of executed commands kept for replay and rejection queries.
    pub command_history_ticks: usize,
    /// Ticks of checksums kept for peer comparison.
    pub checksum_history_ticks: usize,
    /// Periodic work tiers, most relevant first.
    pub tiers: Vec<TierConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capacity: 16_384,
            max_cascade_depth: 16,
            event_queue_capacity: 256,
            seconds_per_hour: FixedPoint64::ONE,
            speed: FixedPoint64::ONE,
            max_ticks_per_advance: 24,
            start_year: 1444,
            command_history_ticks: 64,
            checksum_history_ticks: 256,
            tiers: vec![
                TierConfig { max_relevance: 2, interval: 1 },
                TierConfig { max_relevance: 8, interval: 6 },
                TierConfig { max_relevance: u32::MAX, interval: 24 },
            ],
        }
    }
}

impl SimConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`SimConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "capacity {} outside 1..={MAX_CAPACITY}",
                self.capacity
            )));
        }
        if self.max_cascade_depth == 0 {
            return Err(ConfigError::Invalid("max_cascade_depth must be at least 1".into()));
        }
        if self.seconds_per_hour <= FixedPoint64::ZERO {
            return Err(ConfigError::Invalid(format!(
                "seconds_per_hour must be positive, got {}",
                self.seconds_per_hour
            )));
        }
        if self.speed.is_negative() {
            return Err(ConfigError::Invalid(format!(
                "speed must not be negative, got {}",
                self.speed
            )));
        }
        if self.max_ticks_per_advance == 0 {
            return Err(ConfigError::Invalid("max_ticks_per_advance must be at least 1".into()));
        }
        if self.checksum_history_ticks == 0 {
            return Err(ConfigError::Invalid("checksum_history_ticks must be at least 1".into()));
        }
        validate_tiers(&self.tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
        assert_eq!(SimConfig::from_toml_str("").unwrap(), SimConfig::default());
    }

    #[test]
    fn test_parse() {
        let config = SimConfig::from_toml_str(
            r#"
            capacity = 1024
            seconds_per_hour = "0.25"
            speed = 2
            start_year = 1066

            [[tiers]]
            max_relevance = 0
            interval = 1

            [[tiers]]
            max_relevance = 10
            interval = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.seconds_per_hour, FixedPoint64::from_ratio(1, 4).unwrap());
        assert_eq!(config.speed, FixedPoint64::from_int(2));
        assert_eq!(config.start_year, 1066);
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.max_cascade_depth, 16);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            "capacity = 0",
            "capacity = 1000000",
            "max_cascade_depth = 0",
            "seconds_per_hour = 0",
            "seconds_per_hour = \"-1.5\"",
            "speed = -1",
            "tiers = []",
            "[[tiers]]\nmax_relevance = 1\ninterval = 0",
        ];
        for case in cases {
            assert!(
                matches!(SimConfig::from_toml_str(case), Err(ConfigError::Invalid(_))),
                "{case} should be invalid"
            );
        }
    }

    #[test]
    fn test_rejects_unknown_and_float_fields() {
        assert!(matches!(
            SimConfig::from_toml_str("capactiy = 5"),
            Err(ConfigError::Parse(_))
        ));
        // Floats would make the clock platform-dependent.
        assert!(matches!(
            SimConfig::from_toml_str("speed = 1.5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SimConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(SimConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SimConfig::load("/nonexistent/regnum.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
