//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the prayer-config.toml file.
//! It provides a centralized way to configure how the location is found, which remote
//! service is queried, and how often the countdown is refreshed.

use crate::Coordinates;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory
pub const CONFIG_FILE: &str = "prayer-config.toml";

/// Application configuration loaded from prayer-config.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Where the coordinates come from
    pub location: LocationConfig,
    /// Remote prayer-time service
    pub remote: RemoteConfig,
    /// Countdown refresh
    pub schedule: ScheduleConfig,
}

/// How the location is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationProvider {
    /// IP-based geolocation lookup
    Ip,
    /// The `latitude`/`longitude` pair from this file
    Fixed,
    /// No location capability; always use the fallback
    None,
}

/// Location configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationConfig {
    pub provider: LocationProvider,
    /// Fixed latitude, used when `provider = "fixed"`
    pub latitude: Option<f64>,
    /// Fixed longitude, used when `provider = "fixed"`
    pub longitude: Option<f64>,
    /// Human-readable name of the fallback location
    pub fallback_name: String,
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
    /// Upper bound on the single location attempt
    pub timeout_secs: u64,
    /// Civil clock offset from UTC in minutes; the host's local offset when unset
    pub utc_offset_minutes: Option<i32>,
}

/// Remote service configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Set false to always compute locally
    pub enabled: bool,
    /// Base URL of the timings API
    pub base_url: String,
    /// Calculation method identifier sent with every request
    pub method: u8,
    /// Bounded wait before falling back to local computation
    pub timeout_secs: u64,
}

/// Countdown refresh configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between countdown recomputations
    pub tick_seconds: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            provider: LocationProvider::Ip,
            latitude: None,
            longitude: None,
            fallback_name: "Kuala Lumpur".to_string(),
            fallback_latitude: 3.1390,
            fallback_longitude: 101.6869,
            timeout_secs: 10,
            utc_offset_minutes: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            enabled: true,
            base_url: "https://api.aladhan.com/v1".to_string(),
            method: 3,
            timeout_secs: 10,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig { tick_seconds: 60 }
    }
}

impl LocationConfig {
    pub fn fallback(&self) -> Coordinates {
        Coordinates::new(self.fallback_latitude, self.fallback_longitude)
    }

    /// The configured fixed position, if both components are present.
    pub fn fixed(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.latitude?, self.longitude?))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Configured civil clock offset, if set and within ±24h.
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        let minutes = self.utc_offset_minutes?;
        let offset = minutes.checked_mul(60).and_then(FixedOffset::east_opt);
        if offset.is_none() {
            warn!(minutes, "ignoring out-of-range utc_offset_minutes");
        }
        offset
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl ScheduleConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }
}

impl Config {
    /// Load configuration from prayer-config.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), provider = ?config.location.provider, "loaded configuration");
                    config
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "invalid config file format; using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found; using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to prayer-config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(CONFIG_FILE)
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.location.provider, LocationProvider::Ip);
        assert_eq!(config.location.fallback_name, "Kuala Lumpur");
        assert_eq!(config.location.fallback(), Coordinates::new(3.1390, 101.6869));
        assert_eq!(config.remote.method, 3);
        assert_eq!(config.remote.base_url, "https://api.aladhan.com/v1");
        assert_eq!(config.schedule.tick(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.location.provider = LocationProvider::Fixed;
        config.location.latitude = Some(21.4225);
        config.location.longitude = Some(39.8262);
        config.remote.timeout_secs = 4;

        config.save_to_path(temp_file.path()).unwrap();
        let loaded = Config::load_from_path(temp_file.path());

        assert_eq!(loaded, config);
        assert_eq!(
            loaded.location.fixed(),
            Some(Coordinates::new(21.4225, 39.8262))
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [remote]
            enabled = false

            [schedule]
            tick_seconds = 30
            "#,
        )
        .unwrap();

        assert!(!parsed.remote.enabled);
        assert_eq!(parsed.remote.method, 3);
        assert_eq!(parsed.schedule.tick_seconds, 30);
        assert_eq!(parsed.location, LocationConfig::default());
    }

    #[test]
    fn test_fixed_requires_both_components() {
        let config = LocationConfig {
            latitude: Some(1.0),
            ..LocationConfig::default()
        };
        assert_eq!(config.fixed(), None);
    }

    #[test]
    fn test_utc_offset() {
        let mut config = LocationConfig::default();
        assert_eq!(config.utc_offset(), None);

        config.utc_offset_minutes = Some(480);
        assert_eq!(config.utc_offset(), FixedOffset::east_opt(8 * 3600));

        config.utc_offset_minutes = Some(-330);
        assert_eq!(config.utc_offset(), FixedOffset::west_opt(330 * 60));

        config.utc_offset_minutes = Some(24 * 60);
        assert_eq!(config.utc_offset(), None);
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let remote = RemoteConfig {
            timeout_secs: 0,
            ..RemoteConfig::default()
        };
        assert_eq!(remote.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "location = [not toml").unwrap();
        assert_eq!(Config::load_from_path(temp_file.path()), Config::default());
    }
}
