use std::time::Duration;

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_SCAN_DURATION_SECS, DEFAULT_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS,
    MIN_SCAN_INTERVAL_SECS,
};
use crate::core::protocol::{EngineOptions, HandleOptions, SecretKey};

/// One paired appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address, `AA:BB:CC:DD:EE:FF`.
    pub mac: String,

    /// Shared secret, 16 hex characters.
    pub key: String,

    /// Seconds between background refreshes.
    pub scan_interval_secs: u64,

    /// Backlight of backlit kettles. Clock sync is skipped when off.
    pub use_backlight: bool,

    /// Offset sent with the clock sync.
    pub timezone_offset_hours: i8,

    /// Advertised model name, for when discovery cannot see it.
    pub model: Option<String>,

    /// How long to scan for the device before giving up.
    pub scan_timeout_secs: u64,

    /// Close the link after this many idle seconds; 0 keeps it open.
    pub idle_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac: String::new(),
            key: String::new(),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            use_backlight: true,
            timezone_offset_hours: 0,
            model: None,
            scan_timeout_secs: DEFAULT_SCAN_DURATION_SECS,
            idle_timeout_secs: 0,
        }
    }
}

impl DeviceConfig {
    pub fn new(mac: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mac_re = Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$")?;
        if !mac_re.is_match(&self.mac) {
            bail!("Invalid MAC address {:?}", self.mac);
        }

        let key_re = Regex::new(r"^[0-9A-Fa-f]{16}$")?;
        if !key_re.is_match(&self.key) {
            bail!("Key of {} must be exactly 16 hex characters", self.mac);
        }

        let interval = MIN_SCAN_INTERVAL_SECS..=MAX_SCAN_INTERVAL_SECS;
        if !interval.contains(&self.scan_interval_secs) {
            bail!(
                "Scan interval {}s outside {}..={}s",
                self.scan_interval_secs,
                MIN_SCAN_INTERVAL_SECS,
                MAX_SCAN_INTERVAL_SECS
            );
        }

        if !(-12..=14).contains(&self.timezone_offset_hours) {
            bail!("Timezone offset {}h out of range", self.timezone_offset_hours);
        }
        Ok(())
    }

    pub fn secret_key(&self) -> Result<SecretKey> {
        Ok(SecretKey::parse(&self.key)?)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            use_backlight: self.use_backlight,
            timezone_offset_secs: i32::from(self.timezone_offset_hours) * 3600,
            ..EngineOptions::default()
        }
    }

    pub fn handle_options(&self) -> HandleOptions {
        HandleOptions {
            refresh_interval: Duration::from_secs(self.scan_interval_secs),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DeviceConfig {
        DeviceConfig::new("C3:11:22:33:44:55", "0123456789abcdef")
    }

    #[test]
    fn defaults_pass_validation() {
        let config = valid();
        config.validate().unwrap();
        assert_eq!(config.scan_interval_secs, 60);
        assert!(config.use_backlight);
    }

    #[test]
    fn rejects_bad_fields() {
        let mut config = valid();
        config.key = "0123".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.mac = "C3-11-22-33-44-55".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.scan_interval_secs = 5;
        assert!(config.validate().is_err());
        config.scan_interval_secs = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn options_follow_config() {
        let mut config = valid();
        config.use_backlight = false;
        config.timezone_offset_hours = 3;
        config.idle_timeout_secs = 90;

        let engine = config.engine_options();
        assert!(!engine.use_backlight);
        assert_eq!(engine.timezone_offset_secs, 10800);

        let handle = config.handle_options();
        assert_eq!(handle.refresh_interval, Duration::from_secs(60));
        assert_eq!(handle.idle_timeout, Some(Duration::from_secs(90)));
        assert_eq!(valid().handle_options().idle_timeout, None);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{"mac": "C3:11:22:33:44:55", "key": "0123456789abcdef"}"#)
                .unwrap();
        assert_eq!(config, valid());
    }
}
