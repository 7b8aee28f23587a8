pub mod device_config;

use std::path::Path;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use device_config::DeviceConfig;

pub const CONFIG_FILE_NAME: &str = "ready4sky.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub devices: Vec<DeviceConfig>,
}

impl AppConfig {
    /// Loads the config from a configuration file.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!(
            "Config with {} device(s) loaded from {:?}",
            config.devices.len(),
            file_path
        );
        Ok(config)
    }

    /// Saves the config, creating the parent directory if needed.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        let missing_dir = file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty() && !dir.exists());
        if let Some(dir) = missing_dir {
            if let Err(e) = fs::create_dir_all(dir).await {
                error!("Failed to create config directory {:?}: {}", dir, e);
                return Err(e.into());
            }
            info!("Created config directory {:?}", dir);
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.devices.iter().try_for_each(DeviceConfig::validate)
    }

    /// The device with the given MAC, or the first one when `mac` is `None`.
    pub fn device(&self, mac: Option<&str>) -> Result<&DeviceConfig> {
        match mac {
            Some(mac) => self
                .devices
                .iter()
                .find(|device| device.mac.eq_ignore_ascii_case(mac))
                .ok_or_else(|| anyhow!("No device {} in config", mac)),
            None => self
                .devices
                .first()
                .ok_or_else(|| anyhow!("Config lists no devices")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("ready4sky-test-{}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_gives_default() {
        let config = AppConfig::load_config(temp_path("absent.json")).await.unwrap();
        assert!(config.devices.is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let path = temp_path(CONFIG_FILE_NAME);
        let mut device = DeviceConfig::new("C3:11:22:33:44:55", "0123456789abcdef");
        device.model = Some("RK-G211S".into());
        let config = AppConfig {
            devices: vec![device],
        };

        config.save_config(&path).await.unwrap();
        let loaded = AppConfig::load_config(&path).await.unwrap();

        assert_eq!(loaded, config);
        loaded.validate().unwrap();
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn save_creates_missing_directories() {
        let path = temp_path("nested/deeper").join(CONFIG_FILE_NAME);

        AppConfig::default().save_config(&path).await.unwrap();

        assert!(path.exists());
        let _ = fs::remove_file(&path).await;
    }

    #[test]
    fn selects_device_by_mac() {
        let config = AppConfig {
            devices: vec![
                DeviceConfig::new("C3:11:22:33:44:55", "0123456789abcdef"),
                DeviceConfig::new("C3:11:22:33:44:66", "fedcba9876543210"),
            ],
        };
        assert_eq!(
            config.device(Some("c3:11:22:33:44:66")).unwrap().key,
            "fedcba9876543210"
        );
        assert_eq!(config.device(None).unwrap().mac, "C3:11:22:33:44:55");
        assert!(config.device(Some("00:00:00:00:00:00")).is_err());
        assert!(AppConfig::default().device(None).is_err());
    }
}
