//! Bluetooth manager for Ready4Sky appliances
//! This module provides the main interface for bluetooth operations:
//! discovery and turning a configured device into a running handle.

use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::Adapter;
use log::info;

use crate::config::DeviceConfig;
use crate::core::bluetooth::connection::{BluestTransport, ConnectionManager};
use crate::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::BluetoothDevice;
use crate::core::protocol::{DeviceHandle, DeviceType, HandleOptions, ProtocolEngine, SecretKey};

/// Manages Bluetooth operations
pub struct BluetoothManager {
    /// Connection manager shared by every transport
    connection_manager: ConnectionManager,
    /// Bluetooth scanner
    scanner: BluetoothScanner,
}

impl BluetoothManager {
    /// Creates a new BluetoothManager on the default adapter
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            connection_manager: ConnectionManager::with_defaults(adapter.clone()),
            scanner: BluetoothScanner::new(adapter),
        })
    }

    /// Scans for nearby devices; supported appliances carry their family.
    pub async fn discover(&self, duration: Option<Duration>) -> Result<Vec<BluetoothDevice>> {
        let duration = duration.unwrap_or(Duration::from_secs(DEFAULT_SCAN_DURATION_SECS));
        self.scanner.discover(duration).await
    }

    /// Connects to `address` with the given key and default options.
    pub async fn connect(&self, address: &str, key: &str) -> Result<DeviceHandle<BluestTransport>> {
        self.connect_with_config(&DeviceConfig::new(address, key))
            .await
    }

    /// Resolves the appliance family, runs the first-connect sequence and
    /// starts the background refresh. The key is checked before the radio
    /// is touched.
    pub async fn connect_with_config(
        &self,
        config: &DeviceConfig,
    ) -> Result<DeviceHandle<BluestTransport>> {
        let key: SecretKey = config.secret_key()?;
        config.validate()?;

        let found = self
            .scanner
            .find_device(&config.mac, config.scan_timeout())
            .await?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| found.info.name.clone());
        let device_type = DeviceType::from_model_name(&model)?;
        info!(
            "Found {} ({}) at {}, family {}",
            model, found.info.id, config.mac, device_type
        );

        let transport = BluestTransport::new(self.connection_manager.clone(), found.device);
        let engine = ProtocolEngine::new(
            transport,
            device_type,
            model,
            key,
            config.engine_options(),
        );
        let options: HandleOptions = config.handle_options();
        Ok(DeviceHandle::start(engine, options).await?)
    }
}
