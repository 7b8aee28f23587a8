use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, AdvertisingDevice, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio::time::Instant;

use crate::core::bluetooth::types::BluetoothDevice;

/// A device seen during discovery together with its advertised name.
#[derive(Clone)]
pub struct DiscoveredDevice {
    pub device: Device,
    pub info: BluetoothDevice,
}

pub struct BluetoothScanner {
    adapter: Adapter,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Scans for `duration` and returns every named device seen, keyed by id.
    pub async fn discover(&self, duration: Duration) -> Result<Vec<BluetoothDevice>> {
        let mut found: HashMap<String, BluetoothDevice> = HashMap::new();
        self.scan_until(duration, |discovered| {
            found
                .entry(discovered.info.id.clone())
                .or_insert(discovered.info);
            false
        })
        .await?;

        let mut devices: Vec<_> = found.into_values().collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(devices)
    }

    /// Finds the device with the given MAC address. Already-connected
    /// devices are checked first, then the adapter scans for `timeout`.
    pub async fn find_device(&self, address: &str, timeout: Duration) -> Result<DiscoveredDevice> {
        let wanted = address.to_uppercase();

        info!("Checking for connected devices");
        for device in self.adapter.connected_devices().await? {
            let info = Self::describe(&device, None, None);
            if info.address == wanted {
                info!("Device {} is already connected", wanted);
                return Ok(DiscoveredDevice { device, info });
            }
        }

        let mut result = None;
        self.scan_until(timeout, |discovered| {
            if discovered.info.address == wanted {
                result = Some(discovered);
                true
            } else {
                false
            }
        })
        .await?;

        result.ok_or_else(|| anyhow!("Device {} not found within {:?}", wanted, timeout))
    }

    /// Runs a scan until `on_device` returns true or `duration` elapses.
    async fn scan_until<F>(&self, duration: Duration, mut on_device: F) -> Result<()>
    where
        F: FnMut(DiscoveredDevice) -> bool,
    {
        info!("Starting bluetooth scan");
        let mut scan_stream = self.adapter.scan(&[]).await?;
        let deadline = Instant::now() + duration;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(AdvertisingDevice { device, adv_data, rssi }) => {
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, rssi);
                            let info = Self::describe(&device, adv_data.local_name.clone(), rssi);
                            if info.name.is_empty() {
                                continue;
                            }
                            if on_device(DiscoveredDevice { device, info }) {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Scan window of {:?} elapsed", duration);
                    break;
                }
            }
        }
        Ok(())
    }

    fn describe(device: &Device, local_name: Option<String>, rssi: Option<i16>) -> BluetoothDevice {
        let name = local_name
            .or_else(|| device.name().ok())
            .unwrap_or_default();
        let id = device.id().to_string();
        let address = extract_mac_address(&id).unwrap_or_else(|| id.clone());
        BluetoothDevice::new(id, name, address, rssi)
    }
}

/// Pulls a MAC address out of a platform device id string.
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_mac_from_platform_ids() {
        assert_eq!(
            extract_mac_address("/org/bluez/hci0/dev_C3_11_22_33_44_55 (c3:11:22:33:44:55)"),
            Some("C3:11:22:33:44:55".to_string())
        );
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-e8-1f-2a-3b-4c-5d"),
            Some("E8:1F:2A:3B:4C:5D".to_string())
        );
        assert_eq!(extract_mac_address("7B1F0C1E-5A2B-4F86"), None);
    }
}
