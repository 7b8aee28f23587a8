//! Defines shared data structures for the Bluetooth module.

use bluest::{Characteristic, Device};

use crate::core::protocol::DeviceType;

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, serde::Serialize)]
pub struct BluetoothDevice {
    /// The advertised name, used to resolve the appliance family
    pub name: String,
    /// The MAC address if it could be recovered from the platform id
    pub address: String,
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    /// Appliance family, if the name is in the model table
    pub device_type: Option<DeviceType>,
}

impl BluetoothDevice {
    /// Creates a new BluetoothDevice instance
    pub fn new(id: String, name: String, address: String, rssi: Option<i16>) -> Self {
        let device_type = DeviceType::from_model_name(&name).ok();
        Self {
            id,
            name,
            address,
            rssi,
            device_type,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.device_type.is_some()
    }
}

/// Represents the state of a successfully connected device.
/// This struct holds the active handles needed for interaction.
#[derive(Clone)]
pub struct ConnectedDeviceState {
    /// The device handle, used for checking connection status or disconnecting.
    pub device: Device,
    /// The characteristic handle for receiving notifications from the device.
    pub notify_characteristic: Characteristic,
    /// The characteristic handle for writing commands to the device.
    pub write_characteristic: Characteristic,
}
