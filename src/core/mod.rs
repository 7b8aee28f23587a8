//! Core functionality for the Ready4Sky bridge
//! This module contains the bluetooth transport, the vendor protocol and
//! the appliance state model.

pub mod appliance;
pub mod bluetooth;
pub mod protocol;

// Re-export commonly used types
pub use appliance::{ApplianceMode, ApplianceState, ApplianceStatus};
pub use bluetooth::BluetoothManager;
pub use protocol::{DeviceHandle, DeviceType};
