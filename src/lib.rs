//! Ready4Sky Bridge library
//! Drives Ready4Sky kettles, multicookers, humidifiers and heaters over
//! Bluetooth Low Energy.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;

pub use crate::core::{ApplianceState, BluetoothManager, DeviceHandle, DeviceType};
pub use crate::error::{ProtocolError, TransportError};
