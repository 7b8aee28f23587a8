//! Bluetooth functionality for Ready4Sky appliances
//! This module handles all bluetooth operations including scanning,
//! connecting, and moving raw frames to and from the appliance.

pub mod connection;
pub mod constants;
mod manager;
mod notification;
pub mod scanner;
pub mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use connection::{BluestTransport, ConnectionManager, RetryPolicy};
pub use manager::BluetoothManager;
pub use notification::NotificationHandler;
pub use scanner::BluetoothScanner;
pub use transport::{NotificationStream, Transport};
pub use types::{BluetoothDevice, ConnectedDeviceState};
