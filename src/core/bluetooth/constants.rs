//! Constants used throughout the application
//! This module contains the GATT UUIDs of the appliance UART service and the
//! retry, timeout and scheduling values of the protocol.

use uuid::Uuid;

/// The vendor UART-like service exposed by every supported appliance
pub const UUID_UART_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Write characteristic carrying requests to the appliance
pub const UUID_UART_WRITE_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Notify characteristic carrying responses from the appliance
pub const UUID_UART_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Maximum number of connection attempts
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Backoff step between connection attempts; attempt n waits n steps
pub const CONNECT_RETRY_STEP_MS: u64 = 1000;

/// Upper bound for a single connection attempt
pub const CONNECT_ATTEMPT_TIMEOUT_SECS: u64 = 3;

/// Wait for a response to an ordinary request
pub const REQUEST_TIMEOUT_MS: u64 = 2000;

/// Wait for the AUTH response
pub const AUTH_TIMEOUT_MS: u64 = 2000;

/// Delay before the physical disconnect
pub const DISCONNECT_LINGER_MS: u64 = 2000;

/// Authentication attempts during initial setup
pub const SETUP_AUTH_ATTEMPTS: u32 = 10;

/// Pause between setup authentication attempts
pub const SETUP_AUTH_RETRY_DELAY_MS: u64 = 1000;

/// Attempts of the cooker timer operation before giving up
pub const TIMER_RETRY_ATTEMPTS: u32 = 5;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Periodic refresh interval
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const MIN_SCAN_INTERVAL_SECS: u64 = 10;
pub const MAX_SCAN_INTERVAL_SECS: u64 = 300;
