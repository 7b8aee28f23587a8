//! Bluetooth connection handling for the appliance
//! This module handles connecting to and disconnecting from the appliance,
//! and implements [`Transport`] on top of bluest.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use bluest::{Adapter, Device};
use log::{debug, info, warn};

use crate::core::bluetooth::constants::{
    CONNECT_ATTEMPT_TIMEOUT_SECS, CONNECT_RETRY_STEP_MS, DISCONNECT_LINGER_MS,
    MAX_CONNECT_RETRIES, UUID_UART_NOTIFY_CHAR, UUID_UART_SERVICE, UUID_UART_WRITE_CHAR,
};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::transport::{NotificationStream, Transport};
use crate::core::bluetooth::types::ConnectedDeviceState;
use crate::error::TransportError;

/// Bounded retry with linearly increasing backoff: after failed attempt
/// `n` (1-based) the next one starts `n * step` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_CONNECT_RETRIES,
            step: Duration::from_millis(CONNECT_RETRY_STEP_MS),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, TransportError>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = String::from("no connection attempt made");

    for attempt in 1..=policy.attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("Connection attempt {} failed: {}", attempt, e);
                last_error = e.to_string();

                if attempt < policy.attempts {
                    let delay = policy.delay_after(attempt);
                    info!("Retrying connection in {} ms...", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(TransportError::RetriesExhausted {
        attempts: policy.attempts,
        last: last_error,
    })
}

/// Connection manager for one adapter
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Adapter,
    retry: RetryPolicy,
    linger: Duration,
}

impl ConnectionManager {
    pub fn new(adapter: Adapter, retry: RetryPolicy, linger: Duration) -> Self {
        Self {
            adapter,
            retry,
            linger,
        }
    }

    pub fn with_defaults(adapter: Adapter) -> Self {
        Self::new(
            adapter,
            RetryPolicy::default(),
            Duration::from_millis(DISCONNECT_LINGER_MS),
        )
    }

    /// Connect to the appliance with retry mechanism
    pub async fn connect_with_retry(
        &self,
        device: &Device,
    ) -> Result<ConnectedDeviceState, TransportError> {
        retry_with_backoff(self.retry, |attempt| async move {
            debug!("Connection attempt {}/{}", attempt, self.retry.attempts);
            match tokio::time::timeout(
                Duration::from_secs(CONNECT_ATTEMPT_TIMEOUT_SECS),
                self.try_connect(device),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Connect(format!(
                    "timed out after {} s",
                    CONNECT_ATTEMPT_TIMEOUT_SECS
                ))),
            }
        })
        .await
    }

    /// Try to connect to the appliance and locate the UART characteristics
    async fn try_connect(&self, device: &Device) -> Result<ConnectedDeviceState, TransportError> {
        let id = device.id().to_string();

        if !device.is_connected().await {
            info!("Initiating connection to {}...", id);
            self.adapter
                .connect_device(device)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        info!("Connection successful, discovering services...");
        let services = device
            .services()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let uart_service = services
            .iter()
            .find(|s| s.uuid() == UUID_UART_SERVICE)
            .cloned()
            .ok_or_else(|| {
                for service in &services {
                    debug!("Available service: {}", service.uuid());
                }
                TransportError::ServiceNotFound(UUID_UART_SERVICE.to_string())
            })?;

        let mut notify_char_opt = None;
        let mut write_char_opt = None;

        let characteristics = uart_service
            .characteristics()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        for characteristic in characteristics {
            let uuid = characteristic.uuid();
            if uuid == UUID_UART_NOTIFY_CHAR {
                debug!("Found notification characteristic: {}", uuid);
                notify_char_opt = Some(characteristic);
            } else if uuid == UUID_UART_WRITE_CHAR {
                debug!("Found write characteristic: {}", uuid);
                write_char_opt = Some(characteristic);
            }
        }

        let notify_characteristic = notify_char_opt
            .ok_or_else(|| TransportError::ServiceNotFound(UUID_UART_NOTIFY_CHAR.to_string()))?;
        let write_characteristic = write_char_opt
            .ok_or_else(|| TransportError::ServiceNotFound(UUID_UART_WRITE_CHAR.to_string()))?;

        Ok(ConnectedDeviceState {
            device: device.clone(),
            notify_characteristic,
            write_characteristic,
        })
    }

    /// Disconnect from the appliance after the linger delay
    pub async fn disconnect(&self, device: &Device) -> Result<(), TransportError> {
        tokio::time::sleep(self.linger).await;

        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            self.adapter
                .disconnect_device(device)
                .await
                .map_err(|e| TransportError::Disconnect(e.to_string()))?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }
}

/// [`Transport`] over a bluest GATT connection.
pub struct BluestTransport {
    connection_manager: ConnectionManager,
    device: Device,
    notification_handler: NotificationHandler,
    connected: Option<ConnectedDeviceState>,
}

impl BluestTransport {
    pub fn new(connection_manager: ConnectionManager, device: Device) -> Self {
        Self {
            connection_manager,
            device,
            notification_handler: NotificationHandler::new(),
            connected: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for BluestTransport {
    async fn connect(&mut self) -> Result<NotificationStream, TransportError> {
        let state = self
            .connection_manager
            .connect_with_retry(&self.device)
            .await?;

        let stream = self
            .notification_handler
            .setup_notifications(state.notify_characteristic.clone())
            .await?;

        self.connected = Some(state);
        Ok(stream)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let state = self.connected.as_ref().ok_or(TransportError::NotConnected)?;
        state
            .write_characteristic
            .write(data)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.notification_handler.stop_notifications().await;
        match self.connected.take() {
            Some(state) => self.connection_manager.disconnect(&state.device).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn retries_with_linear_backoff_then_gives_up() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = retry_with_backoff(RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("radio busy") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(
            result,
            Err(TransportError::RetriesExhausted {
                attempts: 3,
                last: "radio busy".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_on_success() {
        let started = Instant::now();
        let result = retry_with_backoff(RetryPolicy::default(), |attempt| async move {
            if attempt < 2 {
                Err("not yet")
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
    }
}
