//! Notification handling for the appliance UART
//! This module subscribes to the notify characteristic and forwards every
//! update, unparsed and in delivery order, onto the engine's channel.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::NotificationStream;
use crate::error::TransportError;

/// Notification handler for one connection
#[derive(Default)]
pub struct NotificationHandler {
    cancel_token: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the characteristic and returns the receiving end of the
    /// notification channel. Returns only once the subscription is active so
    /// that no response to the first request can be missed.
    pub async fn setup_notifications(
        &mut self,
        notify_char: Characteristic,
    ) -> Result<NotificationStream, TransportError> {
        self.stop_notifications().await;

        info!("Subscribing to notifications...");
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();
        let cancel_for_task = cancel_token.clone();

        let handle = tokio::spawn(async move {
            Self::process_notifications(notify_char, tx, ready_tx, cancel_for_task).await;
        });

        self.cancel_token = Some(cancel_token);
        self.task_handle = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Connect(
                "notification task ended before subscribing".into(),
            )),
        }
    }

    /// Stops forwarding notifications. The receiver sees the channel close.
    pub async fn stop_notifications(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Notification task ended with an error: {:?}", e);
                }
            }
        }
    }

    /// Process notifications from the appliance
    async fn process_notifications(
        notify_char: Characteristic,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        ready_tx: oneshot::Sender<Result<(), TransportError>>,
        cancel_token: CancellationToken,
    ) {
        let mut notification_stream = match notify_char.notify().await {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = ready_tx.send(Err(TransportError::Connect(e.to_string())));
                return;
            }
        };

        info!("Listening for appliance notifications...");
        loop {
            tokio::select! {
                result = notification_stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            debug!("Received notification: {:02x?}", value);
                            if tx.send(value).is_err() {
                                debug!("Notification receiver dropped");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("Notification stream ended");
    }
}
