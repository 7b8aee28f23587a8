//! Transport seam between the protocol engine and the radio.

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Raw notification payloads, in the order the radio delivered them.
pub type NotificationStream = mpsc::UnboundedReceiver<Vec<u8>>;

/// A byte pipe to one appliance: a write characteristic for requests and a
/// notify characteristic whose updates are pushed onto a channel.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Opens the link. Retries are the transport's business; an error here
    /// means they are exhausted.
    async fn connect(&mut self) -> Result<NotificationStream, TransportError>;

    /// Writes one frame, single attempt.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Closes the link after the linger delay.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
