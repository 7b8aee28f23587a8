//! Error types shared by the transport and protocol layers.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::core::bluetooth::Transport) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("write failed: {0}")]
    Write(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("GATT service or characteristic not found: {0}")]
    ServiceNotFound(String),
}

/// Errors surfaced by the protocol engine and its composite operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connection retries were exhausted.
    #[error("connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    /// The appliance rejected the key or never answered the handshake.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),

    /// No notification with the expected command byte arrived in time.
    #[error("no response to command 0x{command:02x} within {timeout_ms} ms")]
    RequestTimeout { command: u8, timeout_ms: u64 },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The notification channel closed while a request was outstanding.
    #[error("link to the appliance was lost")]
    Disconnected,

    /// The advertised model name has no entry in the model table.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// A step of a composite operation failed and the remaining steps were skipped.
    #[error("{operation} aborted at step {step}: {source}")]
    OperationAborted {
        operation: &'static str,
        step: usize,
        source: Box<ProtocolError>,
    },

    /// The shared secret is not exactly 16 hex characters.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// Returns the innermost error of an aborted composite operation.
    pub fn root_cause(&self) -> &ProtocolError {
        match self {
            Self::OperationAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(reason) | TransportError::ServiceNotFound(reason) => {
                Self::ConnectionFailed { attempts: 1, reason }
            }
            TransportError::RetriesExhausted { attempts, last } => Self::ConnectionFailed {
                attempts,
                reason: last,
            },
            TransportError::Write(reason) => Self::WriteFailed(reason),
            TransportError::Disconnect(reason) => Self::DisconnectFailed(reason),
            TransportError::NotConnected => Self::WriteFailed("transport is not connected".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_aborts() {
        let err = ProtocolError::OperationAborted {
            operation: "turn_on",
            step: 2,
            source: Box::new(ProtocolError::RequestTimeout {
                command: 0x03,
                timeout_ms: 2000,
            }),
        };
        assert_eq!(
            err.root_cause(),
            &ProtocolError::RequestTimeout {
                command: 0x03,
                timeout_ms: 2000
            }
        );
    }

    #[test]
    fn write_errors_map_to_write_failed() {
        let err: ProtocolError = TransportError::Write("gatt busy".into()).into();
        assert!(matches!(err, ProtocolError::WriteFailed(_)));
    }

    #[test]
    fn disconnect_errors_keep_their_meaning() {
        let err: ProtocolError = TransportError::Disconnect("adapter gone".into()).into();
        assert_eq!(err, ProtocolError::DisconnectFailed("adapter gone".into()));
        assert_eq!(err.to_string(), "disconnect failed: adapter gone");
    }
}
