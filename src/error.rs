use crate::types::DeviceId;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while relaying commands to studio hardware
#[derive(Error, Debug)]
pub enum RelayError {
    /// The device did not reply within the response deadline
    #[error("Request timeout")]
    Timeout,

    /// Send, connect or receive failure on a device transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A switcher command was issued while the link is down
    #[error("Switcher not connected")]
    NotConnected,

    /// A device reply could not be interpreted
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// The target device is not part of the configured roster
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The device channel or connection was shut down
    #[error("Connection closed")]
    ConnectionClosed,

    /// WebSocket error on an observer connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
