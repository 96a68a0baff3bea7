use std::error::Error;
use std::fmt::{self, Display};
use tokio_tungstenite::tungstenite::Error as TungsteniteError;

/// Custom error types for NetworkTables operations
#[derive(Debug)]
pub enum NtError {
    /// Error during connection establishment
    ConnectionError(String),
    /// Error with websocket communication
    WebsocketError(String),
    /// Error with MessagePack encoding
    MessagePackError(String),
    /// Error with JSON serialization/deserialization
    JsonError(String),
    /// The outgoing queue is full and the value was dropped
    QueueFull,
    /// The connection's socket tasks have stopped
    Disconnected,
    /// The server never announced a topic we asked to publish
    AnnounceTimeout(String),
    /// A batch was given a topic from another connection
    ForeignTopic(String),
}

impl Display for NtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtError::ConnectionError(msg) => write!(f, "Connection error: {msg}"),
            NtError::WebsocketError(msg) => write!(f, "Websocket error: {msg}"),
            NtError::MessagePackError(msg) => write!(f, "MessagePack error: {msg}"),
            NtError::JsonError(msg) => write!(f, "JSON error: {msg}"),
            NtError::QueueFull => write!(f, "Outgoing queue is full"),
            NtError::Disconnected => write!(f, "Disconnected from NT server"),
            NtError::AnnounceTimeout(name) => {
                write!(f, "Timed out waiting for the server to announce {name}")
            }
            NtError::ForeignTopic(name) => write!(f, "{name} belongs to another connection"),
        }
    }
}

impl Error for NtError {}

impl From<TungsteniteError> for NtError {
    fn from(err: TungsteniteError) -> Self {
        NtError::WebsocketError(err.to_string())
    }
}

impl From<serde_json::Error> for NtError {
    fn from(err: serde_json::Error) -> Self {
        NtError::JsonError(err.to_string())
    }
}

impl From<rmp::encode::ValueWriteError> for NtError {
    fn from(err: rmp::encode::ValueWriteError) -> Self {
        NtError::MessagePackError(err.to_string())
    }
}

impl From<std::io::Error> for NtError {
    fn from(err: std::io::Error) -> Self {
        NtError::MessagePackError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::http::Error> for NtError {
    fn from(err: tokio_tungstenite::tungstenite::http::Error) -> Self {
        NtError::ConnectionError(err.to_string())
    }
}

// Type alias for Result with NtError
pub type Result<T> = std::result::Result<T, NtError>;
