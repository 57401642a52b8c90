//! Error taxonomy for the device simulator
//!
//! - `ConfigurationError`: fatal, raised before any connection attempt
//! - `ConnectionError`: a connect() call that did not reach Connected
//! - `PublishError`: a single telemetry publish that was not handed to the broker
//! - `TransportError`: a request the underlying MQTT client refused

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Broker hostname not configured (set IOTHUB_HOSTNAME or --hostname)")]
    MissingHostname,
    #[error("Device id must not be empty")]
    EmptyDeviceId,
    #[error("{kind} not found: {}", path.display())]
    MissingFile { kind: &'static str, path: PathBuf },
    #[error("Failed to read {kind} {}: {source}", path.display())]
    UnreadableFile {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Why a connect() call failed. Refusals carry the broker's CONNACK code
/// mapped to a distinct variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unacceptable protocol version")]
    UnacceptableProtocolVersion,
    #[error("Client identifier rejected")]
    IdentifierRejected,
    #[error("Server unavailable")]
    ServerUnavailable,
    #[error("Bad username or password")]
    BadUsernameOrPassword,
    #[error("Not authorized (certificate rejected)")]
    NotAuthorized,
    #[error("Connection refused (code {0})")]
    Refused(u8),
    #[error("No connection acknowledgment within {0}s")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Maps a non-zero MQTT 3.1.1 CONNACK return code.
    pub fn from_return_code(code: u8) -> Self {
        match code {
            1 => ConnectionError::UnacceptableProtocolVersion,
            2 => ConnectionError::IdentifierRejected,
            3 => ConnectionError::ServerUnavailable,
            4 => ConnectionError::BadUsernameOrPassword,
            5 => ConnectionError::NotAuthorized,
            other => ConnectionError::Refused(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Not connected - message not sent")]
    NotConnected,
    #[error("Failed to serialize telemetry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Publish rejected by transport: {0}")]
    Rejected(String),
    #[error("Session closed permanently")]
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport not open")]
    NotOpen,
    #[error("Request failed: {0}")]
    Request(String),
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        ConnectionError::Transport(e.to_string())
    }
}
