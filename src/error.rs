use std::time::Duration;
use thiserror::Error;

/// Errors that can end a single probe-session attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("Failed to connect to probe service: {0}")]
    ConnectFailure(String),

    #[error("Failed to send probe request: {0}")]
    SendFailure(String),

    /// A single read timed out. The session re-polls; this never ends an attempt.
    #[error("Read timed out after {0:?}")]
    ReceiveTimeout(Duration),

    #[error("Probe session did not complete within {0:?}")]
    SessionTimeout(Duration),

    #[error("Unparsable protocol message: {0}")]
    Protocol(String),

    #[error("Probe service reported task failure: {0}")]
    TaskFailed(String),

    #[error("Connection closed by probe service")]
    ConnectionClosed,
}

impl ProbeError {
    /// Whether the session should keep polling after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProbeError::ReceiveTimeout(_) | ProbeError::Protocol(_))
    }
}

/// Errors that can occur when delivering alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Alert sink is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}
