use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Coarse failure classes. The pipeline reacts to the class, not the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Transient failure reaching the translate operation.
    Network,
    /// Quota, auth or rate-limit rejection from the translate operation.
    Api,
    /// The host context went away mid-flight; requires full reconnection.
    EnvironmentInvalidated,
    /// Durable storage could not be read or written.
    Storage,
    /// Malformed input that could not be corrected.
    Validation,
    /// Work was withdrawn before it ran.
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn environment_invalidated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EnvironmentInvalidated, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this failure needs reconnection rather than a plain retry.
    pub fn is_environment_invalidated(&self) -> bool {
        self.kind == ErrorKind::EnvironmentInvalidated
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::storage(format!("serialization failed: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
