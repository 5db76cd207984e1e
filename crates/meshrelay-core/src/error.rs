//! Error types for meshrelay

use std::fmt;
use thiserror::Error;

/// The main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Coarse failure category, surfaced to HTTP callers as the `kind` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Backend,
    Storage,
    Io,
    Config,
    Tunnel,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Backend => "backend",
            ErrorKind::Storage => "storage",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Tunnel => "tunnel",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RelayError {
    /// The category this error belongs to.
    ///
    /// Encoding failures happen while writing scratch artifacts, so they
    /// are reported as `Io` alongside plain filesystem errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Validation(_) => ErrorKind::Validation,
            RelayError::Backend(_) => ErrorKind::Backend,
            RelayError::Storage(_) => ErrorKind::Storage,
            RelayError::Io(_) | RelayError::Encoding(_) => ErrorKind::Io,
            RelayError::Config(_) | RelayError::TomlParse(_) | RelayError::TomlSer(_) => {
                ErrorKind::Config
            }
            RelayError::Tunnel(_) => ErrorKind::Tunnel,
            RelayError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::TomlParse(err.to_string())
    }
}

impl From<toml::ser::Error> for RelayError {
    fn from(err: toml::ser::Error) -> Self {
        RelayError::TomlSer(err.to_string())
    }
}
