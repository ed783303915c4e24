use serde::{Deserialize, Serialize};

/// Coarse failure taxonomy attached to tool results and error events.
///
/// Tool-level kinds (`Validation`, `System`, `Plugin`) travel back to the
/// LLM inside tool-role messages; `PermissionDenied` and `Interrupted`
/// terminate the turn; `Transport` ends the turn but leaves the loop
/// re-entrable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    PermissionDenied,
    SystemError,
    PluginError,
    TransportError,
    Interrupted,
    Timeout,
    Cycle,
}

/// Shared error type used across all Wheelhouse crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("interrupted")]
    Interrupted,

    #[error("validation: {0}")]
    Validation(String),

    #[error("cycle: {0}")]
    Cycle(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map onto the coarse taxonomy used in tool results and events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Other(_) => ErrorKind::SystemError,
            Error::Json(_) | Error::Validation(_) | Error::Config(_) => ErrorKind::ValidationError,
            Error::Transport(_) => ErrorKind::TransportError,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Interrupted => ErrorKind::Interrupted,
            Error::Cycle(_) => ErrorKind::Cycle,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
