//! Error types shared by the hub session, dispatcher and synchronizer

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures surfaced to callers of the playback client
///
/// Transport problems are recovered by the session's reconnect policy where
/// possible; whatever is left reaches callers as one of these values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A command was attempted while the hub session was not ready
    #[error("hub connection is not established")]
    NotConnected,
    /// Initial connect or reconnect failed
    #[error("connection error: {0}")]
    ConnectionError(String),
    /// The hub rejected a command or never acknowledged it
    #[error("{command} failed: {reason}")]
    RemoteCommandFailure { command: String, reason: String },
    /// Audio resource could not be loaded or played
    #[error("failed to load track {track}: {reason}")]
    ResourceLoadFailure { track: String, reason: String },
}

impl SyncError {
    pub fn remote(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteCommandFailure {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Hub frames that could not be decoded into a known message
///
/// These are logged and dropped; they never close the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed hub frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unterminated hub record exceeds {0} bytes")]
    Oversized(usize),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown hub target `{0}`")]
    UnknownTarget(String),
    #[error("hub target `{target}` expects {expected} argument(s), got {got}")]
    Arity {
        target: String,
        expected: usize,
        got: usize,
    },
}

impl ProtocolError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
