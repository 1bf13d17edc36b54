//! Error types for the remote-call layer

use crate::envelope::{RemoteException, NO_TARGET_REGISTERED};
use ipc::ChannelError;
use serde_json::Value;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type returned by connection operations
pub type Result<T> = std::result::Result<T, RemoteIpcError>;

/// A remote exception re-raised at the local call site
///
/// Carries the remote diagnostics as data; the local error points at the
/// caller, not at a reconstructed remote stack.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("remote {type_name}: {message}")]
pub struct RemoteExecutionError {
    /// Name of the remote error type
    pub type_name: String,
    /// Remote error message
    pub message: String,
    /// Opaque remote diagnostics
    pub traceback: Option<Value>,
}

impl RemoteExecutionError {
    /// Checks the remote type name
    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

impl From<RemoteException> for RemoteExecutionError {
    fn from(exception: RemoteException) -> Self {
        Self {
            type_name: exception.type_name,
            message: exception.message,
            traceback: exception.traceback,
        }
    }
}

/// Errors surfaced to callers of a connection
#[derive(Debug, Error)]
pub enum RemoteIpcError {
    /// The connection is stopping or stopped; use a new connection
    #[error("connection stopped")]
    ConnectionStopped,

    #[error(transparent)]
    Remote(#[from] RemoteExecutionError),

    /// No answer within the allotted time; the remote work is not cancelled
    #[error("`{operation}` timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("a target is already registered on this connection")]
    TargetAlreadyRegistered,

    #[error("reception loop already started")]
    AlreadyStarted,

    /// Function names used for connection control cannot be called directly
    #[error("`{0}` is reserved for connection control")]
    ReservedFunction(String),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("Channel error: {0}")]
    Channel(ChannelError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RemoteIpcError {
    /// Checks for [`RemoteIpcError::ConnectionStopped`]
    pub fn is_connection_stopped(&self) -> bool {
        matches!(self, RemoteIpcError::ConnectionStopped)
    }

    /// Checks for [`RemoteIpcError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteIpcError::Timeout { .. })
    }

    /// Checks whether the peer answered that it has no target registered
    pub fn is_no_target(&self) -> bool {
        self.remote().is_some_and(|err| err.is(NO_TARGET_REGISTERED))
    }

    /// Returns the remote exception, if this error carries one
    pub fn remote(&self) -> Option<&RemoteExecutionError> {
        match self {
            RemoteIpcError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChannelError> for RemoteIpcError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => RemoteIpcError::ConnectionStopped,
            other => RemoteIpcError::Channel(other),
        }
    }
}

impl From<serde_json::Error> for RemoteIpcError {
    fn from(err: serde_json::Error) -> Self {
        RemoteIpcError::Codec(err.to_string())
    }
}
