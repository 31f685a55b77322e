use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::compiler::CompileError;
use crate::demux::DemuxError;
use crate::reconcile::ReconcileError;

/// Stable, caller-facing classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownIntent,
    InvalidParams,
    ContainerNotFound,
    ExecSpawnFailed,
    StreamError,
    MalformedOutput,
    ConsoleError,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownIntent => "UnknownIntent",
            ErrorKind::InvalidParams => "InvalidParams",
            ErrorKind::ContainerNotFound => "ContainerNotFound",
            ErrorKind::ExecSpawnFailed => "ExecSpawnFailed",
            ErrorKind::StreamError => "StreamError",
            ErrorKind::MalformedOutput => "MalformedOutput",
            ErrorKind::ConsoleError => "ConsoleError",
            ErrorKind::Timeout => "Timeout",
        }
    }

    /// Client-caused failures; everything else is infrastructure or protocol.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownIntent | ErrorKind::InvalidParams | ErrorKind::ContainerNotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a container selector did not resolve to exactly one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// Direct lookup by id found nothing.
    NoSuchContainer(String),
    /// Enumeration found zero candidates.
    NoMatch(String),
    /// Enumeration found more than one candidate.
    Ambiguous { pattern: String, matches: usize },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::NoSuchContainer(id) => write!(f, "no container with id `{id}`"),
            NotFound::NoMatch(pattern) => write!(f, "no container name matches `{pattern}`"),
            NotFound::Ambiguous { pattern, matches } => {
                write!(f, "{matches} containers match `{pattern}`, expected exactly one")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("container not found: {0}")]
    ContainerNotFound(NotFound),
    #[error("exec spawn failed: {0}")]
    ExecSpawnFailed(String),
    #[error("stream error: {0}")]
    Stream(#[from] DemuxError),
    #[error("stream error: {0}")]
    StreamIo(#[from] std::io::Error),
    #[error("malformed output: {0}")]
    MalformedOutput(#[from] ReconcileError),
    #[error("console reported an error: {0}")]
    Console(String),
    #[error("exec session timed out after {0:?}")]
    Timeout(Duration),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::UnknownIntent(_) => ErrorKind::UnknownIntent,
            BridgeError::InvalidParams(_) => ErrorKind::InvalidParams,
            BridgeError::ContainerNotFound(_) => ErrorKind::ContainerNotFound,
            BridgeError::ExecSpawnFailed(_) => ErrorKind::ExecSpawnFailed,
            BridgeError::Stream(_) | BridgeError::StreamIo(_) => ErrorKind::StreamError,
            BridgeError::MalformedOutput(_) => ErrorKind::MalformedOutput,
            BridgeError::Console(_) => ErrorKind::ConsoleError,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

impl From<CompileError> for BridgeError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::UnknownIntent(name) => BridgeError::UnknownIntent(name),
            other => BridgeError::InvalidParams(other.to_string()),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
