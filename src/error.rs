//! Error type shared by the organizer, the history store and the scheduler.

use std::io;
use std::path::PathBuf;

/// Broad classification of an [`Error`], used by callers to pick an exit code
/// or a response status without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input rejected before any side effect.
    Validation,
    /// A directory, file, run or job does not exist.
    NotFound,
    /// The filesystem refused access.
    PermissionDenied,
    /// The request conflicts with the current state of a record.
    Conflict,
    /// A filesystem operation failed part way through.
    Io,
    /// Configuration or persistence problems.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid source directory: {}", path.display())]
    InvalidDirectory { path: PathBuf },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("run {run_id} failed: {source}")]
    RunFailed {
        run_id: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Wraps an I/O error, promoting permission failures to their own variant.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidDirectory { .. } | Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::MoveFailed { source, .. } | Self::Io { source, .. } => match source.kind() {
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Io,
            },
            Self::Config(_) | Self::Store(_) => ErrorKind::Internal,
            Self::RunFailed { source, .. } => source.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
