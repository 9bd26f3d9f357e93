//! Error types for the transfer crate.

use std::path::{Path, PathBuf};

use anywhere_registry::RegistryError;
use thiserror::Error;

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that can occur while moving artifacts.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The source side of a move failed.
    #[error("loading images from source: {source}")]
    Load {
        /// Underlying error.
        source: Box<TransferError>,
    },

    /// The destination side of a move failed.
    #[error("writing images to destination: {source}")]
    Write {
        /// Underlying error.
        source: Box<TransferError>,
    },

    /// A processor job failed and the remaining jobs were abandoned.
    #[error("processor worker failed, rest of jobs were aborted: {source}")]
    WorkerFailed {
        /// The first job error.
        source: Box<TransferError>,
    },

    /// The operation was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// Pulling a reference from its registry failed.
    #[error("pulling {reference}: {source}")]
    Pull {
        /// The reference being pulled.
        reference: String,
        /// Underlying error.
        source: RegistryError,
    },

    /// Pushing a reference to its destination failed.
    #[error("pushing {reference} to {destination}: {source}")]
    Push {
        /// The reference being pushed.
        reference: String,
        /// Where it was headed.
        destination: String,
        /// Underlying error.
        source: RegistryError,
    },

    /// Registry or storage error without further context.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Archive is malformed or could not be written.
    #[error("archive {path}: {message}")]
    Archive {
        /// Archive path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Filesystem error.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A worker task panicked or was aborted by the runtime.
    #[error("worker task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Returns true if this error, or the error it wraps, is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Load { source } | Self::Write { source } | Self::WorkerFailed { source } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn archive(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}
