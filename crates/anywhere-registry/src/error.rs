//! Error types for registry operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Phase of a registry-to-registry copy that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    /// Opening or resolving the source repository.
    Source,
    /// Opening the destination repository.
    Destination,
    /// Transferring the graph or tagging it at the destination.
    Graph,
}

impl fmt::Display for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("registry copy source"),
            Self::Destination => f.write_str("registry copy destination"),
            Self::Graph => f.write_str("registry copy"),
        }
    }
}

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The registry rejected our credentials or token.
    #[error("authentication failed for {registry}: {message}")]
    AuthenticationFailed {
        /// Registry host.
        registry: String,
        /// Error message.
        message: String,
    },

    /// The credential store or a credential helper failed.
    #[error("credential lookup failed for {host}: {message}")]
    Credential {
        /// Registry host being looked up.
        host: String,
        /// Error message.
        message: String,
    },

    /// A reference does not exist in the repository.
    #[error("{repository}:{reference}: not found")]
    NotFound {
        /// Repository location.
        repository: String,
        /// Tag or digest.
        reference: String,
    },

    /// Fetched content does not match its descriptor.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest from the descriptor.
        expected: String,
        /// Digest of the received bytes.
        actual: String,
    },

    /// A manifest or index could not be decoded.
    #[error("invalid manifest {digest}: {message}")]
    InvalidManifest {
        /// Manifest digest.
        digest: String,
        /// Error message.
        message: String,
    },

    /// Client construction failed because of bad settings.
    #[error("invalid registry configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Invalid reference or digest format.
    #[error("invalid reference format: {reference}")]
    InvalidReference {
        /// Reference string.
        reference: String,
    },

    /// HTTP error from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Blob or manifest upload failed.
    #[error("failed to upload to {repository}: {message}")]
    UploadFailed {
        /// Repository location.
        repository: String,
        /// Error message.
        message: String,
    },

    /// File I/O error.
    #[error("file I/O error at {path}: {source}")]
    IoError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A registry-to-registry copy failed.
    #[error("{stage} {reference}: {source}")]
    Copy {
        /// Which side failed.
        stage: CopyStage,
        /// Artifact being copied.
        reference: String,
        /// Underlying error.
        #[source]
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    /// Returns true if this error is a transient network condition.
    ///
    /// The engine never retries on its own; callers use this to decide.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::HttpError { status, .. } => *status == 429 || *status >= 500 || *status == 0,
            Self::Copy { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error means the reference does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Copy { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub(crate) fn copy(stage: CopyStage, reference: impl Into<String>, source: Self) -> Self {
        Self::Copy {
            stage,
            reference: reference.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = RegistryError::NotFound {
            repository: "public.ecr.aws/eks-anywhere/cli-tools".to_string(),
            reference: "v0.1.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "public.ecr.aws/eks-anywhere/cli-tools:v0.1.0: not found"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_copy_error_names_stage() {
        let inner = RegistryError::AuthenticationFailed {
            registry: "harbor.local".to_string(),
            message: "denied".to_string(),
        };
        let err = RegistryError::copy(CopyStage::Destination, "harbor.local/a/b:v1", inner);
        assert_eq!(
            err.to_string(),
            "registry copy destination harbor.local/a/b:v1: authentication failed for harbor.local: denied"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let server_error = RegistryError::HttpError {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(server_error.is_retryable());

        let wrapped = RegistryError::copy(CopyStage::Graph, "a/b:v1", server_error);
        assert!(wrapped.is_retryable());

        let client_error = RegistryError::HttpError {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(!client_error.is_retryable());

        let mismatch = RegistryError::DigestMismatch {
            expected: "sha256:a".to_string(),
            actual: "sha256:b".to_string(),
        };
        assert!(!mismatch.is_retryable());
    }
}
