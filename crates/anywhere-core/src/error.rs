//! Error types for core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while reading artifact lists and mirror configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A YAML document could not be parsed.
    #[error("invalid YAML in {context}: {source}")]
    Yaml {
        /// What was being parsed.
        context: String,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The registry mirror configuration is unusable.
    #[error("invalid registry mirror configuration: {message}")]
    InvalidMirror {
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_mirror_display() {
        let err = CoreError::InvalidMirror {
            message: "endpoint is empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid registry mirror configuration: endpoint is empty"
        );
    }

    #[test]
    fn test_io_error_names_path() {
        let err = CoreError::Io {
            path: PathBuf::from("/tmp/bundle.yaml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/tmp/bundle.yaml"));
    }
}
