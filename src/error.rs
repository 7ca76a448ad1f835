//! Typed errors for the classification pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors with a meaning of their own; everything else travels as
/// `anyhow::Error` with context attached at the failure site.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raised by `Classifier::fit` when a required data stream is missing.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The ensemble config names an architecture we cannot build.
    #[error("unknown model architecture: {0}")]
    UnknownArchitecture(String),

    /// The source directory contains no image files.
    #[error("no images found under {0}")]
    EmptySource(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::InvalidArguments("missing stream".to_string());
        assert_eq!(err.to_string(), "invalid arguments: missing stream");
    }
}
