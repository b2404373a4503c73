//! Error types for exercise classification.
//!
//! [`ClassifyError`] covers the whole pipeline; [`ArtifactError`] is the
//! narrower failure set of persisted model loading and is nested into it.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for classification operations.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// The input table held no usable frames.
    #[error("No frames in input")]
    NoFrames,

    /// Two frames share the same identifier.
    #[error("Duplicate frame id {frame_id}")]
    DuplicateFrame { frame_id: u64 },

    /// Input validation errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A matrix or vector did not have the expected width.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Numerical computation resulted in NaN or Inf.
    #[error("Numerical instability: {context}")]
    NumericalInstability { context: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Training could not proceed.
    #[error("Training error: {0}")]
    Training(String),

    /// Persisted model artifacts could not be loaded or saved.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The keypoint table could not be read.
    #[error("Input table error: {0}")]
    Table(#[from] csv::Error),

    /// Filesystem error outside artifact handling.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while loading or saving the artifact triad.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Some but not all of the three artifact files exist.
    #[error("Incomplete artifact set in {}: missing {missing:?}", dir.display())]
    Incomplete {
        dir: PathBuf,
        missing: Vec<&'static str>,
    },

    /// An artifact file could not be parsed or carries an unknown schema.
    #[error("Corrupt artifact {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The three pieces do not describe the same model.
    #[error("Incompatible artifacts: {0}")]
    Incompatible(String),

    /// Filesystem error while reading or writing artifacts.
    #[error("Artifact I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for classification operations.
pub type Result<T> = std::result::Result<T, ClassifyError>;

impl ClassifyError {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a dimension mismatch error.
    #[must_use]
    pub const fn dimension_mismatch(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }

    /// Create a numerical instability error.
    #[must_use]
    pub fn numerical_instability(context: impl Into<String>) -> Self {
        Self::NumericalInstability {
            context: context.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a training error.
    #[must_use]
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }
}

impl ArtifactError {
    /// Create an incompatibility error.
    #[must_use]
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::Incompatible(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClassifyError::dimension_mismatch("scaler", 10, 5);
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("5"));
        assert!(err.to_string().contains("scaler"));
    }

    #[test]
    fn test_artifact_error_nests() {
        let err: ClassifyError = ArtifactError::incompatible("vocabulary size 3 vs 4").into();
        assert!(matches!(err, ClassifyError::Artifact(_)));
        assert!(err.to_string().contains("vocabulary size"));
    }

    #[test]
    fn test_error_constructors() {
        let _ = ClassifyError::invalid_input("test");
        let _ = ClassifyError::numerical_instability("nan in logits");
        let _ = ClassifyError::invalid_config("max_seq_len must be positive");
        let _ = ClassifyError::training("empty clip");
    }
}
