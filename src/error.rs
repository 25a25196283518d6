//! Error types for the face clustering engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for clustering and matching operations
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Input artifact errors
    #[error("Artifact not found at '{path}'")]
    NotFound { path: PathBuf },

    #[error("No embeddings available in '{source_name}'")]
    Empty { source_name: String },

    #[error("Not enough embeddings to {operation}: need at least {required}, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Artifact '{path}' is corrupted: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Shape errors
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Shape { expected: usize, actual: usize },

    #[error("Invalid embedding for '{image_id}': {reason}")]
    InvalidEmbedding { image_id: String, reason: String },

    /// Matching errors
    #[error("Cannot match a query against an empty candidate set")]
    EmptyCandidates,

    #[error("Approximate index has not been built yet")]
    NotBuilt,

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl ClusterError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Empty { .. } => "EMPTY",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::Corrupt { .. } => "CORRUPT",
            Self::Shape { .. } => "SHAPE_MISMATCH",
            Self::InvalidEmbedding { .. } => "INVALID_EMBEDDING",
            Self::EmptyCandidates => "EMPTY_CANDIDATES",
            Self::NotBuilt => "INDEX_NOT_BUILT",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Whether the failure is scoped to one run and may succeed once more
    /// embeddings arrive for the same event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Empty { .. } | Self::InsufficientData { .. } | Self::EmptyCandidates
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::NotFound { .. } => vec![
                "Check that embedding extraction has finished for this event",
                "Pass the event directory or the embedding artifact path explicitly",
            ],
            Self::Empty { .. } | Self::InsufficientData { .. } => vec![
                "Mark the event as failed and retry once more faces are extracted",
            ],
            Self::Corrupt { .. } => vec![
                "Re-run embedding extraction for this event to regenerate the artifact",
                "Use 'facecluster import' to rebuild the artifact from the extractor's JSON output",
            ],
            Self::Shape { .. } => vec![
                "Ensure the query was produced by the same embedding model as the event",
            ],
            Self::NotBuilt => vec!["Run 'facecluster index <event>' before approximate search"],
            Self::FileRead { .. } | Self::FileWrite { .. } => vec![
                "Check file permissions and available disk space",
            ],
            Self::Config { .. } => vec![
                "Run 'facecluster config' to inspect the active settings",
                "Run 'facecluster init --force' to regenerate the settings file",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for clustering operations
pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(ClusterError::NotBuilt.status_code(), "INDEX_NOT_BUILT");
        assert_eq!(
            ClusterError::Shape {
                expected: 512,
                actual: 128
            }
            .status_code(),
            "SHAPE_MISMATCH"
        );
    }

    #[test]
    fn test_retryable_errors() {
        let empty = ClusterError::Empty {
            source_name: "event_1".to_string(),
        };
        assert!(empty.is_retryable());

        let corrupt = ClusterError::Corrupt {
            path: PathBuf::from("face_embeddings.vec"),
            reason: "bad magic".to_string(),
        };
        assert!(!corrupt.is_retryable());
        assert!(!corrupt.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = ClusterError::InsufficientData {
            operation: "train the index quantizer",
            required: 100,
            actual: 12,
        };
        let message = err.to_string();
        assert!(message.contains("100"));
        assert!(message.contains("12"));
    }
}
