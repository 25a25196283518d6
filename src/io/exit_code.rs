//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success - operation completed
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - critical failure that should halt automation
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::ClusterError;
use crate::pipeline::ClusteringOutcome;

/// Standard exit codes for CLI operations.
///
/// These codes follow Unix conventions where 0 indicates success,
/// and non-zero values indicate various error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Input artifact missing (code 3)
    NotFound = 3,

    /// Too few embeddings for the operation; retry once more arrive (code 4)
    InsufficientData = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Artifact corruption detected (code 7)
    ArtifactCorrupted = 7,

    /// Query or embedding has the wrong shape (code 8)
    InvalidInput = 8,

    /// Clustering ran but produced no clusters (code 9)
    NoClusterData = 9,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    /// Exit code for a clustering run that did not fail.
    pub fn from_outcome(outcome: &ClusteringOutcome) -> Self {
        match outcome {
            ClusteringOutcome::Clustered { .. } => ExitCode::Success,
            ClusteringOutcome::NoClusterData { .. } => ExitCode::NoClusterData,
        }
    }

    /// Convert a `ClusterError` to the appropriate exit code.
    ///
    /// Maps specific error types to semantic exit codes that schedulers
    /// can use to decide whether to retry an event.
    pub fn from_error(error: &ClusterError) -> Self {
        match error {
            ClusterError::NotFound { .. } => ExitCode::NotFound,

            // Retry once the event has more faces
            ClusterError::Empty { .. }
            | ClusterError::InsufficientData { .. }
            | ClusterError::EmptyCandidates => ExitCode::InsufficientData,

            // Needs re-extraction before anything else can run
            ClusterError::Corrupt { .. } => ExitCode::ArtifactCorrupted,

            ClusterError::Shape { .. } | ClusterError::InvalidEmbedding { .. } => {
                ExitCode::InvalidInput
            }
            ClusterError::FileRead { .. } | ClusterError::FileWrite { .. } => ExitCode::IoError,
            ClusterError::Config { .. } => ExitCode::ConfigError,
            ClusterError::NotBuilt => ExitCode::GeneralError,
        }
    }

    /// Check if this exit code indicates a blocking error.
    ///
    /// Blocking errors should halt automation pipelines.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError | ExitCode::ArtifactCorrupted)
    }

    /// Check if this exit code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::InsufficientData => "Insufficient data",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::ArtifactCorrupted => "Artifact corrupted",
            ExitCode::InvalidInput => "Invalid input",
            ExitCode::NoClusterData => "No cluster data",
        }
    }
}
