//! Input/Output handling for the CLI and artifact files.
//!
//! This module provides:
//! - Atomic artifact writes
//! - Unified output formatting (text, JSON)
//! - Consistent error handling and exit codes

mod atomic;
pub mod exit_code;
pub mod format;
pub mod output;

pub use atomic::write_atomic;
pub use exit_code::ExitCode;
pub use format::{ErrorDetails, JsonResponse, OutputFormat, ResponseMeta};
pub use output::OutputManager;
