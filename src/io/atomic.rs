//! Crash-safe artifact writes.
//!
//! Artifacts are written to a temporary file in the destination directory
//! and renamed over the target, so readers only ever observe the old
//! artifact or the complete new one.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{ClusterError, ClusterResult};

/// Atomically replaces `path` with `bytes`, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> ClusterResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|source| ClusterError::FileWrite {
        path: parent.to_path_buf(),
        source,
    })?;

    let write_err = |source| ClusterError::FileWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
    temp.write_all(bytes).map_err(write_err)?;
    temp.flush().map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    // Dropping the temp file on any earlier error removes it.
    temp.persist(path).map_err(|e| write_err(e.error))?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}
