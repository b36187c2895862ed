use std::path::{Component, Path};

use crate::ChunkError;

/// Validates that a destination path stays inside its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows drive/UNC)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(path: &str) -> Result<(), ChunkError> {
    if path.is_empty() {
        return Err(ChunkError::InvalidPath("empty path".into()));
    }

    let parsed = Path::new(path);

    if parsed.is_absolute() {
        return Err(ChunkError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }

    for component in parsed.components() {
        match component {
            Component::ParentDir => {
                return Err(ChunkError::InvalidPath(format!(
                    "parent directory traversal not allowed: {path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(ChunkError::InvalidPath(format!(
                    "path prefix not allowed: {path}"
                )));
            }
            Component::RootDir => {
                return Err(ChunkError::InvalidPath(format!(
                    "absolute path not allowed: {path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    // Windows-style escapes that parse as normal components on Unix.
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(ChunkError::InvalidPath(format!(
            "drive prefix not allowed: {path}"
        )));
    }
    if path.starts_with("\\\\") {
        return Err(ChunkError::InvalidPath(format!(
            "UNC path not allowed: {path}"
        )));
    }

    Ok(())
}
