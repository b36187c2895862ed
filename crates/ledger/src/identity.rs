use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// What a resume token is bound to.
///
/// A token is only valid while the file it was minted for is unchanged;
/// any identity mismatch invalidates it and forces a full restart. The
/// content tag is derived from mtime rather than a content hash, since
/// hashing tens of gigabytes just to decide resumability would defeat
/// resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    /// Logical path as the client names it.
    pub path: String,
    pub size: u64,
    /// Hex mtime-seconds tag; changes whenever the file is touched.
    pub content_tag: String,
}

impl FileIdentity {
    /// Builds the identity of a file on disk.
    pub fn of_file(logical_path: &str, file: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(file)?;
        let mtime_secs = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            path: logical_path.to_string(),
            size: meta.len(),
            content_tag: format!("{mtime_secs:x}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn identity_of_file_captures_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, b"12345").unwrap();

        let id = FileIdentity::of_file("archive.bin", &path).unwrap();
        assert_eq!(id.path, "archive.bin");
        assert_eq!(id.size, 5);
        assert!(!id.content_tag.is_empty());
    }

    #[test]
    fn identity_stable_for_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, b"data").unwrap();

        let a = FileIdentity::of_file("archive.bin", &path).unwrap();
        let b = FileIdentity::of_file("archive.bin", &path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn identity_differs_when_size_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, b"data").unwrap();
        let before = FileIdentity::of_file("archive.bin", &path).unwrap();

        std::fs::write(&path, b"data-grown").unwrap();
        let after = FileIdentity::of_file("archive.bin", &path).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn serde_roundtrip() {
        let id = FileIdentity {
            path: "nightly/db.tar.zst".into(),
            size: 999,
            content_tag: "68938a10".into(),
        };
        let json = serde_json::to_string(&id).unwrap();
        let parsed: FileIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
