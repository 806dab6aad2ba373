//! Atomic artifact writes.
//!
//! Every file the exporter produces is written to a temporary file in the
//! destination directory and renamed into place, so an interrupted run never
//! leaves a half-written artifact behind.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{MirrorError, Result};

/// Write `bytes` to `path` via temp-file-then-rename. Creates parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| MirrorError::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| MirrorError::io(path, e))?;
    tmp.flush().map_err(|e| MirrorError::io(path, e))?;
    tmp.persist(path).map_err(|e| MirrorError::io(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value).map_err(|e| MirrorError::json(path, e))?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Write a UTF-8 text artifact atomically.
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    write_atomic(path, text.as_bytes())
}

/// Read and deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path).map_err(|e| MirrorError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| MirrorError::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("file.txt");
        write_text(&path, "first").unwrap();
        write_text(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        // No temp files left behind.
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_json(&path, &vec!["x", "y"]).unwrap();
        let back: Vec<String> = read_json(&path).unwrap();
        assert_eq!(back, vec!["x", "y"]);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with("]\n"));
    }

    #[test]
    fn test_read_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(matches!(err, MirrorError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
