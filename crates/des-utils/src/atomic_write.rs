//! Atomic file replacement for step files and settings documents.
//!
//! Writes go to a temporary file in the target directory, are fsynced,
//! and are renamed over the target. Readers therefore never observe a
//! half-written step file or settings document.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Atomically write content to a file using temp file + fsync + rename.
///
/// Line endings are normalized to LF and the parent directory is created
/// if missing. The temp file is created in the target directory so the
/// rename stays on one filesystem.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    let normalized = normalize_line_endings(content);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("Failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(normalized.as_bytes())
        .with_context(|| "Failed to write content to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .with_context(|| "Failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("Failed to atomically write file: {path}"))?;

    Ok(())
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn utf8_path(dir: &TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_atomic_write_basic() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "step.json");

        write_file_atomic(&path, "{\"a\":1}\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
    }

    #[test]
    fn test_atomic_write_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "step.json");

        write_file_atomic(&path, "first").unwrap();
        write_file_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_atomic_write_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "nested/deeper/step.json");

        write_file_atomic(&path, "x").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_atomic_write_normalizes_line_endings() {
        let dir = TempDir::new().unwrap();
        let path = utf8_path(&dir, "crlf.txt");

        write_file_atomic(&path, "a\r\nb\rc\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }
}
