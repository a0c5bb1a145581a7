//! Timestamped snapshot files for current-content exports and diff reports

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::download::SNAPSHOT_EXTENSION;
use crate::sanitize::{sanitize_filename, DEFAULT_MAX_LENGTH};

/// Prefix format for export filenames, e.g. `2025-12-15-143000`
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// `<timestamp>_<sanitized base>.txt`
pub fn export_filename(filename_base: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        at.format(EXPORT_TIMESTAMP_FORMAT),
        sanitize_filename(filename_base, DEFAULT_MAX_LENGTH),
        SNAPSHOT_EXTENSION
    )
}

/// Write `content` to a new timestamped file in `export_dir`, creating the directory.
///
/// An existing file with the same name (two exports within one second) is not
/// overwritten; a numeric suffix is appended instead.
pub fn export_file_content(export_dir: &Path, content: &str, filename_base: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(export_dir)
        .with_context(|| format!("Failed to create export directory: {:?}", export_dir))?;

    let filename = export_filename(filename_base, Utc::now());
    let path = unique_path(export_dir, &filename);

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write export file: {:?}", path))?;

    tracing::debug!("Wrote {} bytes to {:?}", content.len(), path);
    Ok(path)
}

fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let stem = filename
        .strip_suffix(&format!(".{}", SNAPSHOT_EXTENSION))
        .unwrap_or(filename);
    (1..)
        .map(|n| dir.join(format!("{}-{}.{}", stem, n, SNAPSHOT_EXTENSION)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_export_filename_format() {
        let at = Utc.with_ymd_and_hms(2025, 12, 15, 14, 30, 0).unwrap();
        assert_eq!(
            export_filename("My Doc", at),
            "2025-12-15-143000_My_Doc.txt"
        );
        assert_eq!(export_filename("", at), "2025-12-15-143000_untitled.txt");
    }

    #[test]
    fn test_export_creates_directory_and_writes_content() {
        let temp_dir = TempDir::new().unwrap();
        let export_dir = temp_dir.path().join("exports");

        let path = export_file_content(&export_dir, "Document text", "My Doc").unwrap();

        assert!(path.starts_with(&export_dir));
        assert!(path.to_string_lossy().ends_with("_My_Doc.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Document text");
    }

    #[test]
    fn test_repeated_exports_never_overwrite() {
        let temp_dir = TempDir::new().unwrap();

        let first = export_file_content(temp_dir.path(), "one", "Doc").unwrap();
        let second = export_file_content(temp_dir.path(), "two", "Doc").unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "two");
    }
}
