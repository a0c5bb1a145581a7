//! Snapshot Differ - line diffs over locally cached snapshots

use anyhow::{Context, Result};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::download::SNAPSHOT_EXTENSION;

/// The `limit` most recently modified snapshot files in `dir`, newest first.
///
/// A missing directory yields an empty list.
pub fn most_recent(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut snapshots: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read snapshot directory: {:?}", dir))?
    {
        let entry = entry?;
        let path = entry.path();
        let is_snapshot = path.is_file()
            && path.extension().and_then(|ext| ext.to_str()) == Some(SNAPSHOT_EXTENSION);
        if !is_snapshot {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time: {:?}", path))?;
        snapshots.push((modified, path));
    }

    // Newest first; the path breaks ties so the order is deterministic.
    snapshots.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    snapshots.truncate(limit);

    Ok(snapshots.into_iter().map(|(_, path)| path).collect())
}

/// Unified diff from `old_path` to `new_path` with no context lines.
///
/// Returns an empty string when both files have identical lines.
pub fn create_diff(old_path: &Path, new_path: &Path) -> Result<String> {
    let old = std::fs::read_to_string(old_path)
        .with_context(|| format!("Failed to read snapshot: {:?}", old_path))?;
    let new = std::fs::read_to_string(new_path)
        .with_context(|| format!("Failed to read snapshot: {:?}", new_path))?;

    Ok(diff_text(&old, &new, &file_label(old_path), &file_label(new_path)))
}

/// Zero-context unified diff between two texts
pub fn diff_text(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);

    let unchanged = diff
        .iter_all_changes()
        .all(|change| change.tag() == ChangeTag::Equal);
    if unchanged {
        return String::new();
    }

    diff.unified_diff()
        .context_radius(0)
        .header(old_label, new_label)
        .to_string()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
