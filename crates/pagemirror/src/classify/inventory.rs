//! Fresh file inventory of a mirror directory.

use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::types::{FileInventoryEntry, MirrorError, MirrorResult};
use crate::urls;

/// Walk `root` recursively and list every regular file.
///
/// Unreadable entries are logged as [`MirrorError::DirectoryWalk`] and
/// skipped along with their subtree. Only an unreadable root is fatal.
/// Entries are sorted by path.
pub fn walk_inventory(root: &Path) -> MirrorResult<Vec<FileInventoryEntry>> {
    if let Err(e) = std::fs::read_dir(root) {
        return Err(MirrorError::DirectoryWalk {
            path: root.to_path_buf(),
            reason: e.to_string(),
        });
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(root).follow_links(false) {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                let err = MirrorError::DirectoryWalk {
                    path: e.path().unwrap_or(root).to_path_buf(),
                    reason: e.to_string(),
                };
                tracing::warn!("{err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("cannot stat {path}: {e}");
                continue;
            }
        };

        entries.push(FileInventoryEntry {
            extension: urls::extension_of(&path),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            path,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_lists_nested_files_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets/images/example.com")).unwrap();
        std::fs::write(dir.path().join("assets/images/example.com/Logo.PNG"), [0u8; 10]).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let inventory = walk_inventory(dir.path()).unwrap();
        let paths: Vec<_> = inventory.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["assets/images/example.com/Logo.PNG", "index.html"]);
        assert_eq!(inventory[0].size, 10);
        assert_eq!(inventory[0].extension, "png");
        assert!(inventory[0].modified.is_some());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = walk_inventory(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, MirrorError::DirectoryWalk { .. }));
    }
}
