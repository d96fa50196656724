//! Backup-then-delete removal of unused mirror files.
//!
//! Every delete is preceded by an existence check and a copy into the
//! backup root, so re-running a prune with the same list is a no-op.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::AuditReport;
use crate::manifest::{MirrorManifest, MANIFEST_FILE};
use crate::types::{MirrorError, MirrorResult};

/// What a prune did (or, in dry-run mode, would do).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneOutcome {
    pub dry_run: bool,
    pub removed: Vec<String>,
    pub bytes_removed: u64,
    /// Listed paths that were already gone.
    pub already_absent: Vec<String>,
    /// Listed paths that are never deleted.
    pub protected: Vec<String>,
    pub removed_dirs: usize,
    pub backup_root: PathBuf,
}

/// Reject a report that must not drive a prune of this mirror.
///
/// A report older than the mirror's export is always refused. A report
/// without runtime evidence is refused unless `force` is set.
pub fn check_report(
    report: &AuditReport,
    manifest: Option<&MirrorManifest>,
    force: bool,
) -> MirrorResult<()> {
    if let Some(manifest) = manifest {
        if report.audit_date < manifest.exported_at {
            return Err(MirrorError::StaleReport {
                audit_date: report.audit_date,
                exported_at: manifest.exported_at,
            });
        }
    }
    if !report.runtime_evidence {
        if !force {
            return Err(MirrorError::MissingRuntimeEvidence);
        }
        tracing::warn!("pruning from a static-only report");
    }
    Ok(())
}

/// Convert a report path into a path relative to the mirror root.
///
/// Absolute paths and `..` components are rejected.
pub fn safe_relative(path: &str) -> MirrorResult<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(MirrorError::UnsafePath(path.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(MirrorError::UnsafePath(path.to_string()));
    }
    Ok(out)
}

/// Back up and delete each listed file still present under `root`.
///
/// `entry_document` and the mirror manifest are never deleted. Directories
/// emptied by the removal are deleted too, up to but excluding `root`.
pub fn prune(
    root: &Path,
    backup_root: &Path,
    paths: &[String],
    entry_document: &str,
    dry_run: bool,
) -> MirrorResult<PruneOutcome> {
    let entry = safe_relative(entry_document)?;
    let manifest = PathBuf::from(MANIFEST_FILE);

    let mut outcome = PruneOutcome {
        dry_run,
        backup_root: backup_root.to_path_buf(),
        ..PruneOutcome::default()
    };

    for listed in paths {
        let rel = safe_relative(listed)?;
        if rel == entry || rel == manifest {
            tracing::warn!("refusing to prune protected file {listed}");
            outcome.protected.push(listed.clone());
            continue;
        }

        let source = root.join(&rel);
        let metadata = match std::fs::symlink_metadata(&source) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                outcome.already_absent.push(listed.clone());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            tracing::warn!("skipping directory {listed}");
            continue;
        }

        if !dry_run {
            let target = backup_root.join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &target)?;
            std::fs::remove_file(&source)?;
            outcome.removed_dirs += remove_empty_parents(root, &source);
        }
        tracing::debug!("removed {listed}");
        outcome.removed.push(listed.clone());
        outcome.bytes_removed += metadata.len();
    }

    tracing::info!(
        "{} {} files ({} bytes), {} already absent",
        if dry_run { "would remove" } else { "removed" },
        outcome.removed.len(),
        outcome.bytes_removed,
        outcome.already_absent.len()
    );
    Ok(outcome)
}

fn remove_empty_parents(root: &Path, file: &Path) -> usize {
    let mut removed = 0;
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        let empty = std::fs::read_dir(current)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty || std::fs::remove_dir(current).is_err() {
            break;
        }
        removed += 1;
        dir = current.parent();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::AuditSummary;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn mirror() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets/images/cdn")).unwrap();
        std::fs::write(dir.path().join("assets/images/cdn/e.png"), [1u8; 64]).unwrap();
        std::fs::write(dir.path().join("assets/images/keep.png"), [2u8; 8]).unwrap();
        dir
    }

    #[test]
    fn test_prune_backs_up_then_deletes() {
        let dir = mirror();
        let backup = tempfile::tempdir().unwrap();
        let list = vec!["assets/images/cdn/e.png".to_string()];

        let outcome = prune(dir.path(), backup.path(), &list, "index.html", false).unwrap();
        assert_eq!(outcome.removed, list);
        assert_eq!(outcome.bytes_removed, 64);
        assert_eq!(outcome.removed_dirs, 1);
        assert!(!dir.path().join("assets/images/cdn").exists());
        assert!(dir.path().join("assets/images/keep.png").exists());
        assert_eq!(
            std::fs::read(backup.path().join("assets/images/cdn/e.png")).unwrap(),
            vec![1u8; 64]
        );

        let again = prune(dir.path(), backup.path(), &list, "index.html", false).unwrap();
        assert!(again.removed.is_empty());
        assert_eq!(again.already_absent, list);
    }

    #[test]
    fn test_entry_document_is_never_deleted() {
        let dir = mirror();
        let backup = tempfile::tempdir().unwrap();
        let list = vec!["./index.html".to_string(), MANIFEST_FILE.to_string()];
        let outcome = prune(dir.path(), backup.path(), &list, "index.html", false).unwrap();
        assert_eq!(outcome.protected.len(), 2);
        assert!(dir.path().join("index.html").exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = mirror();
        let backup = tempfile::tempdir().unwrap();
        let list = vec!["assets/images/cdn/e.png".to_string()];
        let outcome = prune(dir.path(), backup.path(), &list, "index.html", true).unwrap();
        assert_eq!(outcome.removed, list);
        assert!(dir.path().join("assets/images/cdn/e.png").exists());
        assert!(!backup.path().join("assets").exists());
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        assert!(matches!(safe_relative("../etc/passwd"), Err(MirrorError::UnsafePath(_))));
        assert!(matches!(safe_relative("/etc/passwd"), Err(MirrorError::UnsafePath(_))));
        assert!(matches!(safe_relative(""), Err(MirrorError::UnsafePath(_))));
        assert_eq!(safe_relative("./a/b.png").unwrap(), PathBuf::from("a/b.png"));
    }

    fn report(audit_date: chrono::DateTime<Utc>, runtime_evidence: bool) -> AuditReport {
        AuditReport {
            audit_date,
            source_url: None,
            export_dir: String::new(),
            summary: AuditSummary {
                total_files: 0,
                used_files: 0,
                unused_files: 0,
                total_size_kb: 0.0,
                used_size_kb: 0.0,
                unused_size_kb: 0.0,
                waste_percentage: 0.0,
            },
            largest_unused_files: Vec::new(),
            unused_files_by_type: BTreeMap::new(),
            console_errors: Vec::new(),
            network_requests: 0,
            viewports_tested: Vec::new(),
            recommendations: Vec::new(),
            unused_files: Vec::new(),
            viewport_asset_counts: BTreeMap::new(),
            missing_references: Vec::new(),
            runtime_evidence,
        }
    }

    fn manifest(exported_at: chrono::DateTime<Utc>) -> MirrorManifest {
        MirrorManifest {
            source_url: "https://example.com/".into(),
            exported_at,
            entry_document: "index.html".into(),
            viewports: Vec::new(),
            resource_counts: BTreeMap::new(),
            canonical_viewport: None,
            discovered_assets: 0,
            downloaded_assets: 0,
            inlined_assets: 0,
            remote_assets: Vec::new(),
            console_errors: Vec::new(),
        }
    }

    #[test]
    fn test_report_guards() {
        let now = Utc::now();
        let m = manifest(now);

        let stale = report(now - Duration::seconds(5), true);
        assert!(matches!(
            check_report(&stale, Some(&m), true),
            Err(MirrorError::StaleReport { .. })
        ));

        let static_only = report(now + Duration::seconds(5), false);
        assert!(matches!(
            check_report(&static_only, Some(&m), false),
            Err(MirrorError::MissingRuntimeEvidence)
        ));
        assert!(check_report(&static_only, Some(&m), true).is_ok());
        assert!(check_report(&report(now, true), None, false).is_ok());
    }
}
