//! Usage classification: reconcile a file inventory with usage evidence.
//!
//! [`classify`] is pure. Given the same inventory and evidence it always
//! produces the same report, and its essential and unused sets partition
//! the inventory exactly.

pub mod evidence;
pub mod inventory;
pub mod report;

pub use evidence::{
    absorb_passes, collect_static, mirror_path, normalize_evidence_path, Evidence, STATIC_ORIGIN,
};
pub use inventory::walk_inventory;
pub use report::{
    default_report_dir, AuditReport, AuditSummary, ReportMeta, UnusedFile, AUDIT_REPORT_FILE,
    GRAPH_FILE,
};

use std::collections::{BTreeMap, BTreeSet};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::MirrorConfig;
use crate::manifest::MANIFEST_FILE;
use crate::types::{
    AssetType, ExtensionAggregate, FileInventoryEntry, MirrorError, MirrorResult, Priority,
    Recommendation, UsageReport,
};

/// Thresholds and protections applied by [`classify`].
#[derive(Debug, Clone)]
pub struct ClassifyRules {
    pub entry_document: String,
    pub keep: GlobSet,
    pub large_unused_image_bytes: u64,
    pub waste_ratio_threshold: f64,
}

impl ClassifyRules {
    pub fn from_config(config: &MirrorConfig) -> MirrorResult<Self> {
        Ok(Self {
            entry_document: normalize_evidence_path(&config.entry_document),
            keep: build_keep_set(&config.keep_patterns)?,
            large_unused_image_bytes: config.large_unused_image_bytes,
            waste_ratio_threshold: config.waste_ratio_threshold,
        })
    }

    /// Whether `path` can never be classified unused.
    pub fn is_protected(&self, path: &str) -> bool {
        path == self.entry_document || path == MANIFEST_FILE || self.keep.is_match(path)
    }
}

/// Compile keep patterns into one matcher.
pub fn build_keep_set(patterns: &[String]) -> MirrorResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| MirrorError::InvalidConfig(format!("keep pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| MirrorError::InvalidConfig(format!("keep patterns: {e}")))
}

/// Partition `inventory` into essential and unused files and derive metrics.
pub fn classify(
    inventory: &[FileInventoryEntry],
    evidence: &Evidence,
    rules: &ClassifyRules,
) -> UsageReport {
    let referenced = evidence.referenced();
    let on_disk: BTreeSet<&str> = inventory.iter().map(|e| e.path.as_str()).collect();

    let mut essential = BTreeSet::new();
    let mut unused: Vec<FileInventoryEntry> = Vec::new();
    for entry in inventory {
        if referenced.contains(&entry.path) || rules.is_protected(&entry.path) {
            essential.insert(entry.path.clone());
        } else {
            unused.push(entry.clone());
        }
    }
    unused.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let total_bytes: u64 = inventory.iter().map(|e| e.size).sum();
    let unused_bytes: u64 = unused.iter().map(|e| e.size).sum();
    let waste_ratio = if total_bytes == 0 {
        0.0
    } else {
        unused_bytes as f64 / total_bytes as f64
    };

    let mut unused_by_extension: BTreeMap<String, ExtensionAggregate> = BTreeMap::new();
    for entry in &unused {
        let agg = unused_by_extension.entry(extension_key(entry)).or_default();
        agg.count += 1;
        agg.total_bytes += entry.size;
    }

    let viewport_asset_counts = evidence
        .viewport_paths
        .iter()
        .map(|(label, paths)| {
            let count = paths.iter().filter(|p| on_disk.contains(p.as_str())).count();
            (label.clone(), count)
        })
        .collect();

    let missing_references: Vec<String> = referenced
        .iter()
        .filter(|p| !on_disk.contains(p.as_str()))
        .cloned()
        .collect();

    let mut report = UsageReport {
        essential,
        unused,
        total_files: inventory.len(),
        total_bytes,
        used_bytes: total_bytes - unused_bytes,
        unused_bytes,
        waste_ratio,
        unused_by_extension,
        viewport_asset_counts,
        missing_references,
        recommendations: Vec::new(),
    };
    report.recommendations = recommend(&report, evidence, rules);
    report
}

fn extension_key(entry: &FileInventoryEntry) -> String {
    if entry.extension.is_empty() {
        "(none)".to_string()
    } else {
        entry.extension.clone()
    }
}

fn recommend(
    report: &UsageReport,
    evidence: &Evidence,
    rules: &ClassifyRules,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if report.waste_ratio > rules.waste_ratio_threshold {
        out.push(Recommendation {
            category: "asset-collection".into(),
            priority: Priority::High,
            message: format!(
                "{:.1}% of mirrored bytes are unused; narrow which assets the export collects",
                report.waste_ratio * 100.0
            ),
        });
    }

    let large_images: Vec<&FileInventoryEntry> = report
        .unused
        .iter()
        .filter(|e| AssetType::from_extension(&e.extension) == AssetType::Image)
        .filter(|e| e.size > rules.large_unused_image_bytes)
        .collect();
    if !large_images.is_empty() {
        out.push(Recommendation {
            category: "responsive-images".into(),
            priority: Priority::Medium,
            message: format!(
                "{} unused images over {} KB (largest: {}); review srcset and breakpoint handling",
                large_images.len(),
                rules.large_unused_image_bytes / 1024,
                large_images[0].path
            ),
        });
    }

    let fonts = report
        .unused
        .iter()
        .filter(|e| AssetType::from_extension(&e.extension) == AssetType::Font)
        .count();
    if fonts > 0 {
        out.push(Recommendation {
            category: "font-loading".into(),
            priority: Priority::Medium,
            message: format!("{fonts} font files are never loaded; load font faces conditionally"),
        });
    }

    if !evidence.console_errors.is_empty() {
        out.push(Recommendation {
            category: "script-integrity".into(),
            priority: Priority::High,
            message: format!(
                "{} console errors while rendering the mirror; some scripts may be broken or missing",
                evidence.console_errors.len()
            ),
        });
    }

    if !report.missing_references.is_empty() {
        out.push(Recommendation {
            category: "broken-references".into(),
            priority: Priority::High,
            message: format!(
                "{} referenced paths do not exist in the mirror",
                report.missing_references.len()
            ),
        });
    }

    if !evidence.runtime_collected {
        out.push(Recommendation {
            category: "runtime-evidence".into(),
            priority: Priority::Low,
            message: "no browser pass ran; files loaded only through computed script paths \
                      are classified unused"
                .into(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> FileInventoryEntry {
        FileInventoryEntry {
            path: path.into(),
            size,
            modified: None,
            extension: crate::urls::extension_of(path),
        }
    }

    fn rules(keep: &[&str]) -> ClassifyRules {
        let mut config = MirrorConfig::default();
        config.keep_patterns = keep.iter().map(|s| s.to_string()).collect();
        ClassifyRules::from_config(&config).unwrap()
    }

    fn evidence(static_paths: &[&str], runtime: &[&str]) -> Evidence {
        Evidence {
            static_paths: static_paths.iter().map(|s| s.to_string()).collect(),
            runtime_paths: runtime.iter().map(|s| s.to_string()).collect(),
            runtime_collected: !runtime.is_empty(),
            ..Evidence::default()
        }
    }

    #[test]
    fn test_partition_and_waste_ratio() {
        let inventory = vec![
            file("index.html", 100),
            file("a.png", 300),
            file("b.png", 200),
            file("c.woff2", 400),
        ];
        let report = classify(&inventory, &evidence(&["a.png"], &[]), &rules(&[]));

        let unused: Vec<_> = report.unused.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(unused, vec!["c.woff2", "b.png"]);
        assert_eq!(
            report.essential.iter().collect::<Vec<_>>(),
            vec!["a.png", "index.html"]
        );
        assert_eq!(report.used_bytes + report.unused_bytes, report.total_bytes);
        assert_eq!(report.unused_bytes, 600);
        assert!((report.waste_ratio - 0.6).abs() < 1e-12);
        assert_eq!(report.unused_by_extension["png"].total_bytes, 200);
        assert_eq!(report.unused_by_extension["woff2"].count, 1);
    }

    #[test]
    fn test_entry_manifest_and_keep_patterns_are_protected() {
        let inventory = vec![
            file("index.html", 10),
            file(MANIFEST_FILE, 10),
            file("assets/js/cdn/lazy-chunk.js", 10),
            file("assets/js/cdn/other.js", 10),
        ];
        let report = classify(&inventory, &Evidence::default(), &rules(&["**/lazy-*.js"]));
        let unused: Vec<_> = report.unused.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(unused, vec!["assets/js/cdn/other.js"]);
    }

    #[test]
    fn test_recommendation_rules() {
        let inventory = vec![
            file("index.html", 1_000),
            file("hero.jpg", 200 * 1024),
            file("f.woff", 20_000),
        ];
        let mut ev = evidence(&["ghost.css"], &["index.html"]);
        ev.console_errors.push("[desktop] Uncaught TypeError".into());
        let report = classify(&inventory, &ev, &rules(&[]));

        let cats: Vec<_> = report
            .recommendations
            .iter()
            .map(|r| r.category.as_str())
            .collect();
        assert_eq!(
            cats,
            vec![
                "asset-collection",
                "responsive-images",
                "font-loading",
                "script-integrity",
                "broken-references",
            ]
        );
        assert_eq!(report.missing_references, vec!["ghost.css"]);
    }

    #[test]
    fn test_empty_inventory_has_zero_waste() {
        let report = classify(&[], &Evidence::default(), &rules(&[]));
        assert_eq!(report.waste_ratio, 0.0);
        assert_eq!(report.total_files, 0);
    }

    #[test]
    fn test_invalid_keep_pattern_is_config_error() {
        let err = build_keep_set(&["a[".to_string()]).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));
    }
}
