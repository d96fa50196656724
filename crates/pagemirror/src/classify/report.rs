//! The audit report file and where it is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FileInventoryEntry, MirrorResult, Recommendation, UsageReport};

use super::Evidence;

pub const AUDIT_REPORT_FILE: &str = "audit-report.json";
pub const GRAPH_FILE: &str = "dependency-graph.json";

/// Sibling directory `<mirror>-audit` next to the mirror root.
pub fn default_report_dir(mirror_root: &Path) -> PathBuf {
    let name = mirror_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mirror".to_string());
    mirror_root.with_file_name(format!("{name}-audit"))
}

fn kb(bytes: u64) -> f64 {
    round2(bytes as f64 / 1024.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Totals block of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_files: usize,
    pub used_files: usize,
    pub unused_files: usize,
    pub total_size_kb: f64,
    pub used_size_kb: f64,
    pub unused_size_kb: f64,
    /// Unused bytes over total bytes, as a percentage with two decimals.
    pub waste_percentage: f64,
}

/// One unused file as listed in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnusedFile {
    pub path: String,
    pub size: u64,
    #[serde(rename = "sizeKB")]
    pub size_kb: f64,
    pub extension: String,
}

impl From<&FileInventoryEntry> for UnusedFile {
    fn from(entry: &FileInventoryEntry) -> Self {
        Self {
            path: entry.path.clone(),
            size: entry.size,
            size_kb: kb(entry.size),
            extension: entry.extension.clone(),
        }
    }
}

/// Per-extension block of `unused_files_by_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAggregate {
    pub count: usize,
    pub total_size_kb: f64,
}

/// Run metadata that does not come from the classification itself.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub audit_date: DateTime<Utc>,
    pub source_url: Option<String>,
    pub export_dir: PathBuf,
    pub viewports_tested: Vec<String>,
    pub largest_unused_limit: usize,
}

/// Contents of `audit-report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_date: DateTime<Utc>,
    pub source_url: Option<String>,
    pub export_dir: String,
    pub summary: AuditSummary,
    pub largest_unused_files: Vec<UnusedFile>,
    pub unused_files_by_type: BTreeMap<String, TypeAggregate>,
    pub console_errors: Vec<String>,
    pub network_requests: usize,
    pub viewports_tested: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    /// Every unused file, largest first. This is the prune plan.
    pub unused_files: Vec<UnusedFile>,
    pub viewport_asset_counts: BTreeMap<String, usize>,
    pub missing_references: Vec<String>,
    /// Whether a browser pass contributed to the essential set.
    pub runtime_evidence: bool,
}

impl AuditReport {
    pub fn build(usage: &UsageReport, evidence: &Evidence, meta: ReportMeta) -> Self {
        let unused_files: Vec<UnusedFile> = usage.unused.iter().map(UnusedFile::from).collect();
        Self {
            audit_date: meta.audit_date,
            source_url: meta.source_url,
            export_dir: meta.export_dir.display().to_string(),
            summary: AuditSummary {
                total_files: usage.total_files,
                used_files: usage.total_files - usage.unused.len(),
                unused_files: usage.unused.len(),
                total_size_kb: kb(usage.total_bytes),
                used_size_kb: kb(usage.used_bytes),
                unused_size_kb: kb(usage.unused_bytes),
                waste_percentage: round2(usage.waste_ratio * 100.0),
            },
            largest_unused_files: unused_files
                .iter()
                .take(meta.largest_unused_limit)
                .cloned()
                .collect(),
            unused_files_by_type: usage
                .unused_by_extension
                .iter()
                .map(|(ext, agg)| {
                    (
                        ext.clone(),
                        TypeAggregate {
                            count: agg.count,
                            total_size_kb: kb(agg.total_bytes),
                        },
                    )
                })
                .collect(),
            console_errors: evidence.console_errors.clone(),
            network_requests: evidence.network_requests,
            viewports_tested: meta.viewports_tested,
            recommendations: usage.recommendations.clone(),
            unused_files,
            viewport_asset_counts: usage.viewport_asset_counts.clone(),
            missing_references: usage.missing_references.clone(),
            runtime_evidence: evidence.runtime_collected,
        }
    }

    /// Write the report into `dir`, returning the file path.
    pub async fn write(&self, dir: &Path) -> MirrorResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(AUDIT_REPORT_FILE);
        tokio::fs::write(&path, serde_json::to_string_pretty(self)?).await?;
        Ok(path)
    }

    pub async fn read(path: &Path) -> MirrorResult<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
