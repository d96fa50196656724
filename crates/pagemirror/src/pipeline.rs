//! The three stages: export, audit, cleanup.
//!
//! Each stage takes an immutable context, persists its artifact, and
//! returns a summary. Stages share nothing but files on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use url::Url;

use crate::capture::{self, MergedCapture};
use crate::classify::{
    self, AuditReport, ClassifyRules, Evidence, ReportMeta, GRAPH_FILE, STATIC_ORIGIN,
};
use crate::config::MirrorConfig;
use crate::discovery::{self, AssetGraph};
use crate::fetch::Fetcher;
use crate::manifest::MirrorManifest;
use crate::prune::{self, PruneOutcome};
use crate::renderer::Renderer;
use crate::resolve::{self, RemoteAsset, ResolveSettings};
use crate::server::MirrorServer;
use crate::types::{FileInventoryEntry, MirrorError, MirrorResult, UsageReport};

/// Inputs of an export.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub url: Url,
    pub out_dir: PathBuf,
    pub config: MirrorConfig,
}

/// Result of [`export`].
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub out_dir: PathBuf,
    pub entry_path: PathBuf,
    pub discovered: usize,
    pub downloaded: usize,
    pub inlined: usize,
    /// Assets kept as remote references, with reasons.
    pub remote: Vec<RemoteAsset>,
    pub console_errors: usize,
}

/// Render `ctx.url` at every viewport, resolve what was found, and write
/// the rewritten entry document, asset tree, and manifest.
///
/// Fails only when no viewport produced a document or the output
/// directory cannot be written.
pub async fn export(
    ctx: &ExportContext,
    renderer: &dyn Renderer,
    fetcher: &dyn Fetcher,
) -> MirrorResult<ExportSummary> {
    let config = &ctx.config;
    let entry_path = ctx.out_dir.join(&config.entry_document);
    tokio::fs::create_dir_all(&ctx.out_dir).await?;

    let passes = capture::capture_all(renderer, ctx.url.as_str(), config).await;
    if !passes.iter().any(|p| p.navigated()) {
        tracing::error!("no viewport could load {}", ctx.url);
        return Err(MirrorError::EntryDocumentMissing(entry_path));
    }

    let MergedCapture {
        graph,
        canonical_markup,
        canonical_viewport,
        viewports,
        summaries,
        console_errors,
        ..
    } = capture::merge_passes(&passes, &ctx.url);
    let discovered = graph.len();
    tracing::info!("discovered {discovered} assets across {} viewports", viewports.len());

    let page_base = {
        let parsed = scraper::Html::parse_document(&canonical_markup);
        discovery::document_base(&parsed, &ctx.url)
    };
    let resolution = resolve::resolve_assets(
        fetcher,
        graph,
        &page_base,
        &ctx.out_dir,
        &ResolveSettings::from(config),
    )
    .await?;

    let document = resolve::rewrite_document(
        &canonical_markup,
        &ctx.url,
        &resolution.map,
        &config.entry_document,
    );
    tokio::fs::write(&entry_path, document).await?;

    let manifest = MirrorManifest {
        source_url: ctx.url.to_string(),
        exported_at: Utc::now(),
        entry_document: config.entry_document.clone(),
        viewports,
        resource_counts: summaries,
        canonical_viewport,
        discovered_assets: discovered,
        downloaded_assets: resolution.downloaded,
        inlined_assets: resolution.inlined,
        remote_assets: resolution.remote.clone(),
        console_errors: console_errors.clone(),
    };
    manifest.write(&ctx.out_dir).await?;

    for remote in &resolution.remote {
        tracing::warn!("kept remote ({}): {} {}", remote.kind, remote.url, remote.reason);
    }
    tracing::info!(
        "export complete: {} discovered, {} downloaded, {} inlined, {} remote, {} console errors",
        discovered,
        resolution.downloaded,
        resolution.inlined,
        resolution.remote.len(),
        console_errors.len()
    );

    Ok(ExportSummary {
        out_dir: ctx.out_dir.clone(),
        entry_path,
        discovered,
        downloaded: resolution.downloaded,
        inlined: resolution.inlined,
        remote: resolution.remote,
        console_errors: console_errors.len(),
    })
}

/// Inputs of an audit.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub mirror_dir: PathBuf,
    /// Where the report and graph go; `<mirror>-audit` when unset.
    pub report_dir: Option<PathBuf>,
    pub config: MirrorConfig,
}

/// Result of [`audit`].
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub report: AuditReport,
    pub usage: UsageReport,
    pub report_path: PathBuf,
    pub graph_path: PathBuf,
}

/// Classify every file of a produced mirror as essential or unused.
///
/// With a renderer, the mirror is served on loopback and captured at every
/// viewport; without one, only static evidence is used and the report says
/// so.
pub async fn audit(
    ctx: &AuditContext,
    renderer: Option<&dyn Renderer>,
) -> MirrorResult<AuditOutcome> {
    let config = &ctx.config;
    let root = &ctx.mirror_dir;
    let entry_path = root.join(&config.entry_document);
    if !tokio::fs::try_exists(&entry_path).await.unwrap_or(false) {
        return Err(MirrorError::EntryDocumentMissing(entry_path));
    }

    let rules = ClassifyRules::from_config(config)?;
    let inventory = classify::walk_inventory(root)?;
    let manifest = MirrorManifest::read(root).await?;
    tracing::info!("inventory: {} files under {}", inventory.len(), root.display());

    let server = match renderer {
        Some(_) => Some(MirrorServer::start(root).await?),
        None => None,
    };
    let origin = match &server {
        Some(server) => Url::parse(&server.base_url()),
        None => Url::parse(STATIC_ORIGIN),
    }
    .map_err(|e| MirrorError::InvalidUrl(e.to_string()))?;
    let page_url = origin
        .join(&config.entry_document)
        .map_err(|e| MirrorError::InvalidUrl(e.to_string()))?;

    let mut evidence = Evidence::default();
    let (static_paths, candidates) =
        classify::collect_static(root, &config.entry_document, &origin).await?;
    evidence.static_paths = static_paths;
    evidence.candidates = candidates;

    let mut viewports_tested = Vec::new();
    if let Some(renderer) = renderer {
        let passes = capture::capture_all(renderer, page_url.as_str(), config).await;
        viewports_tested = passes.iter().map(|p| p.viewport.label.clone()).collect();
        classify::absorb_passes(&mut evidence, &passes, &page_url, &origin);
    } else {
        tracing::warn!("no renderer: audit uses static evidence only");
    }
    if let Some(server) = server {
        server.shutdown().await;
    }

    let usage = classify::classify(&inventory, &evidence, &rules);
    let report = AuditReport::build(
        &usage,
        &evidence,
        ReportMeta {
            audit_date: Utc::now(),
            source_url: manifest.as_ref().map(|m| m.source_url.clone()),
            export_dir: root.clone(),
            viewports_tested,
            largest_unused_limit: config.largest_unused_limit,
        },
    );

    let report_dir = ctx
        .report_dir
        .clone()
        .unwrap_or_else(|| classify::default_report_dir(root));
    let report_path = report.write(&report_dir).await?;
    let graph_path = report_dir.join(GRAPH_FILE);
    let graph = evidence_graph(&evidence, &inventory, &usage, &origin);
    let runtime_assets = evidence.runtime_paths.iter().cloned().collect();
    tokio::fs::write(
        &graph_path,
        serde_json::to_string_pretty(&graph.document(runtime_assets))?,
    )
    .await?;

    tracing::info!(
        "audit complete: {} files, {} unused, waste {:.1}%, {} console errors",
        usage.total_files,
        usage.unused.len(),
        usage.waste_ratio * 100.0,
        evidence.console_errors.len()
    );

    Ok(AuditOutcome {
        report,
        usage,
        report_path,
        graph_path,
    })
}

/// Dependency graph of everything the audit saw, with local paths filled in
/// for files that exist in the mirror.
fn evidence_graph(
    evidence: &Evidence,
    inventory: &[FileInventoryEntry],
    usage: &UsageReport,
    origin: &Url,
) -> AssetGraph {
    let mut graph = AssetGraph::new();
    graph.extend(&evidence.candidates);

    let located: Vec<(String, String, u64)> = graph
        .assets()
        .filter_map(|asset| {
            let url = Url::parse(&asset.url).ok()?;
            let path = classify::mirror_path(&url, origin)?;
            let entry = inventory.iter().find(|e| e.path == path)?;
            Some((asset.url.clone(), path, entry.size))
        })
        .collect();

    let mut used = BTreeSet::new();
    for (key, path, size) in located {
        if usage.essential.contains(&path) {
            used.insert(key.clone());
        }
        graph.set_local(&key, path, size);
    }
    graph.mark_essential(&used);
    graph
}

/// Inputs of a cleanup.
#[derive(Debug, Clone)]
pub struct CleanupContext {
    pub mirror_dir: PathBuf,
    pub report_path: PathBuf,
    pub backup_dir: PathBuf,
    pub dry_run: bool,
    /// Allow a report without runtime evidence.
    pub force: bool,
    pub config: MirrorConfig,
}

/// Prune the unused files listed in an audit report.
pub async fn cleanup(ctx: &CleanupContext) -> MirrorResult<PruneOutcome> {
    let report = AuditReport::read(&ctx.report_path).await?;
    let manifest = MirrorManifest::read(&ctx.mirror_dir).await?;
    prune::check_report(&report, manifest.as_ref(), ctx.force)?;

    let rules = ClassifyRules::from_config(&ctx.config)?;
    let (kept, plan): (Vec<String>, Vec<String>) = report
        .unused_files
        .iter()
        .map(|f| f.path.clone())
        .partition(|p| rules.keep.is_match(p));
    for path in &kept {
        tracing::info!("keeping {path} (matches a keep pattern)");
    }

    let entry = manifest
        .as_ref()
        .map(|m| m.entry_document.as_str())
        .unwrap_or(ctx.config.entry_document.as_str());
    let mut outcome = prune::prune(&ctx.mirror_dir, &ctx.backup_dir, &plan, entry, ctx.dry_run)?;
    outcome.protected.extend(kept);
    Ok(outcome)
}

/// Absolute form of `dir`, resolving `.` and relative paths against the
/// current directory.
pub fn absolute_dir(dir: &Path) -> MirrorResult<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    let joined = cwd.join(dir);
    Ok(joined.canonicalize().unwrap_or(joined))
}
