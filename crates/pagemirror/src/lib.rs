//! PageMirror: render-driven page mirroring with asset usage audit and safe pruning.

pub mod capture;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod prune;
pub mod renderer;
pub mod resolve;
pub mod server;
pub mod types;
pub mod urls;

pub use capture::{capture_all, capture_pass, merge_passes, MergedCapture};
pub use classify::{classify, AuditReport, ClassifyRules, Evidence};
pub use config::MirrorConfig;
pub use discovery::AssetGraph;
pub use fetch::{Fetcher, HttpFetcher};
pub use manifest::{MirrorManifest, MANIFEST_FILE};
pub use pipeline::{
    audit, cleanup, export, AuditContext, AuditOutcome, CleanupContext, ExportContext,
    ExportSummary,
};
pub use prune::{prune, PruneOutcome};
pub use renderer::{ChromiumRenderer, RenderContext, Renderer};
pub use resolve::{resolve_assets, rewrite_document, ResolutionMap};
pub use server::MirrorServer;
pub use types::*;
