//! Runtime capture: one rendering pass per viewport, merged afterwards.
//!
//! Passes run strictly in sequence with a fixed delay between them, so each
//! network log belongs to exactly one viewport. Failures stay inside the
//! pass that hit them: a pass that cannot navigate yields placeholder
//! markup and no resources, and the loop continues with the next viewport.

pub mod activation;
pub mod idle;

pub use activation::{activate, ActivationSettings};
pub use idle::{wait_for_network_idle, IdleOutcome, IdleSettings};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use url::Url;

use crate::config::MirrorConfig;
use crate::discovery::{self, AssetGraph};
use crate::renderer::{RenderContext, Renderer};
use crate::types::{CapturePassResult, MirrorError, Viewport};
use crate::urls;

/// Markup used when a pass cannot produce a DOM snapshot.
pub const PLACEHOLDER_MARKUP: &str = "<html><head></head><body></body></html>";

fn idle_settings(config: &MirrorConfig) -> IdleSettings {
    IdleSettings {
        window: Duration::from_millis(config.idle_window_ms),
        ceiling: Duration::from_millis(config.idle_ceiling_ms),
        poll: Duration::from_millis(config.idle_poll_ms),
    }
}

fn failed_pass(viewport: &Viewport, reason: String) -> CapturePassResult {
    let err = MirrorError::NavigationFailed {
        viewport: viewport.label.clone(),
        reason,
    };
    tracing::warn!("{err}");
    CapturePassResult {
        viewport: viewport.clone(),
        markup: PLACEHOLDER_MARKUP.to_string(),
        resource_timing: Vec::new(),
        network_requests: Vec::new(),
        console_errors: Vec::new(),
        navigation_error: Some(err.to_string()),
        steps: Vec::new(),
    }
}

/// Run one rendering pass at `viewport`.
///
/// Never fails: every error is folded into the returned result.
pub async fn capture_pass(
    renderer: &dyn Renderer,
    url: &str,
    viewport: &Viewport,
    config: &MirrorConfig,
) -> CapturePassResult {
    let mut ctx = match renderer.new_context(viewport).await {
        Ok(ctx) => ctx,
        Err(e) => return failed_pass(viewport, e.to_string()),
    };

    if let Err(e) = ctx.navigate(url, config.navigation_timeout()).await {
        let result = failed_pass(viewport, e.to_string());
        close_quietly(ctx).await;
        return result;
    }

    let idle = idle_settings(config);
    if wait_for_network_idle(|| ctx.network_snapshot(), idle).await == IdleOutcome::CeilingReached {
        tracing::debug!("viewport {}: idle ceiling reached after load", viewport.label);
    }

    let steps = activate(ctx.as_ref(), &ActivationSettings::from(config)).await;
    wait_for_network_idle(|| ctx.network_snapshot(), idle).await;

    let markup = match tokio::time::timeout(config.step_timeout() * 5, ctx.html()).await {
        Ok(Ok(markup)) => markup,
        Ok(Err(e)) => {
            tracing::warn!("viewport {}: DOM retrieval failed: {e}", viewport.label);
            PLACEHOLDER_MARKUP.to_string()
        }
        Err(_) => {
            tracing::warn!("viewport {}: DOM retrieval timed out", viewport.label);
            PLACEHOLDER_MARKUP.to_string()
        }
    };

    let timing = tokio::time::timeout(config.step_timeout(), ctx.resource_timing()).await;
    let resource_timing = match timing {
        Ok(Ok(urls)) => urls,
        Ok(Err(e)) => {
            tracing::warn!("viewport {}: resource timing unavailable: {e}", viewport.label);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("viewport {}: resource timing timed out", viewport.label);
            Vec::new()
        }
    };

    if let Some(dir) = &config.screenshot_dir {
        let shot = save_screenshot(ctx.as_ref(), dir, viewport);
        if tokio::time::timeout(config.step_timeout() * 5, shot).await.is_err() {
            tracing::warn!("viewport {}: screenshot timed out", viewport.label);
        }
    }

    let result = CapturePassResult {
        viewport: viewport.clone(),
        markup,
        resource_timing,
        network_requests: ctx.network_requests(),
        console_errors: ctx.console_errors(),
        navigation_error: None,
        steps,
    };
    close_quietly(ctx).await;
    result
}

async fn save_screenshot(ctx: &dyn RenderContext, dir: &std::path::Path, viewport: &Viewport) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!("cannot create screenshot dir {}: {e}", dir.display());
        return;
    }
    let path = dir.join(format!("{}.png", urls::sanitize_segment(&viewport.label)));
    match ctx.screenshot(&path).await {
        Ok(()) => tracing::info!("saved screenshot {}", path.display()),
        Err(e) => tracing::warn!("screenshot for {} failed: {e}", viewport.label),
    }
}

async fn close_quietly(ctx: Box<dyn RenderContext>) {
    if let Err(e) = ctx.close().await {
        tracing::debug!("context close: {e}");
    }
}

/// Capture every configured viewport in order.
pub async fn capture_all(
    renderer: &dyn Renderer,
    url: &str,
    config: &MirrorConfig,
) -> Vec<CapturePassResult> {
    let mut passes = Vec::with_capacity(config.viewports.len());
    for (i, viewport) in config.viewports.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(config.inter_pass_delay()).await;
        }
        tracing::info!(
            "capturing {} ({}x{})",
            viewport.label,
            viewport.width,
            viewport.height
        );
        let pass = capture_pass(renderer, url, viewport, config).await;
        tracing::info!(
            "viewport {}: {} network requests, {} timing entries, {} console errors",
            viewport.label,
            pass.network_requests.len(),
            pass.resource_timing.len(),
            pass.console_errors.len()
        );
        passes.push(pass);
    }
    passes
}

/// Per-viewport counts kept after the passes are merged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PassSummary {
    pub navigated: bool,
    /// Distinct normalized asset URLs this pass discovered.
    pub asset_count: usize,
    pub network_requests: usize,
    pub console_errors: usize,
}

/// Union of all passes plus the canonical document.
#[derive(Debug, Clone)]
pub struct MergedCapture {
    pub graph: AssetGraph,
    pub canonical_markup: String,
    pub canonical_viewport: Option<String>,
    pub viewports: Vec<Viewport>,
    pub summaries: BTreeMap<String, PassSummary>,
    pub console_errors: Vec<String>,
    /// Normalized URLs seen on the network or in resource timing.
    pub runtime_urls: BTreeSet<String>,
    pub network_request_count: usize,
}

/// Index of the canonical pass: the largest viewport that navigated, ties
/// going to the later pass. Falls back to the last pass.
pub fn canonical_index(passes: &[CapturePassResult]) -> Option<usize> {
    passes
        .iter()
        .enumerate()
        .filter(|(_, p)| p.navigated())
        .max_by_key(|(i, p)| (p.viewport.area(), *i))
        .map(|(i, _)| i)
        .or_else(|| passes.len().checked_sub(1))
}

/// Merge passes by set union of DOM candidates and observed URLs.
///
/// `page_url` is excluded from the asset set: it is the document itself.
pub fn merge_passes(passes: &[CapturePassResult], page_url: &Url) -> MergedCapture {
    let page_key = urls::normalize(page_url);
    let mut graph = AssetGraph::new();
    let mut summaries = BTreeMap::new();
    let mut console_errors = Vec::new();
    let mut runtime_urls = BTreeSet::new();
    let mut network_request_count = 0;

    for pass in passes {
        let mut candidates = discovery::extract_html(&pass.markup, page_url);
        for raw in pass.observed_urls() {
            if let Some(c) = discovery::network_candidate(raw) {
                runtime_urls.insert(urls::normalize_str(&c.url).unwrap_or_default());
                candidates.push(c);
            }
        }
        candidates.retain(|c| urls::normalize_str(&c.url).as_deref() != Some(page_key.as_str()));
        runtime_urls.remove(&page_key);

        let distinct: BTreeSet<String> = candidates
            .iter()
            .filter_map(|c| urls::normalize_str(&c.url))
            .collect();
        graph.extend(&candidates);

        summaries.insert(
            pass.viewport.label.clone(),
            PassSummary {
                navigated: pass.navigated(),
                asset_count: distinct.len(),
                network_requests: pass.network_requests.len(),
                console_errors: pass.console_errors.len(),
            },
        );
        network_request_count += pass.network_requests.len();
        console_errors.extend(
            pass.console_errors
                .iter()
                .map(|e| format!("[{}] {e}", pass.viewport.label)),
        );
    }
    runtime_urls.remove("");

    let canonical = canonical_index(passes);
    MergedCapture {
        graph,
        canonical_markup: canonical
            .map(|i| passes[i].markup.clone())
            .unwrap_or_else(|| PLACEHOLDER_MARKUP.to_string()),
        canonical_viewport: canonical.map(|i| passes[i].viewport.label.clone()),
        viewports: passes.iter().map(|p| p.viewport.clone()).collect(),
        summaries,
        console_errors,
        runtime_urls,
        network_request_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{NavigationResult, NetworkSnapshot, RenderResult, ScrollPosition};

    fn pass(label: &str, w: u32, h: u32, markup: &str, network: &[&str]) -> CapturePassResult {
        CapturePassResult {
            viewport: Viewport::new(label, w, h),
            markup: markup.to_string(),
            resource_timing: Vec::new(),
            network_requests: network.iter().map(|s| s.to_string()).collect(),
            console_errors: Vec::new(),
            navigation_error: None,
            steps: Vec::new(),
        }
    }

    #[test]
    fn test_canonical_prefers_largest_navigated() {
        let mut passes = vec![
            pass("desktop", 1920, 1080, "<p>d</p>", &[]),
            pass("tablet", 768, 1024, "<p>t</p>", &[]),
            pass("mobile", 375, 667, "<p>m</p>", &[]),
        ];
        assert_eq!(canonical_index(&passes), Some(0));

        passes[0].navigation_error = Some("boom".into());
        assert_eq!(canonical_index(&passes), Some(1));

        for p in &mut passes {
            p.navigation_error = Some("boom".into());
        }
        assert_eq!(canonical_index(&passes), Some(2));
        assert_eq!(canonical_index(&[]), None);
    }

    #[test]
    fn test_canonical_tie_goes_to_later_pass() {
        let passes = vec![
            pass("a", 800, 600, "", &[]),
            pass("b", 600, 800, "", &[]),
        ];
        assert_eq!(canonical_index(&passes), Some(1));
    }

    #[test]
    fn test_merge_is_union_across_viewports() {
        let page = Url::parse("https://example.com/").unwrap();
        let passes = vec![
            pass(
                "desktop",
                1920,
                1080,
                r#"<img src="/big.jpg">"#,
                &["https://example.com/", "https://example.com/app.js"],
            ),
            pass(
                "mobile",
                375,
                667,
                r#"<img src="/small.jpg">"#,
                &["https://example.com/app.js?v=2", "https://example.com/m.css"],
            ),
        ];
        let merged = merge_passes(&passes, &page);

        let keys: Vec<_> = merged.graph.assets().map(|a| a.url.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "https://example.com/app.js",
                "https://example.com/big.jpg",
                "https://example.com/m.css",
                "https://example.com/small.jpg",
            ]
        );
        assert_eq!(merged.summaries["desktop"].asset_count, 2);
        assert_eq!(merged.summaries["mobile"].asset_count, 3);
        assert_eq!(merged.network_request_count, 4);
        assert!(!merged.runtime_urls.contains("https://example.com/"));
        assert_eq!(merged.canonical_viewport.as_deref(), Some("desktop"));
    }

    struct StalledTiming;

    #[async_trait::async_trait]
    impl RenderContext for StalledTiming {
        async fn navigate(&mut self, url: &str, _: Duration) -> RenderResult<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn evaluate(&self, _: &str) -> RenderResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
        fn network_snapshot(&self) -> NetworkSnapshot {
            NetworkSnapshot::default()
        }
        fn network_requests(&self) -> Vec<String> {
            vec!["https://example.com/app.js".into()]
        }
        fn console_errors(&self) -> Vec<String> {
            Vec::new()
        }
        async fn screenshot(&self, _: &std::path::Path) -> RenderResult<()> {
            Ok(())
        }
        async fn close(self: Box<Self>) -> RenderResult<()> {
            Ok(())
        }
        async fn html(&self) -> RenderResult<String> {
            Ok("<p>ok</p>".into())
        }
        async fn expand_disclosures(&self) -> RenderResult<u64> {
            Ok(0)
        }
        async fn scroll_step(&self) -> RenderResult<ScrollPosition> {
            Ok(ScrollPosition { y: 0.0, max_y: 0.0 })
        }
        async fn count_matches(&self, _: &str) -> RenderResult<u64> {
            Ok(0)
        }
        async fn resource_timing(&self) -> RenderResult<Vec<String>> {
            std::future::pending().await
        }
    }

    struct StalledRenderer;

    #[async_trait::async_trait]
    impl Renderer for StalledRenderer {
        async fn new_context(&self, _: &Viewport) -> RenderResult<Box<dyn RenderContext>> {
            Ok(Box::new(StalledTiming))
        }
        async fn shutdown(&self) -> RenderResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_resource_timing_does_not_hang_pass() {
        let config = MirrorConfig::default();
        let viewport = Viewport::new("desktop", 1920, 1080);
        let result = capture_pass(&StalledRenderer, "https://example.com/", &viewport, &config).await;

        assert!(result.navigated());
        assert_eq!(result.markup, "<p>ok</p>");
        assert!(result.resource_timing.is_empty());
        assert_eq!(result.network_requests, vec!["https://example.com/app.js"]);
    }
}
