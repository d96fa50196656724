//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Content
//! activation helpers have default implementations built on
//! [`RenderContext::evaluate`], so an engine adapter only has to supply the
//! primitives.

pub mod chromium;

pub use chromium::{find_chromium, ChromiumRenderer};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Viewport;

/// Failures reported by a rendering context.
///
/// Engine adapters map their own error text onto these variants; callers
/// never inspect message strings.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// The page navigated or reloaded and the scripting context is gone.
    #[error("execution context destroyed by navigation")]
    ContextDestroyed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("browser unavailable: {0}")]
    Unavailable(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Vertical scroll state after one scroll step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub y: f64,
    pub max_y: f64,
}

/// Point-in-time view of the page's request activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkSnapshot {
    /// Requests started but not yet finished or failed.
    pub in_flight: usize,
    /// Requests started since the context opened.
    pub total: usize,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open an isolated context (tab) sized to `viewport`.
    async fn new_context(&self, viewport: &Viewport) -> RenderResult<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> RenderResult<()>;
}

const EXPAND_SCRIPT: &str = r#"(() => {
    let n = 0;
    document.querySelectorAll('details:not([open])').forEach(d => { d.open = true; n++; });
    document.querySelectorAll('[aria-expanded="false"]').forEach(el => {
        el.setAttribute('aria-expanded', 'true');
        const id = el.getAttribute('aria-controls');
        const target = id && document.getElementById(id);
        if (target) { target.hidden = false; target.style.display = ''; }
        n++;
    });
    document.querySelectorAll('.collapse:not(.show)').forEach(el => { el.classList.add('show'); n++; });
    return n;
})()"#;

const SCROLL_SCRIPT: &str = r#"(() => {
    window.scrollBy(0, window.innerHeight);
    const root = document.scrollingElement || document.documentElement;
    return { y: window.scrollY, max_y: Math.max(0, root.scrollHeight - window.innerHeight) };
})()"#;

const RESOURCE_TIMING_SCRIPT: &str =
    "performance.getEntriesByType('resource').map(e => e.name)";

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL, failing after `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> RenderResult<NavigationResult>;

    /// Execute JavaScript in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> RenderResult<serde_json::Value>;

    /// Current request counts, from the context's network listener.
    fn network_snapshot(&self) -> NetworkSnapshot;

    /// Every request URL observed since the context opened.
    fn network_requests(&self) -> Vec<String>;

    /// Console errors and uncaught exceptions observed so far.
    fn console_errors(&self) -> Vec<String>;

    /// Save a full-page PNG screenshot.
    async fn screenshot(&self, path: &Path) -> RenderResult<()>;

    /// Close this context.
    async fn close(self: Box<Self>) -> RenderResult<()>;

    /// Get the full page HTML.
    async fn html(&self) -> RenderResult<String> {
        let value = self.evaluate("document.documentElement.outerHTML").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RenderError::Protocol("outerHTML was not a string".into()))
    }

    /// Open collapsed disclosure widgets, returning how many were opened.
    async fn expand_disclosures(&self) -> RenderResult<u64> {
        let value = self.evaluate(EXPAND_SCRIPT).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    /// Scroll one viewport height down.
    async fn scroll_step(&self) -> RenderResult<ScrollPosition> {
        let value = self.evaluate(SCROLL_SCRIPT).await?;
        serde_json::from_value(value).map_err(|e| RenderError::Protocol(e.to_string()))
    }

    /// Number of elements matching `selector`.
    async fn count_matches(&self, selector: &str) -> RenderResult<u64> {
        let sel = serde_json::to_string(selector).map_err(|e| RenderError::Protocol(e.to_string()))?;
        let value = self
            .evaluate(&format!("document.querySelectorAll({sel}).length"))
            .await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    /// Click the `index`-th match of `selector` if it is rendered.
    ///
    /// Returns whether a click was dispatched.
    async fn click_nth(&self, selector: &str, index: u64) -> RenderResult<bool> {
        let sel = serde_json::to_string(selector).map_err(|e| RenderError::Protocol(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelectorAll({sel})[{index}]; \
             if (!el || el.offsetParent === null) return false; \
             el.click(); return true; }})()"
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// URLs from the browser's resource-timing buffer.
    async fn resource_timing(&self) -> RenderResult<Vec<String>> {
        let value = self.evaluate(RESOURCE_TIMING_SCRIPT).await?;
        serde_json::from_value(value).map_err(|e| RenderError::Protocol(e.to_string()))
    }
}
