//! Chromium-based renderer using chromiumoxide.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{NavigationResult, NetworkSnapshot, RenderContext, RenderError, RenderResult, Renderer};
use crate::types::Viewport;

/// Environment variable pointing at a Chromium binary.
pub const CHROMIUM_PATH_ENV: &str = "PAGEMIRROR_CHROMIUM_PATH";

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Map chromiumoxide error text onto [`RenderError`].
///
/// This is the only place that looks at browser error messages.
fn classify_error(message: String) -> RenderError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("execution context was destroyed")
        || lower.contains("cannot find context with specified id")
        || lower.contains("inspected target navigated or closed")
        || lower.contains("context was destroyed")
    {
        RenderError::ContextDestroyed
    } else {
        RenderError::Protocol(message)
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: tokio::sync::Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch() -> RenderResult<Self> {
        let chrome_path = find_chromium().ok_or_else(|| {
            RenderError::Unavailable(format!(
                "Chromium not found; install it or set {CHROMIUM_PATH_ENV}"
            ))
        })?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| RenderError::Unavailable(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Unavailable(format!("failed to launch Chromium: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("browser handler event error: {e}");
                }
            }
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self, viewport: &Viewport) -> RenderResult<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Protocol(format!("failed to create page: {e}")))?;

        let metrics = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            viewport.width < 768,
        );
        page.execute(metrics)
            .await
            .map_err(|e| classify_error(e.to_string()))?;
        page.execute(EnableParams::default())
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        let log = Arc::new(Mutex::new(NetworkLog::default()));
        let listeners = spawn_listeners(&page, &log).await?;

        Ok(Box::new(ChromiumContext {
            page,
            log,
            listeners,
        }))
    }

    async fn shutdown(&self) -> RenderResult<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::debug!("browser close: {e}");
        }
        self.handler_task.abort();
        Ok(())
    }
}

/// Request and console activity recorded by a context's listeners.
#[derive(Debug, Default)]
struct NetworkLog {
    in_flight: HashSet<String>,
    total: usize,
    urls: Vec<String>,
    console_errors: Vec<String>,
}

fn lock(log: &Mutex<NetworkLog>) -> MutexGuard<'_, NetworkLog> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn spawn_listeners(
    page: &Page,
    log: &Arc<Mutex<NetworkLog>>,
) -> RenderResult<Vec<JoinHandle<()>>> {
    let to_err = |e: chromiumoxide::error::CdpError| classify_error(e.to_string());

    let mut started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(to_err)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(to_err)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(to_err)?;
    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(to_err)?;
    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(to_err)?;

    let mut tasks = Vec::new();

    let state = Arc::clone(log);
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = started.next().await {
            let mut log = lock(&state);
            if log.in_flight.insert(ev.request_id.inner().clone()) {
                log.total += 1;
            }
            log.urls.push(ev.request.url.clone());
        }
    }));

    let state = Arc::clone(log);
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = finished.next().await {
            lock(&state).in_flight.remove(ev.request_id.inner());
        }
    }));

    let state = Arc::clone(log);
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = failed.next().await {
            lock(&state).in_flight.remove(ev.request_id.inner());
        }
    }));

    let state = Arc::clone(log);
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = console.next().await {
            if ev.r#type != ConsoleApiCalledType::Error {
                continue;
            }
            let text = ev
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(v), _) => v.to_string(),
                    (None, Some(d)) => d.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            lock(&state).console_errors.push(text);
        }
    }));

    let state = Arc::clone(log);
    tasks.push(tokio::spawn(async move {
        while let Some(ev) = exceptions.next().await {
            let details = &ev.exception_details;
            let text = details
                .exception
                .as_ref()
                .and_then(|ex| ex.description.clone())
                .unwrap_or_else(|| details.text.clone());
            lock(&state).console_errors.push(text);
        }
    }));

    Ok(tasks)
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    log: Arc<Mutex<NetworkLog>>,
    listeners: Vec<JoinHandle<()>>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> RenderResult<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                let remaining = timeout.saturating_sub(start.elapsed());
                let _ = tokio::time::timeout(remaining, self.page.wait_for_navigation()).await;

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(RenderError::Navigation(e.to_string())),
            Err(_) => Err(RenderError::Timeout(timeout)),
        }
    }

    async fn evaluate(&self, script: &str) -> RenderResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| classify_error(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    fn network_snapshot(&self) -> NetworkSnapshot {
        let log = lock(&self.log);
        NetworkSnapshot {
            in_flight: log.in_flight.len(),
            total: log.total,
        }
    }

    fn network_requests(&self) -> Vec<String> {
        lock(&self.log).urls.clone()
    }

    fn console_errors(&self) -> Vec<String> {
        lock(&self.log).console_errors.clone()
    }

    async fn screenshot(&self, path: &Path) -> RenderResult<()> {
        let params = ScreenshotParams::builder().full_page(true).build();
        self.page
            .save_screenshot(params, path)
            .await
            .map(|_| ())
            .map_err(|e| classify_error(e.to_string()))
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        for task in &self.listeners {
            task.abort();
        }
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_context_destroyed() {
        assert_eq!(
            classify_error("Execution context was destroyed, most likely because of a navigation".into()),
            RenderError::ContextDestroyed
        );
        assert_eq!(
            classify_error("Cannot find context with specified id".into()),
            RenderError::ContextDestroyed
        );
        assert!(matches!(
            classify_error("Node is detached".into()),
            RenderError::Protocol(_)
        ));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_viewport_and_network_log() {
        let renderer = ChromiumRenderer::launch()
            .await
            .expect("failed to launch renderer");
        let mut ctx = renderer
            .new_context(&Viewport::new("mobile", 375, 667))
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<h1>Hello</h1><p>World</p>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        let width = ctx.evaluate("window.innerWidth").await.unwrap();
        assert_eq!(width.as_u64(), Some(375));

        let html = ctx.html().await.expect("html failed");
        assert!(html.contains("<h1>Hello</h1>"));
        assert_eq!(ctx.network_snapshot().in_flight, 0);

        ctx.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }
}
