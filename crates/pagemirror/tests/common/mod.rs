//! Scripted renderer and config shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use pagemirror::renderer::{
    NavigationResult, NetworkSnapshot, RenderContext, RenderError, RenderResult, Renderer,
    ScrollPosition,
};
use pagemirror::{MirrorConfig, Viewport};

/// What one viewport's page does when rendered.
#[derive(Debug, Clone, Default)]
pub struct PagePlan {
    pub markup: String,
    /// Request paths, resolved against the navigated URL.
    pub network: Vec<String>,
    pub console_errors: Vec<String>,
    pub fail_navigation: bool,
    /// Clicking `.tab` destroys the execution context.
    pub destroy_on_click: bool,
}

impl PagePlan {
    pub fn new(markup: &str) -> Self {
        Self {
            markup: markup.to_string(),
            ..Self::default()
        }
    }

    pub fn requests(mut self, paths: &[&str]) -> Self {
        self.network = paths.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// Renderer whose pages are scripted per viewport label.
#[derive(Default)]
pub struct ScriptedRenderer {
    pub plans: HashMap<String, PagePlan>,
    pub navigations: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRenderer {
    pub fn with(mut self, label: &str, plan: PagePlan) -> Self {
        self.plans.insert(label.to_string(), plan);
        self
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn new_context(&self, viewport: &Viewport) -> RenderResult<Box<dyn RenderContext>> {
        let plan = self
            .plans
            .get(&viewport.label)
            .cloned()
            .ok_or_else(|| RenderError::Unavailable(format!("no plan for {}", viewport.label)))?;
        Ok(Box::new(ScriptedContext {
            label: viewport.label.clone(),
            plan,
            observed: Vec::new(),
            navigations: self.navigations.clone(),
        }))
    }

    async fn shutdown(&self) -> RenderResult<()> {
        Ok(())
    }
}

struct ScriptedContext {
    label: String,
    plan: PagePlan,
    observed: Vec<String>,
    navigations: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RenderContext for ScriptedContext {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> RenderResult<NavigationResult> {
        self.navigations.lock().unwrap().push(self.label.clone());
        if self.plan.fail_navigation {
            return Err(RenderError::Navigation("net::ERR_CONNECTION_RESET".into()));
        }
        let base = Url::parse(url).map_err(|e| RenderError::Navigation(e.to_string()))?;
        self.observed.push(base.to_string());
        for path in &self.plan.network {
            if let Ok(resolved) = base.join(path) {
                self.observed.push(resolved.to_string());
            }
        }
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn evaluate(&self, _script: &str) -> RenderResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    fn network_snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            in_flight: 0,
            total: self.observed.len(),
        }
    }

    fn network_requests(&self) -> Vec<String> {
        self.observed.clone()
    }

    fn console_errors(&self) -> Vec<String> {
        self.plan.console_errors.clone()
    }

    async fn screenshot(&self, _path: &Path) -> RenderResult<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> RenderResult<()> {
        Ok(())
    }

    async fn html(&self) -> RenderResult<String> {
        Ok(self.plan.markup.clone())
    }

    async fn expand_disclosures(&self) -> RenderResult<u64> {
        Ok(0)
    }

    async fn scroll_step(&self) -> RenderResult<ScrollPosition> {
        Ok(ScrollPosition { y: 0.0, max_y: 0.0 })
    }

    async fn count_matches(&self, selector: &str) -> RenderResult<u64> {
        Ok(u64::from(selector == ".tab"))
    }

    async fn click_nth(&self, _selector: &str, _index: u64) -> RenderResult<bool> {
        if self.plan.destroy_on_click {
            Err(RenderError::ContextDestroyed)
        } else {
            Ok(true)
        }
    }

    async fn resource_timing(&self) -> RenderResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Three-viewport config with delays shrunk for tests.
pub fn fast_config() -> MirrorConfig {
    MirrorConfig {
        idle_window_ms: 5,
        idle_ceiling_ms: 50,
        idle_poll_ms: 1,
        step_timeout_ms: 200,
        scroll_pause_ms: 1,
        inter_pass_delay_ms: 1,
        click_selectors: vec![".tab".to_string()],
        ..MirrorConfig::default()
    }
    .validated()
    .unwrap()
}
