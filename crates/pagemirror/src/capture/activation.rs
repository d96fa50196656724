//! Content activation: expand, scroll, and click to surface lazy content.
//!
//! Each step runs under its own timeout and reports a [`StepOutcome`]. A
//! step interrupted by navigation is recorded and skipped; the protocol
//! always moves on to the next step.

use std::future::Future;
use std::time::Duration;

use crate::config::MirrorConfig;
use crate::renderer::{RenderContext, RenderError, RenderResult};
use crate::types::{MirrorError, StepOutcome, StepRecord};

/// Scroll offsets closer than this count as no progress.
const SCROLL_EPSILON: f64 = 1.0;

/// Parameters for one activation run.
#[derive(Debug, Clone)]
pub struct ActivationSettings {
    pub step_timeout: Duration,
    pub scroll_step_cap: u32,
    pub scroll_pause: Duration,
    pub selectors: Vec<String>,
    pub max_clicks_per_selector: u32,
}

impl From<&MirrorConfig> for ActivationSettings {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            step_timeout: config.step_timeout(),
            scroll_step_cap: config.scroll_step_cap,
            scroll_pause: Duration::from_millis(config.scroll_pause_ms),
            selectors: config.click_selectors.clone(),
            max_clicks_per_selector: config.max_clicks_per_selector,
        }
    }
}

/// Run a render call under a timeout, folding failures into a step outcome.
async fn run_step<T, F>(step_timeout: Duration, fut: F) -> Result<T, StepOutcome>
where
    F: Future<Output = RenderResult<T>>,
{
    match tokio::time::timeout(step_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(RenderError::ContextDestroyed)) => Err(StepOutcome::SkippedNavigation),
        Ok(Err(e)) => Err(StepOutcome::Failed(e.to_string())),
        Err(_) => Err(StepOutcome::TimedOut),
    }
}

fn record(step: impl Into<String>, outcome: StepOutcome) -> StepRecord {
    let step = step.into();
    match &outcome {
        StepOutcome::Completed => tracing::debug!("activation step {step} completed"),
        StepOutcome::SkippedNavigation => tracing::warn!(
            "{}",
            MirrorError::InteractionInterrupted { step: step.clone() }
        ),
        StepOutcome::TimedOut => tracing::warn!("activation step {step} timed out"),
        StepOutcome::Failed(reason) => tracing::warn!("activation step {step} failed: {reason}"),
    }
    StepRecord { step, outcome }
}

/// Expand disclosures, scroll to the bottom, then click heuristic controls.
pub async fn activate(ctx: &dyn RenderContext, settings: &ActivationSettings) -> Vec<StepRecord> {
    let mut steps = Vec::new();

    let outcome = match run_step(settings.step_timeout, ctx.expand_disclosures()).await {
        Ok(_) => StepOutcome::Completed,
        Err(outcome) => outcome,
    };
    steps.push(record("expand", outcome));

    steps.push(record("scroll", scroll_to_bottom(ctx, settings).await));

    for selector in &settings.selectors {
        let outcome = click_selector(ctx, selector, settings).await;
        steps.push(record(format!("click {selector}"), outcome));
    }

    steps
}

async fn scroll_to_bottom(ctx: &dyn RenderContext, settings: &ActivationSettings) -> StepOutcome {
    let mut last_y: Option<f64> = None;
    for _ in 0..settings.scroll_step_cap {
        let pos = match run_step(settings.step_timeout, ctx.scroll_step()).await {
            Ok(pos) => pos,
            Err(outcome) => return outcome,
        };
        let stalled = last_y.is_some_and(|y| pos.y - y < SCROLL_EPSILON);
        if stalled || pos.y >= pos.max_y {
            break;
        }
        last_y = Some(pos.y);
        tokio::time::sleep(settings.scroll_pause).await;
    }
    StepOutcome::Completed
}

async fn click_selector(
    ctx: &dyn RenderContext,
    selector: &str,
    settings: &ActivationSettings,
) -> StepOutcome {
    let count = match run_step(settings.step_timeout, ctx.count_matches(selector)).await {
        Ok(n) => n,
        Err(outcome) => return outcome,
    };

    let limit = count.min(u64::from(settings.max_clicks_per_selector));
    let mut last_failure = None;
    for index in 0..limit {
        match run_step(settings.step_timeout, ctx.click_nth(selector, index)).await {
            Ok(_) => {}
            Err(StepOutcome::SkippedNavigation) => return StepOutcome::SkippedNavigation,
            // An unresponsive control is abandoned; later matches still get a try.
            Err(outcome) => last_failure = Some(outcome),
        }
    }
    last_failure.unwrap_or(StepOutcome::Completed)
}
