//! Network-idle detection.

use std::time::Duration;

use tokio::time::Instant;

use crate::renderer::NetworkSnapshot;

/// How an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// Zero in-flight requests held for the full quiet window.
    Idle,
    /// The hard ceiling elapsed first.
    CeilingReached,
}

/// Timing parameters for [`wait_for_network_idle`].
#[derive(Debug, Clone, Copy)]
pub struct IdleSettings {
    pub window: Duration,
    pub ceiling: Duration,
    pub poll: Duration,
}

/// Poll `probe` until the page is network-idle or the ceiling is hit.
///
/// The quiet-window timer arms when the in-flight count reaches zero. Any
/// new request (a change in the total count) disarms it, even if that
/// request already finished between polls.
pub async fn wait_for_network_idle<F>(probe: F, settings: IdleSettings) -> IdleOutcome
where
    F: Fn() -> NetworkSnapshot,
{
    let deadline = Instant::now() + settings.ceiling;
    let mut armed_at: Option<Instant> = None;
    let mut last_total = probe().total;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return IdleOutcome::CeilingReached;
        }

        let snapshot = probe();
        if snapshot.total != last_total {
            last_total = snapshot.total;
            armed_at = None;
        }

        if snapshot.in_flight == 0 {
            let since = *armed_at.get_or_insert(now);
            if now.duration_since(since) >= settings.window {
                return IdleOutcome::Idle;
            }
        } else {
            armed_at = None;
        }

        tokio::time::sleep(settings.poll.min(deadline - now)).await;
    }
}
