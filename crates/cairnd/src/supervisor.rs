//! Reliability supervisor — stall detection and partial preservation.
//!
//! The watchdog watches one signal: with a transfer in progress, how long
//! since the last file-related frame? Past the idle window it forces a
//! reconnect, and when that fails it flushes every in-progress transfer
//! to disk as a partial file. State stays in memory so reception resumes
//! if the link comes back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use cairn_services::FileReceiver;

use crate::transport::Radio;

/// How often the watchdog looks at the idle clock.
const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Timestamp of the last file-related frame, marked by the dispatcher.
/// Stored as milliseconds since construction so marking is lock-free.
pub struct ActivityTracker {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn mark(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::AcqRel);
    }

    pub fn idle(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Acquire)))
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn watchdog_loop(
    receiver: Arc<FileReceiver>,
    radio: Arc<Radio>,
    activity: Arc<ActivityTracker>,
    idle_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("watchdog shutting down");
                return;
            }
            _ = interval.tick() => {
                check_stall(&receiver, &radio, &activity, idle_timeout).await;
            }
        }
    }
}

async fn check_stall(
    receiver: &FileReceiver,
    radio: &Radio,
    activity: &ActivityTracker,
    idle_timeout: Duration,
) {
    // Idle with nothing in progress is just quiet air.
    if !receiver.has_active().await {
        return;
    }
    let idle = activity.idle();
    if idle < idle_timeout {
        return;
    }

    tracing::warn!(
        idle_secs = idle.as_secs(),
        "transfer stalled with no traffic, forcing reconnect"
    );
    match radio.reconnect().await {
        Ok(()) => activity.mark(),
        Err(e) => {
            tracing::warn!(error = %e, "stall reconnect failed, saving partial files");
            receiver.checkpoint_all().await;
        }
    }
}
