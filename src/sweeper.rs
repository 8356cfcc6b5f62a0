//! Background housekeeping: expired cache entries and idle sessions.
//!
//! Lookups already drop expired entries they touch; the sweeper clears the
//! ones nobody asks for again so they do not hold capacity, and drops
//! sessions nobody has used within `orchestrator.session_idle_secs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::orchestrator::QueryOrchestrator;

pub struct CacheSweeper {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// Start sweeping every `interval`. The first sweep runs one full
    /// interval after start.
    pub fn spawn(orchestrator: Arc<QueryOrchestrator>, interval: Duration) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(orchestrator, interval, cancel_rx));
        info!(interval_secs = interval.as_secs(), "cache sweeper started");
        Self { cancel_tx, handle }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
        info!("cache sweeper stopped");
    }
}

async fn sweep_loop(
    orchestrator: Arc<QueryOrchestrator>,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cache = orchestrator.cache();
                let removed = cache.sweep_expired();
                let idle = orchestrator.evict_idle_sessions();
                if removed > 0 || idle > 0 {
                    info!(removed, idle_sessions = idle, remaining = cache.len(), "sweep removed stale state");
                } else {
                    debug!("sweep found nothing to remove");
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
            }
        }
    }
}
