use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::services::progress::ProgressRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Drops finished batches once their polling window has passed. Runs until
/// the shutdown channel fires or its sender is dropped.
pub struct ProgressSweeper {
    progress: Arc<ProgressRegistry>,
    ttl: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ProgressSweeper {
    pub fn new(
        progress: Arc<ProgressRegistry>,
        ttl: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            progress,
            ttl,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(
            "🧹 Progress sweeper started (interval {:?}, ttl {:?})",
            SWEEP_INTERVAL,
            self.ttl
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::debug!("🧹 Progress sweeper stopped");
                    return;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    let evicted = self.progress.evict_finished(self.ttl);
                    if evicted > 0 {
                        tracing::debug!("🧹 Evicted {} finished batch(es)", evicted);
                    }
                }
            }
        }
    }
}
