use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use crate::discovery::DiscoveryEngine;
use crate::shutdown::Shutdown;

/// Drives discovery cycles on a fixed interval. Cycle failures are logged and
/// retried on the next tick; they never end the loop.
pub struct Watcher {
    engine: Arc<DiscoveryEngine>,
    interval: Duration,
    shutdown: Arc<Shutdown>,
}

impl Watcher {
    pub fn new(engine: Arc<DiscoveryEngine>, interval: Duration, shutdown: Arc<Shutdown>) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Run one cycle and log its outcome. Returns whether it succeeded.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> bool {
        info!("starting check cycle");
        match self.engine.run_cycle().await {
            Ok(report) => {
                info!(
                    mode = ?report.mode,
                    fetched = report.fetched,
                    discovered = report.discovered,
                    published = report.published.len(),
                    interrupted = report.interrupted,
                    "check cycle finished"
                );
                true
            }
            Err(err) => {
                error!(error = %err, "check cycle failed");
                false
            }
        }
    }

    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.wait() => break,
            }
            if self.shutdown.is_requested() {
                break;
            }
            self.run_once().await;
        }
        info!("scheduler stopped");
    }
}
