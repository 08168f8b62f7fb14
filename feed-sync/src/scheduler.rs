use crate::orchestrator::SyncOrchestrator;
use crate::types::SyncReport;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Periodic caller of [`SyncOrchestrator::sync_all`].
pub struct Scheduler {
    orchestrator: SyncOrchestrator,
    interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        let interval = orchestrator.config().sync_interval;
        Self { orchestrator, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One pass, on demand.
    pub async fn trigger(&self) -> SyncReport {
        self.orchestrator.sync_all().await
    }

    /// Runs a pass right away and then once per interval until `shutdown`
    /// turns true. A pass in progress when shutdown arrives skips the
    /// sources it has not started yet. Returns the number of passes run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!("Scheduler started, syncing every {:?}", self.interval);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                    continue;
                }
            }

            self.orchestrator.sync_all_with_shutdown(shutdown.clone()).await;
            passes += 1;
        }

        info!("Scheduler stopped after {} passes", passes);
        passes
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<usize> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
