//! Background reconciliation: replays durable state against the live board.
//!
//! Runs once at startup (before the server accepts requests) and then on a
//! timer. Failures are logged with a correlation id and never tear down the
//! server; the next tick retries.

use crate::coordinator::Coordinator;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct Reconciler {
    coordinator: Arc<Coordinator>,
    interval: std::time::Duration,
    shutdown: watch::Receiver<bool>,
}

/// Signals the reconciler (and any other background task holding the
/// receiver) to stop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

impl Reconciler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        interval: std::time::Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            interval,
            shutdown,
        }
    }

    /// Periodic loop. The startup pass is expected to have already run via
    /// `Coordinator::reconcile` before this is spawned.
    pub async fn run(mut self) {
        info!(
            "reconciler started for project {} (interval {:?})",
            self.coordinator.project_id(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the startup pass already covered
        // it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.coordinator.reconcile().await {
                        Ok(report) if report.is_noop() => {
                            debug!("reconcile pass: nothing to do");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Correlation id ties this failure to any board
                            // or ledger log lines it produced.
                            error!(
                                "reconcile pass failed (correlation {}): {e}",
                                Uuid::new_v4()
                            );
                        }
                    }
                }
                changed = self.shutdown.changed() => {
                    let stop = changed.is_err() || *self.shutdown.borrow();
                    if stop {
                        info!("reconciler stopping");
                        return;
                    }
                }
            }
        }
    }
}
