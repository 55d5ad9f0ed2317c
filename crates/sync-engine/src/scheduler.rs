// crates/sync-engine/src/scheduler.rs
//! Periodic sync driver
//!
//! Runs a cycle every interval and whenever triggered. Shutdown waits for the
//! running cycle to finish; the push phase stops at its next batch boundary.

use crate::engine::SyncEngine;
use crate::types::CycleOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Background task that drives a [`SyncEngine`]
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    trigger: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Spawns the scheduler on the current tokio runtime
    pub fn start(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let trigger = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            Arc::clone(&engine),
            interval,
            Arc::clone(&trigger),
            shutdown_rx,
        ));
        log::info!("Sync scheduler started (every {:?})", interval);

        Self {
            engine,
            trigger,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Requests a cycle now; coalesces with a pending request
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits for the running cycle to finish
    pub async fn shutdown(mut self) {
        self.engine.request_stop();
        // Receiver may already be gone if the task ended
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Sync scheduler task failed: {}", e);
            }
        }
        log::info!("Sync scheduler stopped");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(true);
            handle.abort();
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    interval: Duration,
    trigger: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }

        match engine.sync_now().await {
            Ok(CycleOutcome::Completed(report)) => {
                for failure in &report.push.terminal {
                    log::error!(
                        "Operation {} for entry {} needs operator attention: {}",
                        failure.operation_id,
                        failure.entry_id,
                        failure.error
                    );
                }
            }
            Ok(CycleOutcome::Skipped) => log::debug!("Scheduled cycle skipped; one is running"),
            Ok(CycleOutcome::Disabled) => {}
            Err(e) => log::warn!("Scheduled sync failed: {}", e),
        }
    }
}
