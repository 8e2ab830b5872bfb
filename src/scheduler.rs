//! Auto-claim scheduler.
//!
//! A recurring background task that settles channels nearing expiry before
//! the consumer can reclaim the unclaimed remainder, plus a normal threshold
//! sweep. The body is idempotent and the task runs once immediately at start
//! so channels already near expiry when the process restarts are not missed
//! before the first timer fire.

use crate::engine::DrainEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct AutoClaimScheduler {
    engine: Arc<DrainEngine>,
    started: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoClaimScheduler {
    pub fn new(engine: Arc<DrainEngine>) -> Self {
        Self {
            engine,
            started: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the recurring claim task. Starting twice is a no-op — two
    /// overlapping runs would double-submit claims for the same channel.
    pub fn start(&self, interval: Duration, buffer_secs: u64) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("auto-claim scheduler already running, ignoring start");
            return;
        }

        info!(
            "auto-claim scheduler started (interval {:?}, expiry buffer {}s)",
            interval, buffer_secs
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        if let Ok(mut guard) = self.shutdown.lock() {
            *guard = Some(shutdown_tx);
        }

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            loop {
                Self::run_tick(&engine, buffer_secs).await;

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("auto-claim scheduler stopped");
        });

        if let Ok(mut guard) = self.handle.lock() {
            *guard = Some(handle);
        }
    }

    /// Stop the background task and wait for it to wind down.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        let shutdown = self.shutdown.lock().ok().and_then(|mut g| g.take());
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }

        let handle = self.handle.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One scheduler pass: force-claim expiring channels first, then run the
    /// normal threshold sweep. Public so operators (and tests) can trigger a
    /// pass outside the timer.
    pub async fn run_tick(engine: &DrainEngine, buffer_secs: u64) {
        match engine.trigger_expiring_claims(buffer_secs).await {
            Ok(report) if report.attempted > 0 => {
                info!(
                    "scheduler: {} expiring channel(s), {} claim(s) submitted",
                    report.attempted,
                    report.tx_hashes.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("scheduler: expiring-claim pass failed: {}", e),
        }

        match engine.trigger_claims(false).await {
            Ok(_) => {}
            Err(e) => warn!("scheduler: threshold sweep failed: {}", e),
        }
    }
}
