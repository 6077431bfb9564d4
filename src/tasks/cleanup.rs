//! TTL Cleanup Task
//!
//! Background task that periodically removes expired cache entries.
//!
//! Each sweep runs in its own spawned task so a panic inside it is contained
//! to that cycle and reported through [`CleanupMonitor`]. Cancellation is
//! cooperative: the task is told to stop through a watch channel, checked at
//! the sleep boundary, and performs one final sweep before exiting.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CleanupStatus;

// == Expiry Sweeper ==
/// Something that can drop its expired entries.
pub trait ExpirySweeper: Send + Sync + 'static {
    /// Removes expired entries and returns how many were removed.
    fn sweep_expired(&self) -> impl Future<Output = usize> + Send;
}

const STATE_NOT_STARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

// == Cleanup Monitor ==
/// Shared view of the task's liveness and its last sweep outcome.
#[derive(Debug, Default)]
pub struct CleanupMonitor {
    state: AtomicU8,
    last_failed: AtomicBool,
    last_error: Mutex<Option<String>>,
    cycles: AtomicU64,
    removed: AtomicU64,
}

impl CleanupMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> CleanupStatus {
        if self.last_failed.load(Ordering::Acquire) {
            return CleanupStatus::Failed;
        }
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => CleanupStatus::Running,
            STATE_STOPPED => CleanupStatus::Stopped,
            _ => CleanupStatus::NotStarted,
        }
    }

    /// Message of the last failed sweep, cleared by the next successful one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completed sweeps, successful or not.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Entries removed across all sweeps.
    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    fn record_success(&self, removed: usize) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.removed.fetch_add(removed as u64, Ordering::Relaxed);
        self.last_failed.store(false, Ordering::Release);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn record_failure(&self, message: String) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
        self.last_failed.store(true, Ordering::Release);
    }
}

// == Cleanup Handle ==
/// Owner side of a running cleanup task.
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    /// Signals the task to stop and waits for its final sweep.
    ///
    /// Returns false if the task itself died instead of exiting normally.
    pub async fn stop(self) -> bool {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Cleanup task terminated abnormally");
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task holds only a weak reference to `target` and exits on its own once
/// the target is dropped.
///
/// # Arguments
/// * `target` - The cache to sweep
/// * `interval` - Time between sweeps
/// * `monitor` - Receives liveness and sweep outcomes
pub fn spawn_cleanup_task<S: ExpirySweeper>(
    target: Weak<S>,
    interval: Duration,
    monitor: Arc<CleanupMonitor>,
) -> CleanupHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    monitor.set_state(STATE_RUNNING);

    let join = tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting TTL cleanup task"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => break,
            }
            if !run_cycle(&target, &monitor).await {
                debug!("Cache dropped, cleanup task exiting");
                monitor.set_state(STATE_STOPPED);
                return;
            }
        }

        // final sweep so pending expirations are not lost
        run_cycle(&target, &monitor).await;
        monitor.set_state(STATE_STOPPED);
        info!("TTL cleanup task stopped");
    });

    CleanupHandle {
        shutdown: shutdown_tx,
        join,
    }
}

/// Runs one sweep. Returns false when the target no longer exists.
async fn run_cycle<S: ExpirySweeper>(target: &Weak<S>, monitor: &CleanupMonitor) -> bool {
    let Some(target) = target.upgrade() else {
        return false;
    };

    let cycle = tokio::spawn(async move { target.sweep_expired().await });
    match cycle.await {
        Ok(removed) => {
            if removed > 0 {
                info!(removed, "TTL cleanup removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
            monitor.record_success(removed);
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(error = %message, "TTL cleanup cycle panicked");
            monitor.record_failure(message);
        }
        Err(e) => {
            warn!(error = %e, "TTL cleanup cycle cancelled");
            monitor.record_failure(e.to_string());
        }
    }
    true
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "cleanup sweep panicked".to_string()
    }
}
