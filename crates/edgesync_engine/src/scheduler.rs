//! Timer-driven sync passes.

use crate::orchestrator::SyncOrchestrator;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs [`SyncOrchestrator::sync_all`] on a background thread.
///
/// Scheduled passes take the same per-peer locks as on-demand passes, so a
/// tick that overlaps a running pass reports "already syncing" for that
/// peer instead of waiting.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
}

impl SyncScheduler {
    /// Creates a scheduler ticking every `interval`.
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Starts the background thread. The first pass runs after one interval.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let orchestrator = self.orchestrator;

        let thread = thread::spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "sync scheduler started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let summary = orchestrator.sync_all();
                        if summary.is_clean() {
                            debug!(
                                uploaded = summary.uploaded,
                                downloaded = summary.downloaded,
                                "scheduled sync finished"
                            );
                        } else {
                            warn!(errors = ?summary.errors, "scheduled sync finished with errors");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("sync scheduler stopped");
        });

        SchedulerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Stops the scheduler when dropped.
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops the scheduler and waits for a running pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("sync scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
