//! Job queue worker.
//!
//! One dedicated thread cooperatively polls the store: claim the oldest queued
//! job with an atomic conditional update, load its capture, run the analyzer,
//! record the terminal outcome. Faults are isolated per job and never escape
//! the loop; an empty queue means a fixed-interval sleep, no backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::storage::{now_iso, Capture, ClaimedJob, NewEvent, StorageError, Store};

/// Frame analysis behind a single call-in seam.
///
/// Implementations inspect one capture and produce zero or more events, or
/// report a fault that marks the job `failed` with the returned message. The
/// queue logic (claim, done, failed) never depends on which analyzer runs.
pub trait FrameAnalyzer: Send + Sync + 'static {
    fn analyze(&self, capture: &Capture) -> Result<Vec<NewEvent>, String>;
}

/// Placeholder heuristic standing in for real frame analysis: every third
/// sequence number emits a synthetic interaction event.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAnalyzer;

impl FrameAnalyzer for PlaceholderAnalyzer {
    fn analyze(&self, capture: &Capture) -> Result<Vec<NewEvent>, String> {
        if capture.seq % 3 != 0 {
            return Ok(Vec::new());
        }
        Ok(vec![NewEvent {
            event_type: "interaction_detected".to_string(),
            event_ts: now_iso(),
            confidence: Some(0.55),
            note: Some("Placeholder event emitted by worker stub.".to_string()),
        }])
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTick {
    /// No queued job existed.
    Idle,
    /// A job was claimed and finished `done`.
    Processed { job_id: i64 },
    /// A job was claimed and finished `failed`.
    Failed { job_id: i64 },
}

/// The single background worker.
pub struct Worker {
    store: Store,
    analyzer: Arc<dyn FrameAnalyzer>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        store: Store,
        analyzer: Arc<dyn FrameAnalyzer>,
        poll_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            analyzer,
            poll_interval,
            shutdown,
        }
    }

    /// Spawn the worker on its own thread.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.run())
    }

    /// Poll until shutdown is requested. A shutdown request lets the current
    /// cycle finish; it never interrupts in-progress processing.
    pub fn run(self) {
        tracing::info!(poll_interval = ?self.poll_interval, "Worker started");

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(WorkerTick::Idle) => {
                    std::thread::sleep(self.poll_interval);
                }
                Ok(WorkerTick::Processed { job_id }) => {
                    tracing::info!(job_id, "Job processed");
                }
                Ok(WorkerTick::Failed { job_id }) => {
                    tracing::warn!(job_id, "Job failed");
                }
                Err(e) => {
                    // Claim-level storage trouble: log and retry next cycle.
                    tracing::error!(error = %e, "Worker poll cycle failed");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// One claim/process cycle.
    ///
    /// Per-job faults are terminal for the job (`failed` with the captured
    /// error), not for the worker; only claim-level storage errors surface.
    pub fn run_once(&self) -> Result<WorkerTick, StorageError> {
        let Some(job) = self.store.claim_next_job()? else {
            return Ok(WorkerTick::Idle);
        };

        match self.process(&job) {
            Ok(()) => Ok(WorkerTick::Processed { job_id: job.id }),
            Err(message) => {
                if let Err(e) = self.store.fail_job(job.id, &message) {
                    tracing::error!(job_id = job.id, error = %e, "Failed to mark job failed");
                }
                Ok(WorkerTick::Failed { job_id: job.id })
            }
        }
    }

    fn process(&self, job: &ClaimedJob) -> Result<(), String> {
        let capture = self
            .store
            .load_capture(job.capture_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("missing capture: {}", job.capture_id))?;

        let events = self.analyzer.analyze(&capture)?;

        self.store
            .complete_job(job.id, &capture, &events)
            .map_err(|e| e.to_string())
    }
}
