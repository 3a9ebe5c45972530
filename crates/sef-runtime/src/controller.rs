//! Run controller: lock lifecycle around one window pass.
//!
//! `Idle -> LockPending -> {Running -> UnlockPending -> Idle} | LockDenied -> Idle`
//!
//! The lease taken on acquire is moved into the release call, so a run can
//! release at most once. The checkpoint is released whether the pass
//! completed or failed; release failure is reported and not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sef_config::JobSettings;
use sef_schemas::JobCheckpoint;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::ports::{EventStore, LockAttempt, LockCoordinator, LockLease, ReputationLedger};
use crate::reputation::ReputationUpdater;
use crate::window::{WindowError, WindowProcessor, WindowReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    LockPending,
    LockDenied,
    Running,
    UnlockPending,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "IDLE",
            RunPhase::LockPending => "LOCK_PENDING",
            RunPhase::LockDenied => "LOCK_DENIED",
            RunPhase::Running => "RUNNING",
            RunPhase::UnlockPending => "UNLOCK_PENDING",
        }
    }
}

#[derive(Debug)]
pub enum ReleaseStatus {
    Released,
    /// Checkpoint was not persisted; the next run resumes from the previous one.
    Failed(anyhow::Error),
}

impl ReleaseStatus {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseStatus::Released)
    }
}

/// How one trigger ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Acquire itself failed; nothing ran.
    LockFailed(anyhow::Error),
    /// Another worker holds the lock; nothing ran.
    AlreadyRunning,
    Completed {
        report: WindowReport,
        release: ReleaseStatus,
    },
    Failed {
        report: WindowReport,
        error: WindowError,
        release: ReleaseStatus,
    },
}

impl RunOutcome {
    /// Checkpoint handed to release, when a pass ran.
    pub fn checkpoint(&self) -> Option<JobCheckpoint> {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::Failed { report, .. } => {
                Some(report.checkpoint)
            }
            RunOutcome::LockFailed(_) | RunOutcome::AlreadyRunning => None,
        }
    }

    pub fn report(&self) -> Option<&WindowReport> {
        match self {
            RunOutcome::Completed { report, .. } | RunOutcome::Failed { report, .. } => Some(report),
            RunOutcome::LockFailed(_) | RunOutcome::AlreadyRunning => None,
        }
    }
}

pub struct RunController {
    job_name: String,
    max_run_time: Duration,
    lock: Arc<dyn LockCoordinator>,
    processor: WindowProcessor,
    phase: watch::Sender<RunPhase>,
}

impl RunController {
    pub fn new(
        settings: &JobSettings,
        lock: Arc<dyn LockCoordinator>,
        store: Arc<dyn EventStore>,
        ledger: Arc<dyn ReputationLedger>,
    ) -> Self {
        let reputation = ReputationUpdater::new(ledger, settings.points);
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            job_name: settings.job_name.clone(),
            max_run_time: settings.max_run_time(),
            lock,
            processor: WindowProcessor::new(store, reputation, settings),
            phase,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Observe phase transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn transition(&self, next: RunPhase) {
        let prev = self.phase.send_replace(next);
        debug!(job = %self.job_name, from = prev.as_str(), to = next.as_str(), "run phase");
    }

    /// One trigger: acquire, process the window up to `now - finality`, release.
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunOutcome {
        self.transition(RunPhase::LockPending);

        let lease = match self.lock.acquire(&self.job_name, self.max_run_time).await {
            Ok(LockAttempt::Acquired(lease)) => lease,
            Ok(LockAttempt::AlreadyHeld) => {
                self.transition(RunPhase::LockDenied);
                warn!(job = %self.job_name, "already running");
                self.transition(RunPhase::Idle);
                return RunOutcome::AlreadyRunning;
            }
            Err(err) => {
                error!(job = %self.job_name, error = %format!("{err:#}"), "lock acquire failed");
                self.transition(RunPhase::Idle);
                return RunOutcome::LockFailed(err);
            }
        };

        let start = match JobCheckpoint::from_raw_data(&lease.prior_state) {
            Some(checkpoint) => checkpoint,
            None => {
                warn!(
                    job = %self.job_name,
                    prior_state = %lease.prior_state,
                    "checkpoint absent or malformed; starting from epoch"
                );
                JobCheckpoint::epoch()
            }
        };

        self.transition(RunPhase::Running);
        info!(job = %self.job_name, checkpoint = %start.last_timestamp, "run started");

        let deadline = Instant::now() + self.max_run_time;
        let outcome = match self.processor.process_window(start, now, deadline).await {
            Ok(report) => {
                info!(
                    job = %self.job_name,
                    processed = report.processed,
                    already_processed = report.already_processed,
                    "run completed, advanced to {}",
                    report.checkpoint.last_timestamp
                );
                self.transition(RunPhase::UnlockPending);
                let release = self.release(lease, report.checkpoint).await;
                RunOutcome::Completed { report, release }
            }
            Err(abort) => {
                let report = abort.report;
                error!(
                    job = %self.job_name,
                    processed = report.processed,
                    "run failed, checkpoint preserved at {}, reason: {}",
                    report.checkpoint.last_timestamp,
                    abort.error
                );
                self.transition(RunPhase::UnlockPending);
                let release = self.release(lease, report.checkpoint).await;
                RunOutcome::Failed {
                    report,
                    error: abort.error,
                    release,
                }
            }
        };

        self.transition(RunPhase::Idle);
        outcome
    }

    async fn release(&self, lease: LockLease, checkpoint: JobCheckpoint) -> ReleaseStatus {
        match self.lock.release(lease, checkpoint.to_raw_data()).await {
            Ok(()) => ReleaseStatus::Released,
            Err(err) => {
                error!(
                    job = %self.job_name,
                    checkpoint = %checkpoint.last_timestamp,
                    error = %format!("{err:#}"),
                    "lock release failed; checkpoint not persisted"
                );
                ReleaseStatus::Failed(err)
            }
        }
    }
}
