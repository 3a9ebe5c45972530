//! Window processor.
//!
//! Pulls one event at a time from the finality window and settles it:
//! resolve, persist with the processed marker, award reputation, fold into
//! the user's unknown-report window, then advance the checkpoint. The next
//! event is not requested until the current one has settled.
//!
//! A single deadline covers the whole pass. Whatever ends the pass (cursor
//! exhausted, store failure, deadline), the caller gets back the last
//! checkpoint that was advanced after a durable commit.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sef_config::JobSettings;
use sef_resolve::{resolve, CheckpointAdvance, CheckpointWatermark, EventWindow, ResolvePolicy};
use sef_schemas::JobCheckpoint;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ports::{EventCursor, EventStore};
use crate::reputation::ReputationUpdater;

/// Summary of one window pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    /// Events this pass committed.
    pub processed: u64,
    /// Events another worker committed between fetch and persist.
    pub already_processed: u64,
    /// Checkpoint to persist on release.
    pub checkpoint: JobCheckpoint,
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("{0:#}")]
    Store(anyhow::Error),
    #[error("exceeded max duration of {0:?}")]
    DeadlineExceeded(std::time::Duration),
}

/// A pass that ended early, with the progress it made before stopping.
#[derive(Debug)]
pub struct WindowAbort {
    pub report: WindowReport,
    pub error: WindowError,
}

enum Settled {
    Processed(DateTime<Utc>),
    AlreadyProcessed(DateTime<Utc>),
    /// Not admitted by the window; never touches the checkpoint.
    Ignored,
}

struct Progress {
    watermark: CheckpointWatermark,
    processed: u64,
    already_processed: u64,
}

impl Progress {
    fn new(start: JobCheckpoint) -> Self {
        Self {
            watermark: CheckpointWatermark::new(start),
            processed: 0,
            already_processed: 0,
        }
    }

    fn apply(&mut self, settled: Settled) {
        let ts = match settled {
            Settled::Processed(ts) => {
                self.processed += 1;
                ts
            }
            Settled::AlreadyProcessed(ts) => {
                self.already_processed += 1;
                ts
            }
            Settled::Ignored => return,
        };
        if let CheckpointAdvance::Regressed { checkpoint, got } = self.watermark.advance(ts) {
            warn!(%checkpoint, %got, "event older than checkpoint; checkpoint kept");
        }
    }

    fn report(&self) -> WindowReport {
        WindowReport {
            processed: self.processed,
            already_processed: self.already_processed,
            checkpoint: self.watermark.current(),
        }
    }

    fn abort(&self, error: WindowError) -> WindowAbort {
        WindowAbort {
            report: self.report(),
            error,
        }
    }
}

#[derive(Clone)]
pub struct WindowProcessor {
    store: Arc<dyn EventStore>,
    reputation: ReputationUpdater,
    policy: ResolvePolicy,
    finality: ChronoDuration,
    unknown_report_window: ChronoDuration,
}

impl WindowProcessor {
    pub fn new(store: Arc<dyn EventStore>, reputation: ReputationUpdater, settings: &JobSettings) -> Self {
        Self {
            store,
            reputation,
            policy: settings.resolve_policy(),
            finality: settings.finality(),
            unknown_report_window: settings.unknown_report_window(),
        }
    }

    /// Process `[checkpoint, now - finality)` until the cursor is exhausted,
    /// a step fails, or `deadline` passes.
    ///
    /// The returned checkpoint (in either arm) is never below `checkpoint`.
    pub async fn process_window(
        &self,
        checkpoint: JobCheckpoint,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<WindowReport, WindowAbort> {
        let window = EventWindow::new(checkpoint, now, self.finality);
        let mut progress = Progress::new(checkpoint);
        let budget = deadline.saturating_duration_since(Instant::now());

        if window.is_empty() {
            debug!(lower = %window.lower_inclusive, upper = %window.upper_exclusive, "empty window");
            return Ok(progress.report());
        }

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let opened = tokio::select! {
            biased;
            _ = &mut expiry => Err(WindowError::DeadlineExceeded(budget)),
            res = self.store.open_window(&window) => res
                .context("open finality window failed")
                .map_err(WindowError::Store),
        };
        let mut cursor = match opened {
            Ok(cursor) => cursor,
            Err(error) => return Err(progress.abort(error)),
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut expiry => Err(WindowError::DeadlineExceeded(budget)),
                res = self.step(cursor.as_mut(), &window, now) => res.map_err(WindowError::Store),
            };
            match step {
                Ok(Some(settled)) => progress.apply(settled),
                Ok(None) => return Ok(progress.report()),
                Err(error) => return Err(progress.abort(error)),
            }
        }
    }

    /// Fetch and settle the next event. `None` once the cursor is exhausted.
    async fn step(
        &self,
        cursor: &mut (dyn EventCursor + '_),
        window: &EventWindow,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Settled>> {
        let Some(event) = cursor.next_event().await.context("fetch next event failed")? else {
            return Ok(None);
        };

        if !window.admits(&event) {
            warn!(event_id = %event.event_id, ts = %event.ts_utc, "store returned an event outside the window; ignored");
            return Ok(Some(Settled::Ignored));
        }

        let user = match event.user_id.as_deref() {
            Some(user_id) => self
                .store
                .find_user(user_id)
                .await
                .with_context(|| format!("lookup user for event {} failed", event.event_id))?,
            None => None,
        };

        let resolution = resolve(&event, user.as_ref(), &self.policy);
        let outcome = resolution.outcome;

        let changed = self
            .store
            .mark_processed(event.event_id, outcome.success)
            .await
            .with_context(|| format!("persist event {} failed", event.event_id))?;
        if !changed {
            debug!(event_id = %event.event_id, "event already processed elsewhere");
            return Ok(Some(Settled::AlreadyProcessed(event.ts_utc)));
        }

        debug!(
            event_id = %event.event_id,
            rule = resolution.rule.as_str(),
            success = outcome.success,
            unknown = outcome.unknown,
            "event resolved"
        );

        self.reputation
            .award(event.farmer_id.as_deref(), outcome.success, now)
            .await;

        match user {
            Some(mut user) => {
                user.update_unknown_reports(
                    outcome.unknown,
                    event.ts_utc,
                    event.transfer_bytes(),
                    self.unknown_report_window,
                );
                self.store
                    .save_user_reports(&user)
                    .await
                    .with_context(|| format!("update unknown reports for event {} failed", event.event_id))?;
            }
            None => warn!(
                event_id = %event.event_id,
                user = event.user_id.as_deref().unwrap_or("-"),
                "user record not found; unknown-report update skipped"
            ),
        }

        Ok(Some(Settled::Processed(event.ts_utc)))
    }
}
