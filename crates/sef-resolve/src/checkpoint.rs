//! Checkpoint watermark.
//!
//! # Invariants
//!
//! - **Non-decreasing**: the checkpoint moves to an event timestamp only if
//!   that timestamp is ≥ the current checkpoint. Equal timestamps are
//!   accepted (several events may share one).
//! - **Never below the start**: whatever happens during a run, the value
//!   handed back is ≥ the checkpoint the run started from.
//! - **Advances only on acceptance**: a regressed timestamp leaves the
//!   watermark untouched.

use chrono::{DateTime, Utc};
use sef_schemas::JobCheckpoint;

/// Result of offering an event timestamp to the watermark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointAdvance {
    /// Timestamp is strictly newer; the watermark moved.
    Advanced,
    /// Timestamp equals the watermark.
    Unchanged,
    /// Timestamp is older than the watermark and was rejected.
    Regressed {
        checkpoint: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

impl CheckpointAdvance {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CheckpointAdvance::Regressed { .. })
    }
}

/// Tracks the durable progress point of one run.
#[derive(Clone, Debug)]
pub struct CheckpointWatermark {
    start: JobCheckpoint,
    current: JobCheckpoint,
}

impl CheckpointWatermark {
    pub fn new(start: JobCheckpoint) -> Self {
        Self {
            start,
            current: start,
        }
    }

    /// Read-only probe; does not move the watermark.
    pub fn check(&self, ts: DateTime<Utc>) -> CheckpointAdvance {
        let cur = self.current.last_timestamp;
        if ts > cur {
            CheckpointAdvance::Advanced
        } else if ts == cur {
            CheckpointAdvance::Unchanged
        } else {
            CheckpointAdvance::Regressed {
                checkpoint: cur,
                got: ts,
            }
        }
    }

    /// Move the watermark to `ts` unless that would go backwards.
    pub fn advance(&mut self, ts: DateTime<Utc>) -> CheckpointAdvance {
        let result = self.check(ts);
        if result == CheckpointAdvance::Advanced {
            self.current = JobCheckpoint::at(ts);
        }
        result
    }

    pub fn current(&self) -> JobCheckpoint {
        self.current
    }

    pub fn start(&self) -> JobCheckpoint {
        self.start
    }

    pub fn has_advanced(&self) -> bool {
        self.current > self.start
    }
}
