//! sef-testkit
//!
//! In-memory implementations of the job's ports, with fault and latency
//! injection, plus a [`JobHarness`] that wires them into a
//! [`RunController`]. Scenario tests for the whole job live in `tests/`.
//!
//! Latency uses `tokio::time::sleep`, so scenarios run under
//! `#[tokio::test(start_paused = true)]` are deterministic.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use sef_config::JobSettings;
use sef_runtime::{EventStore, LockCoordinator, ReputationLedger, RunController};
use sef_schemas::StorageEvent;

mod ledger;
mod lock;
mod store;

pub use ledger::MemoryLedger;
pub use lock::MemoryLock;
pub use store::MemoryStore;

/// One set of in-memory ports and the settings to build controllers from.
///
/// Controllers built from the same harness share all state, which is how
/// contention between two workers is simulated.
pub struct JobHarness {
    pub settings: JobSettings,
    pub lock: Arc<MemoryLock>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MemoryLedger>,
}

impl Default for JobHarness {
    fn default() -> Self {
        Self::new(JobSettings::default())
    }
}

impl JobHarness {
    pub fn new(settings: JobSettings) -> Self {
        Self {
            settings,
            lock: Arc::new(MemoryLock::new()),
            store: Arc::new(MemoryStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
        }
    }

    pub fn controller(&self) -> RunController {
        let lock: Arc<dyn LockCoordinator> = self.lock.clone();
        let store: Arc<dyn EventStore> = self.store.clone();
        let ledger: Arc<dyn ReputationLedger> = self.ledger.clone();
        RunController::new(&self.settings, lock, store, ledger)
    }

    /// Checkpoint payload currently stored under the job's lock.
    pub fn stored_state(&self) -> Option<serde_json::Value> {
        self.lock.state(&self.settings.job_name)
    }

    /// Seed the checkpoint payload as if a previous run had released it.
    pub fn seed_state(&self, raw: serde_json::Value) {
        self.lock.seed_state(&self.settings.job_name, raw);
    }
}

/// Millisecond epoch timestamp.
pub fn ts(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Unprocessed event at `ms` with no reports.
pub fn event_at(ms: i64, user_id: &str, farmer_id: &str) -> StorageEvent {
    StorageEvent::new(ts(ms), user_id, farmer_id)
}

pub(crate) fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
