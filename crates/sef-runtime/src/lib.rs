//! sef-runtime
//!
//! The storage event finality job wired end to end:
//!
//! - [`ports`]: the collaborators the job consumes (lock, event store,
//!   reputation ledger) as async traits.
//! - [`PgStore`]: the Postgres implementation of every port.
//! - [`ReputationUpdater`]: best-effort point accrual for the farmer.
//! - [`WindowProcessor`]: one event at a time through resolve, persist,
//!   side effects, checkpoint advance; bounded by a deadline.
//! - [`RunController`]: lock lifecycle around one window pass; always
//!   hands the checkpoint back on release.
//! - [`run_schedule`]: fixed wall-clock cadence until shutdown.

mod controller;
mod pg;
pub mod ports;
mod reputation;
mod schedule;
mod window;

pub use controller::{ReleaseStatus, RunController, RunOutcome, RunPhase};
pub use pg::PgStore;
pub use ports::{EventCursor, EventStore, LockAttempt, LockCoordinator, LockLease, ReputationLedger};
pub use reputation::{ReputationError, ReputationUpdater};
pub use schedule::{next_aligned_tick, run_schedule};
pub use window::{WindowAbort, WindowError, WindowProcessor, WindowReport};
