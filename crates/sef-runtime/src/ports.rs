//! Collaborator interfaces consumed by the job.
//!
//! Implementations: [`crate::PgStore`] for production, the in-memory
//! doubles in `sef-testkit` for scenarios. All methods are suspension
//! points; none of them may block the executor.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sef_resolve::EventWindow;
use sef_schemas::{ContactRecord, StorageEvent, UserRecord};
use serde_json::Value;
use uuid::Uuid;

/// Proof of holding a named lock. Consumed by [`LockCoordinator::release`].
#[derive(Debug, Clone)]
pub struct LockLease {
    pub name: String,
    pub token: Uuid,
    /// State stored by the previous holder on release.
    pub prior_state: Value,
}

#[derive(Debug, Clone)]
pub enum LockAttempt {
    Acquired(LockLease),
    /// Another holder's lease is still live.
    AlreadyHeld,
}

/// Cross-process mutual exclusion with a self-expiring lease.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<LockAttempt>;

    /// Unlock and persist `state` for the next holder.
    ///
    /// Fails when the lease was lost in the meantime; the new holder's
    /// state must not be overwritten in that case.
    async fn release(&self, lease: LockLease, state: Value) -> Result<()>;
}

/// Forward-only cursor over one finality window.
///
/// The next row is not requested until the caller asks for it.
#[async_trait]
pub trait EventCursor: Send {
    async fn next_event(&mut self) -> Result<Option<StorageEvent>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Open a cursor over events admitted by `window`, ascending by timestamp.
    async fn open_window<'a>(&'a self, window: &EventWindow) -> Result<Box<dyn EventCursor + 'a>>;

    /// Set `success` and `processed = true` in one write, only if the event
    /// is still unprocessed. Returns whether this call changed the row.
    async fn mark_processed(&self, event_id: Uuid, success: bool) -> Result<bool>;

    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    async fn save_user_reports(&self, user: &UserRecord) -> Result<()>;
}

/// Storage for reputation subjects.
#[async_trait]
pub trait ReputationLedger: Send + Sync {
    async fn find_contact(&self, node_id: &str) -> Result<Option<ContactRecord>>;

    async fn save_contact(&self, contact: &ContactRecord) -> Result<()>;
}
