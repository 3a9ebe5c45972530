use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use sef_resolve::EventWindow;
use sef_schemas::{ContactRecord, StorageEvent, UserRecord};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ports::{EventCursor, EventStore, LockAttempt, LockCoordinator, LockLease, ReputationLedger};

/// Postgres-backed implementation of every port.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgCursor<'a> {
    rows: BoxStream<'a, Result<StorageEvent>>,
}

#[async_trait]
impl<'a> EventCursor for PgCursor<'a> {
    async fn next_event(&mut self) -> Result<Option<StorageEvent>> {
        self.rows.next().await.transpose()
    }
}

#[async_trait]
impl LockCoordinator for PgStore {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<LockAttempt> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let grant = sef_db::cron_lock(&self.pool, name, lease_ms).await?;

        Ok(match grant {
            Some(g) => LockAttempt::Acquired(LockLease {
                name: name.to_string(),
                token: g.token,
                prior_state: g.prior_raw_data,
            }),
            None => LockAttempt::AlreadyHeld,
        })
    }

    async fn release(&self, lease: LockLease, state: Value) -> Result<()> {
        if !sef_db::cron_unlock(&self.pool, &lease.name, lease.token, &state).await? {
            bail!(
                "lock '{}' no longer held by token {} (lease expired)",
                lease.name,
                lease.token
            );
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn open_window<'a>(&'a self, window: &EventWindow) -> Result<Box<dyn EventCursor + 'a>> {
        Ok(Box::new(PgCursor {
            rows: sef_db::stream_finality_window(&self.pool, window),
        }))
    }

    async fn mark_processed(&self, event_id: Uuid, success: bool) -> Result<bool> {
        sef_db::mark_event_processed(&self.pool, event_id, success).await
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        sef_db::fetch_user(&self.pool, user_id).await
    }

    async fn save_user_reports(&self, user: &UserRecord) -> Result<()> {
        if !sef_db::save_user_reports(&self.pool, user).await? {
            bail!("user '{}' not found while saving reports", user.user_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ReputationLedger for PgStore {
    async fn find_contact(&self, node_id: &str) -> Result<Option<ContactRecord>> {
        sef_db::fetch_contact(&self.pool, node_id).await
    }

    async fn save_contact(&self, contact: &ContactRecord) -> Result<()> {
        sef_db::save_contact(&self.pool, contact).await
    }
}
