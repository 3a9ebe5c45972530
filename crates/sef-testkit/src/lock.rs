use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sef_runtime::{LockAttempt, LockCoordinator, LockLease};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::guard;

#[derive(Debug, Clone)]
struct LockRow {
    holder: Option<Uuid>,
    lease_end: Option<Instant>,
    raw_data: Value,
}

impl LockRow {
    fn empty() -> Self {
        Self {
            holder: None,
            lease_end: None,
            raw_data: Value::Object(Default::default()),
        }
    }

    fn is_free(&self, now: Instant) -> bool {
        match (self.holder, self.lease_end) {
            (None, _) | (Some(_), None) => true,
            (Some(_), Some(end)) => end <= now,
        }
    }
}

#[derive(Default)]
struct LockState {
    rows: HashMap<String, LockRow>,
    fail_next_acquire: bool,
    fail_next_release: bool,
    acquires: u64,
    releases: u64,
}

/// Lease lock on the tokio clock, same semantics as the `cron_jobs` table.
#[derive(Default)]
pub struct MemoryLock {
    state: Mutex<LockState>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_state(&self, name: &str, raw: Value) {
        let mut st = guard(&self.state);
        st.rows.entry(name.to_string()).or_insert_with(LockRow::empty).raw_data = raw;
    }

    pub fn state(&self, name: &str) -> Option<Value> {
        guard(&self.state).rows.get(name).map(|r| r.raw_data.clone())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        guard(&self.state)
            .rows
            .get(name)
            .map(|r| !r.is_free(Instant::now()))
            .unwrap_or(false)
    }

    /// End the current holder's lease now, as if it had run out.
    pub fn expire(&self, name: &str) {
        if let Some(row) = guard(&self.state).rows.get_mut(name) {
            row.lease_end = Some(Instant::now());
        }
    }

    pub fn fail_next_acquire(&self) {
        guard(&self.state).fail_next_acquire = true;
    }

    pub fn fail_next_release(&self) {
        guard(&self.state).fail_next_release = true;
    }

    /// Successful acquires so far.
    pub fn acquires(&self) -> u64 {
        guard(&self.state).acquires
    }

    /// Successful releases so far.
    pub fn releases(&self) -> u64 {
        guard(&self.state).releases
    }
}

#[async_trait]
impl LockCoordinator for MemoryLock {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<LockAttempt> {
        let mut st = guard(&self.state);
        if std::mem::take(&mut st.fail_next_acquire) {
            bail!("injected acquire failure");
        }

        let now = Instant::now();
        let row = st.rows.entry(name.to_string()).or_insert_with(LockRow::empty);
        if !row.is_free(now) {
            return Ok(LockAttempt::AlreadyHeld);
        }

        let token = Uuid::new_v4();
        row.holder = Some(token);
        row.lease_end = Some(now + lease);
        let prior_state = row.raw_data.clone();
        st.acquires += 1;

        Ok(LockAttempt::Acquired(LockLease {
            name: name.to_string(),
            token,
            prior_state,
        }))
    }

    async fn release(&self, lease: LockLease, state: Value) -> Result<()> {
        let mut st = guard(&self.state);
        if std::mem::take(&mut st.fail_next_release) {
            bail!("injected release failure");
        }

        let Some(row) = st.rows.get_mut(&lease.name) else {
            bail!("lock '{}' does not exist", lease.name);
        };
        if row.holder != Some(lease.token) {
            bail!("lock '{}' no longer held by token {} (lease expired)", lease.name, lease.token);
        }

        row.holder = None;
        row.lease_end = None;
        row.raw_data = state;
        st.releases += 1;
        Ok(())
    }
}
