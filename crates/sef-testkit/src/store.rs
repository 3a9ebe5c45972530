use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sef_resolve::EventWindow;
use sef_runtime::{EventCursor, EventStore};
use sef_schemas::{StorageEvent, UserRecord};
use uuid::Uuid;

use crate::guard;

#[derive(Default)]
struct StoreState {
    events: HashMap<Uuid, StorageEvent>,
    users: HashMap<String, UserRecord>,

    fail_open: bool,
    fail_mark: HashSet<Uuid>,
    fail_user_lookups: bool,
    /// Marked processed by "another worker" right after being fetched.
    commit_elsewhere: HashSet<Uuid>,

    fetch_delay: Option<Duration>,
    mark_delay: Option<Duration>,

    fetches: u64,
    marks: u64,
    user_saves: u64,
}

/// Event and user tables in memory.
///
/// The window cursor snapshots matching ids when opened and reads each
/// event's current row as it is fetched, like a server-side cursor.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, event: StorageEvent) {
        guard(&self.state).events.insert(event.event_id, event);
    }

    pub fn insert_user(&self, user: UserRecord) {
        guard(&self.state).users.insert(user.user_id.clone(), user);
    }

    pub fn event(&self, event_id: Uuid) -> Option<StorageEvent> {
        guard(&self.state).events.get(&event_id).cloned()
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        guard(&self.state).users.get(user_id).cloned()
    }

    pub fn is_processed(&self, event_id: Uuid) -> bool {
        self.event(event_id).map(|e| e.processed).unwrap_or(false)
    }

    pub fn fail_open_window(&self, fail: bool) {
        guard(&self.state).fail_open = fail;
    }

    /// Fail every persist of `event_id` until [`MemoryStore::clear_faults`].
    pub fn fail_mark_processed(&self, event_id: Uuid) {
        guard(&self.state).fail_mark.insert(event_id);
    }

    pub fn fail_user_lookups(&self, fail: bool) {
        guard(&self.state).fail_user_lookups = fail;
    }

    /// Simulate another worker committing `event_id` between our fetch and persist.
    pub fn commit_elsewhere_after_fetch(&self, event_id: Uuid) {
        guard(&self.state).commit_elsewhere.insert(event_id);
    }

    pub fn clear_faults(&self) {
        let mut st = guard(&self.state);
        st.fail_open = false;
        st.fail_mark.clear();
        st.fail_user_lookups = false;
        st.commit_elsewhere.clear();
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        guard(&self.state).fetch_delay = Some(delay);
    }

    pub fn set_mark_delay(&self, delay: Duration) {
        guard(&self.state).mark_delay = Some(delay);
    }

    /// Events handed out by cursors.
    pub fn fetches(&self) -> u64 {
        guard(&self.state).fetches
    }

    /// Writes that reached the event or user tables.
    pub fn mutations(&self) -> u64 {
        let st = guard(&self.state);
        st.marks + st.user_saves
    }

    fn fetch(&self, event_id: Uuid) -> Option<StorageEvent> {
        let mut st = guard(&self.state);
        let event = st.events.get(&event_id).cloned()?;
        st.fetches += 1;
        if st.commit_elsewhere.remove(&event_id) {
            if let Some(row) = st.events.get_mut(&event_id) {
                row.processed = true;
            }
        }
        Some(event)
    }

    fn fetch_delay(&self) -> Option<Duration> {
        guard(&self.state).fetch_delay
    }
}

struct MemoryCursor<'a> {
    store: &'a MemoryStore,
    pending: VecDeque<Uuid>,
}

#[async_trait]
impl<'a> EventCursor for MemoryCursor<'a> {
    async fn next_event(&mut self) -> Result<Option<StorageEvent>> {
        if let Some(delay) = self.store.fetch_delay() {
            tokio::time::sleep(delay).await;
        }
        while let Some(id) = self.pending.pop_front() {
            if let Some(event) = self.store.fetch(id) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn open_window<'a>(&'a self, window: &EventWindow) -> Result<Box<dyn EventCursor + 'a>> {
        let st = guard(&self.state);
        if st.fail_open {
            bail!("injected open_window failure");
        }

        let mut matching: Vec<&StorageEvent> = st.events.values().filter(|e| window.admits(e)).collect();
        matching.sort_by_key(|e| (e.ts_utc, e.event_id));
        let pending = matching.into_iter().map(|e| e.event_id).collect();

        Ok(Box::new(MemoryCursor { store: self, pending }))
    }

    async fn mark_processed(&self, event_id: Uuid, success: bool) -> Result<bool> {
        let delay = guard(&self.state).mark_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut st = guard(&self.state);
        if st.fail_mark.contains(&event_id) {
            bail!("injected persist failure for event {event_id}");
        }
        let Some(row) = st.events.get_mut(&event_id) else {
            return Ok(false);
        };
        if row.processed {
            return Ok(false);
        }
        row.success = success;
        row.processed = true;
        st.marks += 1;
        Ok(true)
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let st = guard(&self.state);
        if st.fail_user_lookups {
            bail!("injected user lookup failure");
        }
        Ok(st.users.get(user_id).cloned())
    }

    async fn save_user_reports(&self, user: &UserRecord) -> Result<()> {
        let mut st = guard(&self.state);
        if !st.users.contains_key(&user.user_id) {
            bail!("user '{}' not found while saving reports", user.user_id);
        }
        st.users.insert(user.user_id.clone(), user.clone());
        st.user_saves += 1;
        Ok(())
    }
}
