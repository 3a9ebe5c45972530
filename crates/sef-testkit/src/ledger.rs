use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sef_runtime::ReputationLedger;
use sef_schemas::ContactRecord;

use crate::guard;

#[derive(Default)]
struct LedgerState {
    contacts: HashMap<String, ContactRecord>,
    fail_lookups: bool,
    fail_saves: bool,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_contact(&self, contact: ContactRecord) {
        guard(&self.state)
            .contacts
            .insert(contact.node_id.clone(), contact);
    }

    pub fn contact(&self, node_id: &str) -> Option<ContactRecord> {
        guard(&self.state).contacts.get(node_id).cloned()
    }

    pub fn reputation(&self, node_id: &str) -> Option<i64> {
        self.contact(node_id).map(|c| c.reputation)
    }

    /// Make every lookup fail until cleared.
    pub fn set_fail_lookups(&self, fail: bool) {
        guard(&self.state).fail_lookups = fail;
    }

    pub fn set_fail_saves(&self, fail: bool) {
        guard(&self.state).fail_saves = fail;
    }
}

#[async_trait]
impl ReputationLedger for MemoryLedger {
    async fn find_contact(&self, node_id: &str) -> Result<Option<ContactRecord>> {
        let st = guard(&self.state);
        if st.fail_lookups {
            bail!("injected contact lookup failure");
        }
        Ok(st.contacts.get(node_id).cloned())
    }

    async fn save_contact(&self, contact: &ContactRecord) -> Result<()> {
        let mut st = guard(&self.state);
        if st.fail_saves {
            bail!("injected contact save failure");
        }
        st.contacts.insert(contact.node_id.clone(), contact.clone());
        Ok(())
    }
}
