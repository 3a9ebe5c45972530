use std::sync::Arc;

use chrono::{DateTime, Utc};
use sef_config::PointSettings;
use sef_schemas::{ContactRecord, PointCategory};
use tracing::{debug, warn};

use crate::ports::ReputationLedger;

#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("event has no farmer to credit")]
    MissingSubject,
    #[error("contact '{0}' not found")]
    NotFound(String),
    #[error("reputation ledger failure: {0:#}")]
    Ledger(anyhow::Error),
}

/// Credits or debits the farmer of a resolved transfer.
///
/// Failures never propagate: reputation is a secondary signal and must not
/// hold back the window.
#[derive(Clone)]
pub struct ReputationUpdater {
    ledger: Arc<dyn ReputationLedger>,
    points: PointSettings,
}

impl ReputationUpdater {
    pub fn new(ledger: Arc<dyn ReputationLedger>, points: PointSettings) -> Self {
        Self { ledger, points }
    }

    /// Apply the points for `success` to `farmer_id`, logging any failure.
    pub async fn award(&self, farmer_id: Option<&str>, success: bool, at: DateTime<Utc>) {
        let category = PointCategory::for_outcome(success);
        match self.try_award(farmer_id, category, at).await {
            Ok(contact) => debug!(
                farmer = %contact.node_id,
                category = category.as_str(),
                reputation = contact.reputation,
                "points recorded"
            ),
            Err(err) => warn!(
                farmer = farmer_id.unwrap_or("-"),
                category = category.as_str(),
                error = %err,
                "reputation update failed"
            ),
        }
    }

    pub async fn try_award(
        &self,
        farmer_id: Option<&str>,
        category: PointCategory,
        at: DateTime<Utc>,
    ) -> Result<ContactRecord, ReputationError> {
        let node_id = farmer_id.ok_or(ReputationError::MissingSubject)?;

        let contact = self
            .ledger
            .find_contact(node_id)
            .await
            .map_err(ReputationError::Ledger)?
            .ok_or_else(|| ReputationError::NotFound(node_id.to_string()))?;

        let updated = contact.record_points(self.points.points_for(category), at);
        self.ledger
            .save_contact(&updated)
            .await
            .map_err(ReputationError::Ledger)?;
        Ok(updated)
    }
}
