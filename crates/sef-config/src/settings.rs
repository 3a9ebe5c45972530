//! Typed settings for the storage event finality job.
//!
//! Read from the `/storage_events` subtree. Every key is optional; missing
//! keys take the production defaults below. Unknown keys inside the subtree
//! are rejected so a typo cannot silently revert a tunable to its default.

use anyhow::{bail, Context, Result};
use sef_resolve::{ExchangeCodes, ResolvePolicy};
use sef_schemas::PointCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SETTINGS_POINTER: &str = "/storage_events";

/// Upper bound for every configured duration (100 years).
pub const MAX_DURATION_MS: i64 = 100 * 365 * 24 * 60 * 60 * 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSettings {
    /// Cron lock name; also the key the checkpoint is stored under.
    pub job_name: String,
    /// Wall-clock cadence between runs.
    pub cadence_secs: i64,
    /// Hard budget for one run. Also the lock lease.
    pub max_run_time_ms: i64,
    /// Minimum event age before it is eligible for reconciliation.
    pub finality_time_ms: i64,
    pub unknown_report_threshold: f64,
    /// Length of the rolling window for a user's unknown-report counters.
    pub unknown_report_window_secs: i64,
    pub exchange_codes: ExchangeCodes,
    pub points: PointSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PointSettings {
    pub transfer_success: i64,
    pub transfer_failure: i64,
}

impl Default for PointSettings {
    fn default() -> Self {
        Self {
            transfer_success: 10,
            transfer_failure: -10,
        }
    }
}

impl PointSettings {
    pub fn points_for(&self, category: PointCategory) -> i64 {
        match category {
            PointCategory::TransferSuccess => self.transfer_success,
            PointCategory::TransferFailure => self.transfer_failure,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            job_name: "StorageEventsFinalityCron".to_string(),
            cadence_secs: 600,
            max_run_time_ms: 600_000,
            finality_time_ms: 10_800_000,
            unknown_report_threshold: 0.3,
            unknown_report_window_secs: 30 * 24 * 60 * 60,
            exchange_codes: ExchangeCodes::default(),
            points: PointSettings::default(),
        }
    }
}

impl JobSettings {
    /// Extract and validate settings from a merged config document.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let settings = match config_json.pointer(SETTINGS_POINTER) {
            None | Some(Value::Null) => JobSettings::default(),
            Some(v) => serde_json::from_value(v.clone())
                .with_context(|| format!("invalid {SETTINGS_POINTER} settings"))?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            bail!("CONFIG_INVALID storage_events.job_name must not be blank");
        }
        for (key, v, unit_ms) in [
            ("cadence_secs", self.cadence_secs, 1_000),
            ("max_run_time_ms", self.max_run_time_ms, 1),
            ("finality_time_ms", self.finality_time_ms, 1),
            ("unknown_report_window_secs", self.unknown_report_window_secs, 1_000),
        ] {
            if v <= 0 {
                bail!("CONFIG_INVALID storage_events.{key} must be > 0 (got {v})");
            }
            if v > MAX_DURATION_MS / unit_ms {
                bail!("CONFIG_INVALID storage_events.{key} exceeds 100 years (got {v})");
            }
        }
        if !(0.0..=1.0).contains(&self.unknown_report_threshold) {
            bail!(
                "CONFIG_INVALID storage_events.unknown_report_threshold must be within [0, 1] (got {})",
                self.unknown_report_threshold
            );
        }
        if self.exchange_codes.success == self.exchange_codes.failure {
            bail!(
                "CONFIG_INVALID storage_events.exchange_codes success and failure must differ (both {})",
                self.exchange_codes.success
            );
        }
        Ok(())
    }

    pub fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cadence_secs.unsigned_abs())
    }

    /// Run budget and lock lease.
    pub fn max_run_time(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_run_time_ms.unsigned_abs())
    }

    pub fn finality(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.finality_time_ms)
    }

    pub fn unknown_report_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.unknown_report_window_secs)
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            codes: self.exchange_codes,
            unknown_threshold: self.unknown_report_threshold,
        }
    }
}
