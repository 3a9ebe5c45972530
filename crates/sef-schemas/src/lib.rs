//! sef-schemas
//!
//! Record shapes shared by the resolver, the store adapters and the job
//! runtime. Pure data plus the small state transitions each record owns
//! (unknown-report accounting on users, point accrual on contacts, the
//! checkpoint payload carried by the cron lock).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StorageEvent
// ---------------------------------------------------------------------------

/// Self-report filed by one side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeReport {
    /// Status code reported by this side. `None` means the report exists but
    /// carries no code, which is distinct from a code of `0`.
    pub exchange_result_code: Option<i32>,
    pub exchange_result_message: Option<String>,
    pub reported_at_utc: Option<DateTime<Utc>>,
}

impl ExchangeReport {
    pub fn with_code(code: i32) -> Self {
        Self {
            exchange_result_code: Some(code),
            exchange_result_message: None,
            reported_at_utc: None,
        }
    }
}

/// One completed or failed data-transfer exchange between a client and a farmer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub event_id: Uuid,
    /// Millisecond precision; doubles as the checkpoint cursor value.
    pub ts_utc: DateTime<Utc>,
    pub success: bool,
    /// Set exactly once by the finality job, never reset.
    pub processed: bool,
    /// Account that requested the transfer. Events without one are never
    /// picked up by the finality job.
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    /// Reputation subject credited or debited for the transfer.
    pub farmer_id: Option<String>,
    pub client_report: Option<ExchangeReport>,
    pub farmer_report: Option<ExchangeReport>,
    pub storage_bytes: Option<i64>,
    pub download_bandwidth_bytes: Option<i64>,
}

impl StorageEvent {
    /// A fresh, unprocessed, unsuccessful event with no reports attached.
    pub fn new(ts_utc: DateTime<Utc>, user_id: impl Into<String>, farmer_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ts_utc,
            success: false,
            processed: false,
            user_id: Some(user_id.into()),
            client_id: None,
            farmer_id: Some(farmer_id.into()),
            client_report: None,
            farmer_report: None,
            storage_bytes: None,
            download_bandwidth_bytes: None,
        }
    }

    pub fn client_code(&self) -> Option<i32> {
        self.client_report
            .as_ref()
            .and_then(|r| r.exchange_result_code)
    }

    pub fn farmer_code(&self) -> Option<i32> {
        self.farmer_report
            .as_ref()
            .and_then(|r| r.exchange_result_code)
    }

    /// Bytes moved by the transfer. Storage and download bandwidth are
    /// mutually exclusive by event type; a zero storage count falls through
    /// to the bandwidth count.
    pub fn transfer_bytes(&self) -> i64 {
        match self.storage_bytes {
            Some(n) if n != 0 => n,
            _ => self.download_bandwidth_bytes.unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// UserRecord
// ---------------------------------------------------------------------------

/// Account whose transfer request produced an event, with its rolling
/// unknown-report statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub unknown_reports: i64,
    pub total_reports: i64,
    pub unknown_report_bytes: i64,
    pub total_report_bytes: i64,
    pub reports_window_start: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            unknown_reports: 0,
            total_reports: 0,
            unknown_report_bytes: 0,
            total_report_bytes: 0,
            reports_window_start: None,
        }
    }

    /// Fraction of reports in the current window that were classified unknown.
    pub fn unknown_report_rate(&self) -> f64 {
        if self.total_reports <= 0 {
            return 0.0;
        }
        self.unknown_reports as f64 / self.total_reports as f64
    }

    pub fn exceeds_unknown_reports_threshold(&self, threshold: f64) -> bool {
        self.total_reports > 0 && self.unknown_report_rate() > threshold
    }

    /// Fold one resolved event into the rolling window.
    ///
    /// Counters restart when `at` falls past the end of the current window.
    /// A window whose end is not representable never expires.
    pub fn update_unknown_reports(&mut self, unknown: bool, at: DateTime<Utc>, bytes: i64, window: Duration) {
        let expired = match self.reports_window_start {
            Some(start) => start.checked_add_signed(window).is_some_and(|end| at >= end),
            None => true,
        };
        if expired {
            self.unknown_reports = 0;
            self.total_reports = 0;
            self.unknown_report_bytes = 0;
            self.total_report_bytes = 0;
            self.reports_window_start = Some(at);
        }

        self.total_reports += 1;
        self.total_report_bytes = self.total_report_bytes.saturating_add(bytes);
        if unknown {
            self.unknown_reports += 1;
            self.unknown_report_bytes = self.unknown_report_bytes.saturating_add(bytes);
        }
    }
}

// ---------------------------------------------------------------------------
// ContactRecord
// ---------------------------------------------------------------------------

/// Reputation subject (the farmer node that performed a transfer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub node_id: String,
    pub reputation: i64,
    pub points_recorded_at: Option<DateTime<Utc>>,
}

impl ContactRecord {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            reputation: 0,
            points_recorded_at: None,
        }
    }

    pub fn record_points(mut self, delta: i64, at: DateTime<Utc>) -> Self {
        self.reputation = self.reputation.saturating_add(delta);
        self.points_recorded_at = Some(at);
        self
    }
}

/// Which point category a resolved transfer earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointCategory {
    TransferSuccess,
    TransferFailure,
}

impl PointCategory {
    pub fn for_outcome(success: bool) -> Self {
        if success {
            PointCategory::TransferSuccess
        } else {
            PointCategory::TransferFailure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PointCategory::TransferSuccess => "TRANSFER_SUCCESS",
            PointCategory::TransferFailure => "TRANSFER_FAILURE",
        }
    }
}

// ---------------------------------------------------------------------------
// JobCheckpoint
// ---------------------------------------------------------------------------

/// Key of the checkpoint inside the cron lock's `raw_data` payload.
pub const LAST_TIMESTAMP_KEY: &str = "lastTimestamp";

/// Lower edge of the next run's window, persisted through the cron lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub last_timestamp: DateTime<Utc>,
}

impl JobCheckpoint {
    pub fn at(last_timestamp: DateTime<Utc>) -> Self {
        Self { last_timestamp }
    }

    /// Earliest representable checkpoint; used on a first-ever run.
    pub fn epoch() -> Self {
        Self {
            last_timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Read `{"lastTimestamp": <epoch ms>}`.
    ///
    /// Returns `None` for anything that is not a positive integer so callers
    /// can warn and fall back to [`JobCheckpoint::epoch`].
    pub fn from_raw_data(raw: &Value) -> Option<Self> {
        let ms = raw.get(LAST_TIMESTAMP_KEY)?.as_i64()?;
        if ms <= 0 {
            return None;
        }
        DateTime::<Utc>::from_timestamp_millis(ms).map(Self::at)
    }

    pub fn to_raw_data(&self) -> Value {
        let mut raw = serde_json::Map::new();
        raw.insert(
            LAST_TIMESTAMP_KEY.to_string(),
            Value::from(self.last_timestamp.timestamp_millis()),
        );
        Value::Object(raw)
    }
}
