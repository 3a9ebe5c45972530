use chrono::{DateTime, Duration, Utc};
use sef_schemas::{JobCheckpoint, StorageEvent};

/// Time window one finality run is allowed to touch.
///
/// The lower bound is inclusive and equals the last processed event's own
/// timestamp, so events sharing that timestamp are picked up again on the
/// next run. Only `processed == false` rows qualify, which is what keeps the
/// overlap from double counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    pub lower_inclusive: DateTime<Utc>,
    pub upper_exclusive: DateTime<Utc>,
}

impl EventWindow {
    /// `[checkpoint, now - finality)`.
    ///
    /// A finality reaching past the representable range yields an empty window.
    pub fn new(checkpoint: JobCheckpoint, now: DateTime<Utc>, finality: Duration) -> Self {
        Self {
            lower_inclusive: checkpoint.last_timestamp,
            upper_exclusive: now
                .checked_sub_signed(finality)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// `true` when no timestamp can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        self.upper_exclusive <= self.lower_inclusive
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.lower_inclusive && ts < self.upper_exclusive
    }

    /// Full row predicate of the window query: in range, not yet processed,
    /// and attached to a user.
    pub fn admits(&self, event: &StorageEvent) -> bool {
        self.contains(event.ts_utc) && !event.processed && event.user_id.is_some()
    }
}
