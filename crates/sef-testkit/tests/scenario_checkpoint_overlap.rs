//! Scenario: checkpoint handoff between runs.
//!
//! # Invariants under test
//! - The lower bound is inclusive: an event sharing the checkpoint's
//!   timestamp that arrived after the previous run is picked up; events
//!   already processed at that timestamp are not fetched again.
//! - The checkpoint never moves backwards and is released unchanged when
//!   nothing was eligible.
//! - Events younger than the finality delay are left for a later run.
//! - An absent or malformed stored checkpoint starts the window at the epoch.
//! - Durations past chrono's range do not panic mid-run: an unrepresentable
//!   finality bound empties the window, and an unrepresentable unknown-report
//!   window end keeps the user's counters accumulating. Both runs release.

use serde_json::json;
use sef_runtime::RunOutcome;
use sef_config::JobSettings;
use sef_schemas::{JobCheckpoint, UserRecord};
use sef_testkit::{event_at, ts, JobHarness};

const BASE: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn completed(outcome: RunOutcome) -> sef_runtime::WindowReport {
    match outcome {
        RunOutcome::Completed { report, release } => {
            assert!(release.is_released());
            report
        }
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[tokio::test]
async fn late_event_at_checkpoint_timestamp_is_not_skipped() {
    let h = JobHarness::default();
    let controller = h.controller();
    let now = ts(BASE + 4 * HOUR);

    let a = event_at(BASE + 1_000, "u", "f");
    let b = event_at(BASE + 2_000, "u", "f");
    h.store.insert_event(a.clone());
    h.store.insert_event(b.clone());

    let first = completed(controller.run_once(now).await);
    assert_eq!(first.processed, 2);
    assert_eq!(first.checkpoint, JobCheckpoint::at(b.ts_utc));

    // Arrives late with the same timestamp as the checkpoint.
    let c = event_at(BASE + 2_000, "u", "f");
    let d = event_at(BASE + 3_000, "u", "f");
    h.store.insert_event(c.clone());
    h.store.insert_event(d.clone());

    let second = completed(controller.run_once(now).await);
    assert_eq!(second.processed, 2);
    assert_eq!(second.checkpoint, JobCheckpoint::at(d.ts_utc));
    assert!(h.store.is_processed(c.event_id));
    assert_eq!(h.store.fetches(), 4, "processed events must not be fetched again");
}

#[tokio::test]
async fn empty_window_releases_checkpoint_unchanged() {
    let h = JobHarness::default();
    h.seed_state(json!({ "lastTimestamp": BASE + 5_000 }));
    // Before the checkpoint: outside the window.
    let old = event_at(BASE + 1_000, "u", "f");
    h.store.insert_event(old.clone());

    let report = completed(h.controller().run_once(ts(BASE + 4 * HOUR)).await);
    assert_eq!(report.processed, 0);
    assert_eq!(report.checkpoint, JobCheckpoint::at(ts(BASE + 5_000)));
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE + 5_000 })));
    assert!(!h.store.is_processed(old.event_id));
}

#[tokio::test]
async fn events_inside_finality_delay_wait() {
    let h = JobHarness::default();
    let now = ts(BASE + 4 * HOUR);
    let settled = event_at(BASE + 1_000, "u", "f");
    // Exactly at the upper bound: excluded.
    let boundary = event_at(BASE + HOUR, "u", "f");
    let recent = event_at(BASE + 3 * HOUR, "u", "f");
    for ev in [&settled, &boundary, &recent] {
        h.store.insert_event(ev.clone());
    }

    let report = completed(h.controller().run_once(now).await);
    assert_eq!(report.processed, 1);
    assert_eq!(report.checkpoint, JobCheckpoint::at(settled.ts_utc));
    assert!(!h.store.is_processed(boundary.event_id));
    assert!(!h.store.is_processed(recent.event_id));

    // Four hours later both have aged past the delay.
    let report = completed(h.controller().run_once(now + chrono::Duration::hours(4)).await);
    assert_eq!(report.processed, 2);
    assert_eq!(report.checkpoint, JobCheckpoint::at(recent.ts_utc));
}

#[tokio::test]
async fn malformed_checkpoint_starts_from_epoch() {
    for raw in [
        json!({}),
        json!({ "lastTimestamp": "yesterday" }),
        json!({ "lastTimestamp": -1 }),
        json!({ "somethingElse": 5 }),
    ] {
        let h = JobHarness::default();
        h.seed_state(raw.clone());
        let ancient = event_at(1_000, "u", "f");
        h.store.insert_event(ancient.clone());

        let report = completed(h.controller().run_once(ts(BASE)).await);
        assert_eq!(report.processed, 1, "raw={raw}");
        assert_eq!(report.checkpoint, JobCheckpoint::at(ts(1_000)));
        assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": 1_000 })));
    }
}

#[tokio::test]
async fn unrepresentable_finality_releases_empty_window() {
    let h = JobHarness::new(JobSettings {
        finality_time_ms: i64::MAX,
        ..JobSettings::default()
    });
    h.seed_state(json!({ "lastTimestamp": BASE }));
    let ev = event_at(BASE + 1_000, "u", "f");
    h.store.insert_event(ev.clone());

    let report = completed(h.controller().run_once(ts(BASE + 4 * HOUR)).await);
    assert_eq!(report.processed, 0);
    assert_eq!(report.checkpoint, JobCheckpoint::at(ts(BASE)));
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE })));
    assert!(!h.store.is_processed(ev.event_id));
}

#[tokio::test]
async fn unrepresentable_report_window_keeps_counting() {
    let h = JobHarness::new(JobSettings {
        unknown_report_window_secs: i64::MAX / 1_000,
        ..JobSettings::default()
    });
    let mut user = UserRecord::new("u");
    user.total_reports = 1;
    user.reports_window_start = Some(ts(BASE));
    h.store.insert_user(user);
    let ev = event_at(BASE + 1_000, "u", "f");
    h.store.insert_event(ev.clone());

    let report = completed(h.controller().run_once(ts(BASE + 4 * HOUR)).await);
    assert_eq!(report.processed, 1);
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE + 1_000 })));

    let user = h.store.user("u").unwrap();
    assert_eq!(user.total_reports, 2);
    assert_eq!(user.reports_window_start, Some(ts(BASE)));
}
