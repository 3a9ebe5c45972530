//! Scenario: a persist failure in the middle of a window.
//!
//! # Invariants under test
//! - If persisting the 3rd of 5 events fails, the run ends with the
//!   checkpoint at event #2 and events #3-#5 stay unprocessed.
//! - The checkpoint is released even though the run failed.
//! - The next run re-fetches #3-#5 and finishes the window.
//! - A failure before the first event leaves the checkpoint where it was.

use serde_json::json;
use sef_runtime::{RunOutcome, WindowError};
use sef_schemas::{JobCheckpoint, UserRecord};
use sef_testkit::{event_at, ts, JobHarness};

const BASE: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

#[tokio::test]
async fn third_of_five_fails_checkpoint_stays_at_second() {
    let h = JobHarness::default();
    h.store.insert_user(UserRecord::new("u"));

    let events: Vec<_> = (1..=5)
        .map(|i| event_at(BASE + i * 1_000, "u", "f"))
        .collect();
    for ev in &events {
        h.store.insert_event(ev.clone());
    }
    h.store.fail_mark_processed(events[2].event_id);

    let controller = h.controller();
    let now = ts(BASE + 4 * HOUR);

    match controller.run_once(now).await {
        RunOutcome::Failed { report, error, release } => {
            assert!(matches!(error, WindowError::Store(_)), "{error:?}");
            assert!(release.is_released());
            assert_eq!(report.processed, 2);
            assert_eq!(report.checkpoint, JobCheckpoint::at(events[1].ts_utc));
        }
        other => panic!("expected a failed run, got {other:?}"),
    }
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE + 2_000 })));
    assert!(!h.lock.is_locked(&h.settings.job_name));

    assert!(h.store.is_processed(events[0].event_id));
    assert!(h.store.is_processed(events[1].event_id));
    for ev in &events[2..] {
        assert!(!h.store.is_processed(ev.event_id));
    }

    h.store.clear_faults();
    match controller.run_once(now).await {
        RunOutcome::Completed { report, .. } => {
            assert_eq!(report.processed, 3);
            assert_eq!(report.checkpoint, JobCheckpoint::at(events[4].ts_utc));
        }
        other => panic!("expected a completed run, got {other:?}"),
    }
    assert!(events.iter().all(|ev| h.store.is_processed(ev.event_id)));
    assert_eq!(h.store.user("u").unwrap().total_reports, 5);
}

#[tokio::test]
async fn open_failure_keeps_prior_checkpoint() {
    let h = JobHarness::default();
    h.seed_state(json!({ "lastTimestamp": BASE }));
    h.store.insert_event(event_at(BASE + 1_000, "u", "f"));
    h.store.fail_open_window(true);

    match h.controller().run_once(ts(BASE + 4 * HOUR)).await {
        RunOutcome::Failed { report, release, .. } => {
            assert!(release.is_released());
            assert_eq!(report.processed, 0);
            assert_eq!(report.checkpoint, JobCheckpoint::at(ts(BASE)));
        }
        other => panic!("expected a failed run, got {other:?}"),
    }
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE })));
}

#[tokio::test]
async fn user_lookup_failure_aborts_before_persist() {
    let h = JobHarness::default();
    h.store.insert_user(UserRecord::new("u"));
    let ev = event_at(BASE + 1_000, "u", "f");
    h.store.insert_event(ev.clone());
    h.store.fail_user_lookups(true);

    let outcome = h.controller().run_once(ts(BASE + 4 * HOUR)).await;
    assert!(matches!(outcome, RunOutcome::Failed { .. }), "{outcome:?}");
    assert_eq!(outcome.checkpoint(), Some(JobCheckpoint::epoch()));
    assert!(!h.store.is_processed(ev.event_id));
    assert_eq!(h.store.mutations(), 0);
}
