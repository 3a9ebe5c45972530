//! Scenario: outcome resolution applied through a full run.
//!
//! # Invariants under test
//! - Every eligible event is persisted with its resolved outcome and
//!   `processed = true`; a declared success is never reclassified.
//! - Farmers are credited for success and debited for failure.
//! - A user over the unknown-report threshold gets the benefit of the doubt
//!   on inconclusive events; a user under it (or with no record) does not.
//! - Events without a user are never fetched, never marked processed, and do
//!   not move the checkpoint.
//! - Each processed event is folded into its user's unknown-report window.

use serde_json::json;
use sef_runtime::{RunOutcome, RunPhase};
use sef_schemas::{ContactRecord, ExchangeReport, StorageEvent, UserRecord};
use sef_testkit::{event_at, ts, JobHarness};

const BASE: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn with_codes(mut ev: StorageEvent, client: Option<i32>, farmer: Option<i32>) -> StorageEvent {
    ev.client_report = client.map(ExchangeReport::with_code);
    ev.farmer_report = farmer.map(ExchangeReport::with_code);
    ev
}

#[tokio::test]
async fn each_rule_is_persisted_and_scored() {
    let h = JobHarness::default();

    h.store.insert_user(UserRecord::new("alice"));
    let mut bob = UserRecord::new("bob");
    bob.total_reports = 10;
    bob.unknown_reports = 5;
    bob.reports_window_start = Some(ts(BASE));
    h.store.insert_user(bob);

    let declared = {
        let mut ev = with_codes(event_at(BASE + 1_000, "alice", "f-declared"), None, Some(1100));
        ev.success = true;
        ev
    };
    let client_ok = with_codes(event_at(BASE + 2_000, "alice", "f-client-ok"), Some(1000), Some(1100));
    let farmer_fail = with_codes(event_at(BASE + 3_000, "alice", "f-farmer-fail"), None, Some(1100));
    let no_user = {
        let mut ev = event_at(BASE + 3_500, "alice", "f-no-user");
        ev.user_id = None;
        ev
    };
    let both_fail = with_codes(event_at(BASE + 4_000, "alice", "f-both-fail"), Some(1100), Some(1100));
    let client_fail = with_codes(event_at(BASE + 5_000, "alice", "f-client-fail"), Some(1100), None);
    let unknown = with_codes(event_at(BASE + 6_000, "alice", "f-unknown"), Some(0), Some(1000));
    let lenient = event_at(BASE + 7_000, "bob", "f-lenient");
    let ghost = event_at(BASE + 8_000, "ghost", "f-ghost");

    let expected = [
        (&declared, true, 10),
        (&client_ok, true, 10),
        (&farmer_fail, false, -10),
        (&both_fail, false, -10),
        (&client_fail, false, -10),
        (&unknown, false, -10),
        (&lenient, true, 10),
        (&ghost, false, -10),
    ];

    for ev in [&declared, &client_ok, &farmer_fail, &no_user, &both_fail, &client_fail, &unknown, &lenient, &ghost] {
        h.store.insert_event(ev.clone());
        if let Some(farmer) = ev.farmer_id.as_deref() {
            h.ledger.insert_contact(ContactRecord::new(farmer));
        }
    }

    let controller = h.controller();
    let outcome = controller.run_once(ts(BASE + 4 * HOUR)).await;

    let report = match outcome {
        RunOutcome::Completed { report, release } => {
            assert!(release.is_released());
            report
        }
        other => panic!("expected a completed run, got {other:?}"),
    };
    assert_eq!(report.processed, 8);
    assert_eq!(report.already_processed, 0);
    assert_eq!(report.checkpoint.last_timestamp, ts(BASE + 8_000));
    assert_eq!(h.stored_state(), Some(json!({ "lastTimestamp": BASE + 8_000 })));
    assert_eq!(controller.phase(), RunPhase::Idle);

    for (ev, success, delta) in expected {
        let stored = h.store.event(ev.event_id).unwrap();
        assert!(stored.processed, "event {:?} must be processed", ev.farmer_id);
        assert_eq!(stored.success, success, "outcome for {:?}", ev.farmer_id);
        let farmer = ev.farmer_id.as_deref().unwrap();
        assert_eq!(h.ledger.reputation(farmer), Some(delta), "points for {farmer}");
    }

    let skipped = h.store.event(no_user.event_id).unwrap();
    assert!(!skipped.processed);
    assert_eq!(h.ledger.reputation("f-no-user"), Some(0));
    assert_eq!(h.store.fetches(), 8);

    // alice: six events, one inconclusive; the window opened at her first event.
    let alice = h.store.user("alice").unwrap();
    assert_eq!(alice.total_reports, 6);
    assert_eq!(alice.unknown_reports, 1);
    assert_eq!(alice.reports_window_start, Some(ts(BASE + 1_000)));

    // bob: continues his open window.
    let bob = h.store.user("bob").unwrap();
    assert_eq!(bob.total_reports, 11);
    assert_eq!(bob.unknown_reports, 6);
    assert_eq!(bob.reports_window_start, Some(ts(BASE)));

    assert!(h.store.user("ghost").is_none());
}

#[tokio::test]
async fn unknown_reports_accumulate_into_leniency_across_events() {
    let mut settings = sef_config::JobSettings::default();
    settings.unknown_report_threshold = 0.5;
    let h = JobHarness::new(settings);
    h.store.insert_user(UserRecord::new("carol"));
    h.ledger.insert_contact(ContactRecord::new("node"));

    // Two inconclusive events: the first is resolved against an empty
    // history (0 of 0), the second against 1 of 1 unknown (> 0.5).
    let first = event_at(BASE + 1_000, "carol", "node");
    let second = event_at(BASE + 2_000, "carol", "node");
    h.store.insert_event(first.clone());
    h.store.insert_event(second.clone());

    let outcome = h.controller().run_once(ts(BASE + 4 * HOUR)).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }), "{outcome:?}");

    assert!(!h.store.event(first.event_id).unwrap().success);
    assert!(h.store.event(second.event_id).unwrap().success);
    assert_eq!(h.ledger.reputation("node"), Some(0));

    let carol = h.store.user("carol").unwrap();
    assert_eq!((carol.unknown_reports, carol.total_reports), (2, 2));
}
