use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::controller::{RunController, RunOutcome};

/// First instant at or after `now` that is a whole multiple of `cadence`
/// since the Unix epoch (`:00, :10, :20, ...` for ten minutes).
pub fn next_aligned_tick(now: DateTime<Utc>, cadence: Duration) -> DateTime<Utc> {
    let cadence_ms = i64::try_from(cadence.as_millis()).unwrap_or(i64::MAX).max(1);
    let rem = now.timestamp_millis().rem_euclid(cadence_ms);
    if rem == 0 {
        now
    } else {
        now + chrono::Duration::milliseconds(cadence_ms - rem)
    }
}

/// Trigger `controller` on a fixed cadence until `shutdown` resolves.
///
/// Runs are awaited inline, so this loop never overlaps its own runs;
/// ticks that fall inside a run are skipped. A run in progress when
/// `shutdown` fires finishes and releases its lock before the loop exits.
pub async fn run_schedule<C, S>(controller: &RunController, cadence: Duration, clock: C, shutdown: S)
where
    C: Fn() -> DateTime<Utc>,
    S: Future<Output = ()>,
{
    let cadence = cadence.max(Duration::from_millis(1));
    let now = clock();
    let first = next_aligned_tick(now, cadence);
    let delay = (first - now).to_std().unwrap_or_default();

    let mut ticker = tokio::time::interval_at(Instant::now() + delay, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(job = controller.job_name(), first_tick = %first, ?cadence, "schedule started");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let outcome = controller.run_once(clock()).await;
        if let RunOutcome::Completed { report, .. } | RunOutcome::Failed { report, .. } = &outcome {
            debug!(
                job = controller.job_name(),
                processed = report.processed,
                already_processed = report.already_processed,
                "tick finished"
            );
        }
    }

    info!(job = controller.job_name(), "schedule stopped");
}
