use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{BoxStream, StreamExt};
use sef_resolve::EventWindow;
use sef_schemas::{ExchangeReport, StorageEvent};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

macro_rules! event_columns {
    () => {
        r#"
          event_id, ts_utc, success, processed, user_id, client_id, farmer_id,
          storage_bytes, download_bandwidth_bytes,
          client_report_present, client_exchange_result_code, client_exchange_result_message, client_reported_at_utc,
          farmer_report_present, farmer_exchange_result_code, farmer_exchange_result_message, farmer_reported_at_utc
        "#
    };
}

const WINDOW_SQL: &str = concat!(
    "select",
    event_columns!(),
    r#"
    from storage_events
    where ts_utc < $1
      and ts_utc >= $2
      and processed = false
      and user_id is not null
    order by ts_utc asc, event_id asc
    "#
);

const FETCH_EVENT_SQL: &str = concat!(
    "select",
    event_columns!(),
    "from storage_events where event_id = $1"
);

/// Stream the finality window in ascending timestamp order.
///
/// Query contract:
/// `ts_utc < upper AND ts_utc >= lower AND processed = false AND user_id IS NOT NULL`.
///
/// The stream is lazy: rows are pulled from the server only as the caller
/// polls, so a caller that handles one event at a time applies backpressure
/// naturally. Dropping the stream releases its connection.
pub fn stream_finality_window<'a>(
    pool: &'a PgPool,
    window: &EventWindow,
) -> BoxStream<'a, Result<StorageEvent>> {
    sqlx::query(WINDOW_SQL)
        .bind(window.upper_exclusive)
        .bind(window.lower_inclusive)
        .fetch(pool)
        .map(|row| {
            let row = row.context("finality window cursor failed")?;
            storage_event_from_row(&row)
        })
        .boxed()
}

/// Persist the resolved outcome together with the processed marker.
///
/// Single statement, guarded by `processed = false`: returns `false` when the
/// row was already processed (another worker committed it first), in which
/// case nothing is written.
pub async fn mark_event_processed(pool: &PgPool, event_id: Uuid, success: bool) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update storage_events
        set success = $2,
            processed = true
        where event_id = $1
          and processed = false
        "#,
    )
    .bind(event_id)
    .bind(success)
    .execute(pool)
    .await
    .context("mark_event_processed failed")?;

    Ok(res.rows_affected() == 1)
}

pub async fn fetch_storage_event(pool: &PgPool, event_id: Uuid) -> Result<Option<StorageEvent>> {
    let row = sqlx::query(FETCH_EVENT_SQL)
        .bind(event_id)
        .fetch_optional(pool)
        .await
        .context("fetch_storage_event failed")?;

    row.as_ref().map(storage_event_from_row).transpose()
}

/// Insert one event as written by the ingestion path.
pub async fn insert_storage_event(pool: &PgPool, ev: &StorageEvent) -> Result<()> {
    let (client_present, client_code, client_msg, client_at) = report_columns(ev.client_report.as_ref());
    let (farmer_present, farmer_code, farmer_msg, farmer_at) = report_columns(ev.farmer_report.as_ref());

    sqlx::query(
        r#"
        insert into storage_events (
          event_id, ts_utc, success, processed, user_id, client_id, farmer_id,
          storage_bytes, download_bandwidth_bytes,
          client_report_present, client_exchange_result_code, client_exchange_result_message, client_reported_at_utc,
          farmer_report_present, farmer_exchange_result_code, farmer_exchange_result_message, farmer_reported_at_utc
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
        )
        "#,
    )
    .bind(ev.event_id)
    .bind(ev.ts_utc)
    .bind(ev.success)
    .bind(ev.processed)
    .bind(&ev.user_id)
    .bind(&ev.client_id)
    .bind(&ev.farmer_id)
    .bind(ev.storage_bytes)
    .bind(ev.download_bandwidth_bytes)
    .bind(client_present)
    .bind(client_code)
    .bind(client_msg)
    .bind(client_at)
    .bind(farmer_present)
    .bind(farmer_code)
    .bind(farmer_msg)
    .bind(farmer_at)
    .execute(pool)
    .await
    .context("insert_storage_event failed")?;

    Ok(())
}

type ReportColumns<'a> = (bool, Option<i32>, Option<&'a str>, Option<DateTime<Utc>>);

fn report_columns(report: Option<&ExchangeReport>) -> ReportColumns<'_> {
    match report {
        Some(r) => (
            true,
            r.exchange_result_code,
            r.exchange_result_message.as_deref(),
            r.reported_at_utc,
        ),
        None => (false, None, None, None),
    }
}

fn report_from_row(row: &PgRow, side: &str) -> Result<Option<ExchangeReport>> {
    let present: bool = row.try_get(format!("{side}_report_present").as_str())?;
    if !present {
        return Ok(None);
    }
    Ok(Some(ExchangeReport {
        exchange_result_code: row.try_get(format!("{side}_exchange_result_code").as_str())?,
        exchange_result_message: row.try_get(format!("{side}_exchange_result_message").as_str())?,
        reported_at_utc: row.try_get(format!("{side}_reported_at_utc").as_str())?,
    }))
}

fn storage_event_from_row(row: &PgRow) -> Result<StorageEvent> {
    Ok(StorageEvent {
        event_id: row.try_get("event_id")?,
        ts_utc: row.try_get("ts_utc")?,
        success: row.try_get("success")?,
        processed: row.try_get("processed")?,
        user_id: row.try_get("user_id")?,
        client_id: row.try_get("client_id")?,
        farmer_id: row.try_get("farmer_id")?,
        client_report: report_from_row(row, "client")?,
        farmer_report: report_from_row(row, "farmer")?,
        storage_bytes: row.try_get("storage_bytes")?,
        download_bandwidth_bytes: row.try_get("download_bandwidth_bytes")?,
    })
}
