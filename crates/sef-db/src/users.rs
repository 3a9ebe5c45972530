use anyhow::{Context, Result};
use sef_schemas::UserRecord;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub async fn fetch_user(pool: &PgPool, user_id: &str) -> Result<Option<UserRecord>> {
    let row = sqlx::query(
        r#"
        select user_id, unknown_reports, total_reports,
               unknown_report_bytes, total_report_bytes, reports_window_start
        from users
        where user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("fetch_user failed")?;

    row.as_ref().map(user_from_row).transpose()
}

/// Create the user if missing. Existing counters are left as they are.
pub async fn upsert_user(pool: &PgPool, user: &UserRecord) -> Result<()> {
    sqlx::query(
        r#"
        insert into users (
          user_id, unknown_reports, total_reports,
          unknown_report_bytes, total_report_bytes, reports_window_start
        ) values ($1, $2, $3, $4, $5, $6)
        on conflict (user_id) do nothing
        "#,
    )
    .bind(&user.user_id)
    .bind(user.unknown_reports)
    .bind(user.total_reports)
    .bind(user.unknown_report_bytes)
    .bind(user.total_report_bytes)
    .bind(user.reports_window_start)
    .execute(pool)
    .await
    .context("upsert_user failed")?;

    Ok(())
}

/// Write back the rolling unknown-report counters of an existing user.
///
/// Returns `false` when no such user exists.
pub async fn save_user_reports(pool: &PgPool, user: &UserRecord) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update users
        set unknown_reports = $2,
            total_reports = $3,
            unknown_report_bytes = $4,
            total_report_bytes = $5,
            reports_window_start = $6,
            updated_at_utc = now()
        where user_id = $1
        "#,
    )
    .bind(&user.user_id)
    .bind(user.unknown_reports)
    .bind(user.total_reports)
    .bind(user.unknown_report_bytes)
    .bind(user.total_report_bytes)
    .bind(user.reports_window_start)
    .execute(pool)
    .await
    .context("save_user_reports failed")?;

    Ok(res.rows_affected() == 1)
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    Ok(UserRecord {
        user_id: row.try_get("user_id")?,
        unknown_reports: row.try_get("unknown_reports")?,
        total_reports: row.try_get("total_reports")?,
        unknown_report_bytes: row.try_get("unknown_report_bytes")?,
        total_report_bytes: row.try_get("total_report_bytes")?,
        reports_window_start: row.try_get("reports_window_start")?,
    })
}
