use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Returned by [`cron_lock`] when the lock was taken.
#[derive(Debug, Clone)]
pub struct CronLockGrant {
    /// Identifies this holder; required to unlock.
    pub token: Uuid,
    /// State persisted by the previous holder's unlock.
    pub prior_raw_data: Value,
    pub locked_end_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CronJobRow {
    pub name: String,
    pub locked: bool,
    pub locked_at_utc: Option<DateTime<Utc>>,
    pub locked_end_utc: Option<DateTime<Utc>>,
    pub locked_by: Option<Uuid>,
    pub raw_data: Value,
}

/// Try to take the named lock for `lease_ms`.
///
/// Succeeds when the row does not exist yet, is unlocked, or its lease has
/// run out. Lease arithmetic uses the database clock so workers on hosts
/// with skewed clocks still agree on expiry. Returns `None` when another
/// holder's lease is still live.
pub async fn cron_lock(pool: &PgPool, name: &str, lease_ms: i64) -> Result<Option<CronLockGrant>> {
    let token = Uuid::new_v4();

    let row = sqlx::query(
        r#"
        insert into cron_jobs as cj (
          name, locked, locked_at_utc, locked_end_utc, locked_by, raw_data, updated_at_utc
        ) values (
          $1, true, now(), now() + ($2::bigint * interval '1 millisecond'), $3, '{}'::jsonb, now()
        )
        on conflict (name) do update
          set locked = true,
              locked_at_utc = excluded.locked_at_utc,
              locked_end_utc = excluded.locked_end_utc,
              locked_by = excluded.locked_by,
              updated_at_utc = excluded.updated_at_utc
          where cj.locked = false
             or cj.locked_end_utc is null
             or cj.locked_end_utc <= excluded.locked_at_utc
        returning raw_data, locked_end_utc
        "#,
    )
    .bind(name)
    .bind(lease_ms)
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("cron_lock failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(CronLockGrant {
        token,
        prior_raw_data: row.try_get("raw_data")?,
        locked_end_utc: row.try_get("locked_end_utc")?,
    }))
}

/// Release the named lock and store `raw_data` for the next holder.
///
/// Only the holder identified by `token` can unlock. Returns `false` when
/// the lock was lost (lease expired and another worker took it); the other
/// worker's state is left untouched in that case.
pub async fn cron_unlock(pool: &PgPool, name: &str, token: Uuid, raw_data: &Value) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update cron_jobs
        set locked = false,
            locked_end_utc = null,
            locked_by = null,
            raw_data = $3,
            updated_at_utc = now()
        where name = $1
          and locked_by = $2
        "#,
    )
    .bind(name)
    .bind(token)
    .bind(raw_data)
    .execute(pool)
    .await
    .context("cron_unlock failed")?;

    Ok(res.rows_affected() == 1)
}

pub async fn fetch_cron_job(pool: &PgPool, name: &str) -> Result<Option<CronJobRow>> {
    let row = sqlx::query(
        r#"
        select name, locked, locked_at_utc, locked_end_utc, locked_by, raw_data
        from cron_jobs
        where name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("fetch_cron_job failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(CronJobRow {
        name: row.try_get("name")?,
        locked: row.try_get("locked")?,
        locked_at_utc: row.try_get("locked_at_utc")?,
        locked_end_utc: row.try_get("locked_end_utc")?,
        locked_by: row.try_get("locked_by")?,
        raw_data: row.try_get("raw_data")?,
    }))
}
