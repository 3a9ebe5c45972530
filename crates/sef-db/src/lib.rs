//! sef-db
//!
//! Postgres persistence for the storage event finality job: the event
//! table and its window cursor, user and contact records, and the
//! `cron_jobs` lock table. Plain `sqlx::query` + binds; no compile-time
//! checked macros so the crate builds without a live database.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod contacts;
mod events;
mod lock;
mod users;

pub use contacts::{fetch_contact, save_contact, upsert_contact};
pub use events::{
    fetch_storage_event, insert_storage_event, mark_event_processed, stream_finality_window,
};
pub use lock::{cron_lock, cron_unlock, fetch_cron_job, CronJobRow, CronLockGrant};
pub use users::{fetch_user, save_user_reports, upsert_user};

/// Env var the DB-backed tests read their connection string from.
pub const ENV_DB_URL: &str = "SEF_DATABASE_URL";

/// Connect to Postgres.
///
/// The pool must allow at least two connections: the window cursor holds
/// one for the length of a run while event and user updates use another.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_storage_events_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'storage_events'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_storage_events_table: exists,
    })
}
