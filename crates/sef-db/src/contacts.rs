use anyhow::{Context, Result};
use sef_schemas::ContactRecord;
use sqlx::{PgPool, Row};

pub async fn fetch_contact(pool: &PgPool, node_id: &str) -> Result<Option<ContactRecord>> {
    let row = sqlx::query(
        r#"
        select node_id, reputation, points_recorded_at
        from contacts
        where node_id = $1
        "#,
    )
    .bind(node_id)
    .fetch_optional(pool)
    .await
    .context("fetch_contact failed")?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ContactRecord {
        node_id: row.try_get("node_id")?,
        reputation: row.try_get("reputation")?,
        points_recorded_at: row.try_get("points_recorded_at")?,
    }))
}

/// Create the contact if missing.
pub async fn upsert_contact(pool: &PgPool, contact: &ContactRecord) -> Result<()> {
    sqlx::query(
        r#"
        insert into contacts (node_id, reputation, points_recorded_at)
        values ($1, $2, $3)
        on conflict (node_id) do nothing
        "#,
    )
    .bind(&contact.node_id)
    .bind(contact.reputation)
    .bind(contact.points_recorded_at)
    .execute(pool)
    .await
    .context("upsert_contact failed")?;

    Ok(())
}

/// Persist a contact's reputation after points were recorded.
pub async fn save_contact(pool: &PgPool, contact: &ContactRecord) -> Result<()> {
    sqlx::query(
        r#"
        update contacts
        set reputation = $2,
            points_recorded_at = $3
        where node_id = $1
        "#,
    )
    .bind(&contact.node_id)
    .bind(contact.reputation)
    .bind(contact.points_recorded_at)
    .execute(pool)
    .await
    .context("save_contact failed")?;

    Ok(())
}
