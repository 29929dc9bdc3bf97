//! Query functions for the `registered_groups` chat-binding side table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::RegisteredGroup;

/// Upsert a chat-group binding by jid.
pub async fn register_group(
    pool: &PgPool,
    jid: &str,
    name: &str,
    folder: &str,
    trigger_word: &str,
    requires_trigger: bool,
) -> Result<RegisteredGroup> {
    let group = sqlx::query_as::<_, RegisteredGroup>(
        "INSERT INTO registered_groups (jid, name, folder, trigger_word, requires_trigger) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (jid) DO UPDATE \
            SET name = EXCLUDED.name, \
                folder = EXCLUDED.folder, \
                trigger_word = EXCLUDED.trigger_word, \
                requires_trigger = EXCLUDED.requires_trigger \
         RETURNING *",
    )
    .bind(jid)
    .bind(name)
    .bind(folder)
    .bind(trigger_word)
    .bind(requires_trigger)
    .fetch_one(pool)
    .await
    .context("failed to register group")?;

    Ok(group)
}

/// Fetch a registered group by jid.
pub async fn get_registered_group(pool: &PgPool, jid: &str) -> Result<Option<RegisteredGroup>> {
    let group = sqlx::query_as::<_, RegisteredGroup>("SELECT * FROM registered_groups WHERE jid = $1")
        .bind(jid)
        .fetch_optional(pool)
        .await
        .context("failed to fetch registered group")?;

    Ok(group)
}

/// List every registered group.
pub async fn list_registered_groups(pool: &PgPool) -> Result<Vec<RegisteredGroup>> {
    let groups =
        sqlx::query_as::<_, RegisteredGroup>("SELECT * FROM registered_groups ORDER BY name")
            .fetch_all(pool)
            .await
            .context("failed to list registered groups")?;

    Ok(groups)
}
