//! The opaque per-task `state` bag: a namespaced key/value store that
//! external callers (the orchestrator, the executor adapter) can use to
//! stash bookkeeping without a schema migration.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Upsert a key in a task's state bag.
pub async fn set_state(pool: &SqlitePool, task_id: Uuid, key: &str, value: Option<&str>) -> Result<()> {
    sqlx::query(
        "INSERT INTO state (task_id, key, value) VALUES (?, ?, ?) \
         ON CONFLICT (task_id, key) DO UPDATE SET value = excluded.value",
    )
    .bind(task_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("failed to set task state")?;

    Ok(())
}

/// Read one key from a task's state bag.
pub async fn get_state(pool: &SqlitePool, task_id: Uuid, key: &str) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT value FROM state WHERE task_id = ? AND key = ?")
            .bind(task_id)
            .bind(key)
            .fetch_optional(pool)
            .await
            .context("failed to get task state")?;

    Ok(row.and_then(|(v,)| v))
}
