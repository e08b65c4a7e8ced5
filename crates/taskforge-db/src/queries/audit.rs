//! Append-only audit log. Writes here are not transactional with task
//! updates: the task row is always authoritative, the audit trail is
//! advisory.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::AuditEntry;

/// Append one audit row. Never fails the caller's transaction: callers
/// should log and continue if this errors.
pub async fn log_audit(
    pool: &SqlitePool,
    task_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    action_type: &str,
    action_data: Option<&serde_json::Value>,
    result: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit (id, timestamp, task_id, agent_id, action_type, action_data, result) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(Utc::now())
    .bind(task_id)
    .bind(agent_id)
    .bind(action_type)
    .bind(action_data)
    .bind(result)
    .execute(pool)
    .await
    .context("failed to write audit entry")?;

    Ok(())
}

/// Audit entries for a single task, oldest first.
pub async fn list_audit_for_task(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit WHERE task_id = ? ORDER BY timestamp ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list audit entries for task")?;

    Ok(entries)
}
