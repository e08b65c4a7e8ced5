//! Database query functions for the `tasks` and `task_dependencies` tables.
//!
//! This is the Store's core: canonical task state, the prerequisite DAG, and
//! the one atomic operation the whole scheduler's correctness rests on --
//! `dequeue_next_task`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{DependencyType, Task, TaskSource, TaskStatus};

/// Fields needed to insert a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub prompt: String,
    pub summary: Option<String>,
    pub agent_type: String,
    pub source: TaskSource,
    pub dependency_type: DependencyType,
    pub base_priority: i32,
    pub max_retries: i32,
    pub max_execution_timeout_seconds: i64,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub input_data: Option<serde_json::Value>,
    pub parent_task_id: Option<Uuid>,
    pub dependency_depth: i32,
    pub status: TaskStatus,
}

/// Insert a new task row with a freshly generated id.
pub async fn insert_task(pool: &SqlitePool, new: &NewTask) -> Result<Task> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks ( \
            id, summary, prompt, agent_type, source, dependency_type, status, \
            base_priority, calculated_priority, input_data, retry_count, max_retries, \
            max_execution_timeout_seconds, submitted_at, last_updated_at, parent_task_id, \
            deadline, estimated_duration_seconds, dependency_depth \
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING *",
    )
    .bind(id)
    .bind(&new.summary)
    .bind(&new.prompt)
    .bind(&new.agent_type)
    .bind(new.source)
    .bind(new.dependency_type)
    .bind(new.status)
    .bind(new.base_priority)
    .bind(&new.input_data)
    .bind(new.max_retries)
    .bind(new.max_execution_timeout_seconds)
    .bind(now)
    .bind(now)
    .bind(new.parent_task_id)
    .bind(new.deadline)
    .bind(new.estimated_duration_seconds)
    .bind(new.dependency_depth)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &SqlitePool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List tasks, optionally filtered to a status or excluding one, capped at
/// `limit` rows ordered newest-first.
pub async fn list_tasks(
    pool: &SqlitePool,
    status: Option<TaskStatus>,
    exclude_status: Option<TaskStatus>,
    limit: Option<i64>,
) -> Result<Vec<Task>> {
    let mut sql = String::from("SELECT * FROM tasks WHERE 1 = 1");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if exclude_status.is_some() {
        sql.push_str(" AND status != ?");
    }
    sql.push_str(" ORDER BY submitted_at DESC");
    if limit.is_some() {
        sql.push_str(" LIMIT ?");
    }

    let mut query = sqlx::query_as::<_, Task>(&sql);
    if let Some(s) = status {
        query = query.bind(s);
    }
    if let Some(s) = exclude_status {
        query = query.bind(s);
    }
    if let Some(l) = limit {
        query = query.bind(l);
    }

    let tasks = query
        .fetch_all(pool)
        .await
        .context("failed to list tasks")?;

    Ok(tasks)
}

/// Set a task's recorded error message without touching status.
pub async fn set_error_message(pool: &SqlitePool, id: Uuid, error: &str) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET error_message = ?, last_updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set error message")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }
    Ok(())
}

/// Record the successful result payload on a task.
pub async fn set_result_data(pool: &SqlitePool, id: Uuid, result_data: &serde_json::Value) -> Result<()> {
    sqlx::query("UPDATE tasks SET result_data = ?, last_updated_at = ? WHERE id = ?")
        .bind(result_data)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set result data")?;
    Ok(())
}

/// Update a task's `calculated_priority` and `dependency_depth`.
pub async fn update_priority(
    pool: &SqlitePool,
    id: Uuid,
    calculated_priority: f64,
    dependency_depth: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET calculated_priority = ?, dependency_depth = ?, last_updated_at = ? WHERE id = ?",
    )
    .bind(calculated_priority)
    .bind(dependency_depth)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update task priority")?;
    Ok(())
}

/// Atomically transition a task from one status to another.
///
/// Optimistic locking: the `WHERE` clause includes `status = ?from`, so the
/// row is only updated if the current status matches. Returns the number of
/// rows affected (0 means the expected status did not match -- the caller
/// lost the race or the precondition was stale).
pub async fn transition_task_status(
    pool: &SqlitePool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    error_message: Option<&str>,
) -> Result<u64> {
    let now = Utc::now();
    let started_at = matches!(to, TaskStatus::Running).then_some(now);
    let completed_at = matches!(to, TaskStatus::Completed).then_some(now);
    let failed_at = matches!(to, TaskStatus::Failed | TaskStatus::Cancelled).then_some(now);

    let result = sqlx::query(
        "UPDATE tasks \
         SET status = ?, \
             started_at = COALESCE(?, started_at), \
             completed_at = COALESCE(?, completed_at), \
             failed_at = COALESCE(?, failed_at), \
             error_message = COALESCE(?, error_message), \
             last_updated_at = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(failed_at)
    .bind(error_message)
    .bind(now)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Atomically claim the single highest-priority `ready` task and flip it to
/// `running` in one statement -- the scheduler's correctness anchor. Two
/// concurrent callers can never observe and claim the same row: the subquery
/// and the `UPDATE` execute as one atomic statement against the row.
pub async fn dequeue_next_task(pool: &SqlitePool) -> Result<Option<Task>> {
    let now = Utc::now();
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'running', started_at = ?, last_updated_at = ? \
         WHERE id = ( \
             SELECT id FROM tasks \
             WHERE status = 'ready' \
             ORDER BY calculated_priority DESC, submitted_at ASC \
             LIMIT 1 \
         ) \
         AND status = 'ready' \
         RETURNING *",
    )
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("failed to dequeue next task")?;

    Ok(task)
}

/// Re-queue a task from `running` back to `ready` (used when the agent pool
/// is full and the orchestrator must back off after an optimistic dequeue).
pub async fn requeue_ready(pool: &SqlitePool, task_id: Uuid) -> Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE tasks SET status = 'ready', last_updated_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(now)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to requeue task")?;
    Ok(result.rows_affected())
}

/// Fetch `running` tasks whose last activity exceeds their own
/// `max_execution_timeout_seconds` -- candidates for `FailureRecovery`'s
/// stall sweep.
pub async fn get_stale_running_tasks(pool: &SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'running' \
           AND (unixepoch('now') - unixepoch(last_updated_at)) > max_execution_timeout_seconds",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch stale running tasks")?;

    Ok(tasks)
}

/// Fetch terminal `failed`/`cancelled` tasks with `retry_count < max_retries`
/// -- candidates for `FailureRecovery`'s backoff sweep.
pub async fn get_retryable_terminal_tasks(pool: &SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status IN ('failed', 'cancelled') AND retry_count < max_retries",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch retryable terminal tasks")?;

    Ok(tasks)
}

/// Only `FailureRecovery` may call this: increments `retry_count` with an
/// optimistic lock on the previous value, guarding against a double-increment
/// race if two sweeps somehow overlap.
pub async fn increment_retry_count(pool: &SqlitePool, task_id: Uuid, current: i32) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET retry_count = retry_count + 1, last_updated_at = ? \
         WHERE id = ? AND retry_count = ?",
    )
    .bind(Utc::now())
    .bind(task_id)
    .bind(current)
    .execute(pool)
    .await
    .context("failed to increment retry count")?;
    Ok(result.rows_affected())
}

/// Insert a prerequisite edge: `dependent_id` depends on `prerequisite_id`.
pub async fn insert_dependency(
    pool: &SqlitePool,
    dependent_id: Uuid,
    prerequisite_id: Uuid,
    dependency_type: DependencyType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (id, dependent_task_id, prerequisite_task_id, dependency_type, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (dependent_task_id, prerequisite_task_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(dependent_id)
    .bind(prerequisite_id)
    .bind(dependency_type)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Direct prerequisites of `task_id` (tasks it depends on).
pub async fn get_dependencies(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT prerequisite_task_id FROM task_dependencies WHERE dependent_task_id = ?",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Direct dependents of `task_id` (tasks that depend on it).
pub async fn get_dependents(pool: &SqlitePool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT dependent_task_id FROM task_dependencies WHERE prerequisite_task_id = ?",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependents")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Mark a dependency edge resolved (its prerequisite reached a terminal
/// state).
pub async fn resolve_dependency_edges_for(pool: &SqlitePool, prerequisite_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE task_dependencies SET resolved_at = ? \
         WHERE prerequisite_task_id = ? AND resolved_at IS NULL",
    )
    .bind(Utc::now())
    .bind(prerequisite_id)
    .execute(pool)
    .await
    .context("failed to resolve dependency edges")?;
    Ok(())
}

/// Aggregate queue statistics across all non-deleted tasks.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStatus {
    pub pending: i64,
    pub blocked: i64,
    pub ready: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
    pub average_priority: f64,
    pub max_depth: i32,
}

/// Compute `queue_status()`: counts by status, average priority, max depth.
pub async fn queue_status(pool: &SqlitePool) -> Result<QueueStatus> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) as cnt FROM tasks GROUP BY status")
            .fetch_all(pool)
            .await
            .context("failed to aggregate queue status")?;

    let mut status = QueueStatus::default();
    for (s, count) in &rows {
        match s.as_str() {
            "pending" => status.pending = *count,
            "blocked" => status.blocked = *count,
            "ready" => status.ready = *count,
            "running" => status.running = *count,
            "completed" => status.completed = *count,
            "failed" => status.failed = *count,
            "cancelled" => status.cancelled = *count,
            _ => {}
        }
        status.total += count;
    }

    let (avg, max_depth): (Option<f64>, Option<i32>) =
        sqlx::query_as("SELECT AVG(calculated_priority), MAX(dependency_depth) FROM tasks")
            .fetch_one(pool)
            .await
            .context("failed to aggregate priority/depth")?;

    status.average_priority = avg.unwrap_or(0.0);
    status.max_depth = max_depth.unwrap_or(0);

    Ok(status)
}

/// All non-terminal tasks, for `execution_plan()`'s topological sort.
pub async fn list_non_terminal_tasks(pool: &SqlitePool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .fetch_all(pool)
    .await
    .context("failed to list non-terminal tasks")?;
    Ok(tasks)
}

/// All dependency edges among a set of task ids (used to build the DAG for
/// `execution_plan()` without N+1 queries).
pub async fn get_dependencies_for_tasks(
    pool: &SqlitePool,
    task_ids: &[Uuid],
) -> Result<Vec<(Uuid, Uuid)>> {
    if task_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; task_ids.len()].join(", ");
    let sql = format!(
        "SELECT dependent_task_id, prerequisite_task_id FROM task_dependencies \
         WHERE dependent_task_id IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (Uuid, Uuid)>(&sql);
    for id in task_ids {
        query = query.bind(id);
    }
    let edges = query
        .fetch_all(pool)
        .await
        .context("failed to fetch dependency edges for tasks")?;
    Ok(edges)
}

/// Count direct children of `task_id` (by `parent_task_id`); used to enforce
/// "a task with children cannot be individually deleted".
pub async fn count_children(pool: &SqlitePool, task_id: Uuid) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE parent_task_id = ?")
        .bind(task_id)
        .fetch_one(pool)
        .await
        .context("failed to count children")?;
    Ok(count)
}
