//! Query support for `PruneEngine`: filter-based deletion and recursive
//! subtree deletion.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Task, TaskStatus};

/// Result of a filter-based or subtree prune.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PruneReport {
    pub deleted_tasks: i64,
    pub deleted_dependencies: i64,
    pub by_status: Vec<(String, i64)>,
    pub reclaimed_bytes: Option<u64>,
}

/// Select tasks eligible for filter-based pruning: status in `statuses` and
/// the effective timestamp (`completed_at` if set, else `submitted_at`)
/// at or before `cutoff`. Ordered age-ascending (oldest first) so that a
/// `limit` always removes the oldest rows first rather than an arbitrary
/// subset.
pub async fn select_prunable(
    pool: &SqlitePool,
    statuses: &[TaskStatus],
    cutoff: DateTime<Utc>,
    limit: Option<i64>,
) -> Result<Vec<Task>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let mut sql = format!(
        "SELECT * FROM tasks \
         WHERE status IN ({placeholders}) \
           AND COALESCE(completed_at, submitted_at) <= ? \
         ORDER BY COALESCE(completed_at, submitted_at) ASC"
    );
    if limit.is_some() {
        sql.push_str(" LIMIT ?");
    }

    let mut query = sqlx::query_as::<_, Task>(&sql);
    for s in statuses {
        query = query.bind(*s);
    }
    query = query.bind(cutoff);
    if let Some(l) = limit {
        query = query.bind(l);
    }

    let tasks = query
        .fetch_all(pool)
        .await
        .context("failed to select prunable tasks")?;
    Ok(tasks)
}

/// Delete a set of tasks by id. Dependency edges referencing them cascade
/// via the schema's `ON DELETE CASCADE`. Returns deleted-task and
/// deleted-dependency counts.
pub async fn delete_tasks(pool: &SqlitePool, ids: &[Uuid]) -> Result<(i64, i64)> {
    if ids.is_empty() {
        return Ok((0, 0));
    }
    let placeholders = vec!["?"; ids.len()].join(", ");

    let mut tx = pool.begin().await.context("failed to start prune transaction")?;

    let dep_sql = format!(
        "SELECT COUNT(*) FROM task_dependencies \
         WHERE dependent_task_id IN ({placeholders}) OR prerequisite_task_id IN ({placeholders})"
    );
    let mut dep_count_query = sqlx::query_as::<_, (i64,)>(&dep_sql);
    for id in ids {
        dep_count_query = dep_count_query.bind(id);
    }
    for id in ids {
        dep_count_query = dep_count_query.bind(id);
    }
    let (dep_count,) = dep_count_query
        .fetch_one(&mut *tx)
        .await
        .context("failed to count dependency edges for deletion")?;

    let del_sql = format!("DELETE FROM tasks WHERE id IN ({placeholders})");
    let mut del_query = sqlx::query(&del_sql);
    for id in ids {
        del_query = del_query.bind(id);
    }
    let result = del_query
        .execute(&mut *tx)
        .await
        .context("failed to delete tasks")?;

    tx.commit().await.context("failed to commit prune transaction")?;

    Ok((result.rows_affected() as i64, dep_count))
}

/// Fetch the full descendant subtree rooted at `root_id` (by
/// `parent_task_id`), breadth-first, including the root itself.
pub async fn fetch_subtree(pool: &SqlitePool, root_id: Uuid) -> Result<Vec<Task>> {
    let Some(root) = super::tasks::get_task(pool, root_id).await? else {
        return Ok(Vec::new());
    };

    let mut subtree = vec![root];
    let mut frontier = vec![root_id];

    while !frontier.is_empty() {
        let placeholders = vec!["?"; frontier.len()].join(", ");
        let sql = format!("SELECT * FROM tasks WHERE parent_task_id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, Task>(&sql);
        for id in &frontier {
            query = query.bind(id);
        }
        let children = query
            .fetch_all(pool)
            .await
            .context("failed to fetch subtree level")?;

        frontier = children.iter().map(|t| t.id).collect();
        subtree.extend(children);
    }

    Ok(subtree)
}

/// Delete a subtree in leaf-first order within one transaction. Callers
/// must have already verified every node is in an allowed terminal status.
pub async fn delete_subtree_leaf_first(pool: &SqlitePool, tasks: &[Task]) -> Result<(i64, i64)> {
    // Deepest nodes (no children among the set) deleted first: repeatedly
    // peel off tasks that are not any other task's parent.
    let mut remaining: Vec<&Task> = tasks.iter().collect();
    let mut ordered: Vec<Uuid> = Vec::with_capacity(tasks.len());

    while !remaining.is_empty() {
        let parent_ids: std::collections::HashSet<Uuid> = remaining
            .iter()
            .filter_map(|t| t.parent_task_id)
            .collect();
        let (leaves, rest): (Vec<&Task>, Vec<&Task>) = remaining
            .into_iter()
            .partition(|t| !parent_ids.contains(&t.id));
        if leaves.is_empty() {
            // Cycle guard: should be unreachable for a well-formed tree.
            anyhow::bail!("subtree deletion made no progress; parent pointers may cycle");
        }
        ordered.extend(leaves.iter().map(|t| t.id));
        remaining = rest;
    }

    delete_tasks(pool, &ordered).await
}
