//! PruneEngine: filter-based and subtree-based deletion with dry-run,
//! status-safety, and conditional store compaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use taskforge_db::models::TaskStatus;
use taskforge_db::pool as db_pool;
use taskforge_db::queries::prune::{self, PruneReport};
use uuid::Uuid;

use crate::error::CoreError;

/// Statuses eligible for pruning; any other status is a validation error.
const ALLOWED_PRUNE_STATUSES: &[TaskStatus] = &[TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VacuumMode {
    Always,
    Never,
    Conditional,
}

/// Default rows-deleted threshold that triggers compaction under
/// `VacuumMode::Conditional`, used when the caller doesn't override it via
/// `with_vacuum_threshold` (configuration key `vacuum_conditional_threshold`).
const DEFAULT_VACUUM_CONDITIONAL_THRESHOLD: i64 = 100;

pub struct PruneEngine {
    pool: SqlitePool,
    database_path: std::path::PathBuf,
    vacuum_conditional_threshold: i64,
}

impl PruneEngine {
    pub fn new(pool: SqlitePool, database_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            pool,
            database_path: database_path.into(),
            vacuum_conditional_threshold: DEFAULT_VACUUM_CONDITIONAL_THRESHOLD,
        }
    }

    pub fn with_vacuum_threshold(mut self, threshold: i64) -> Self {
        self.vacuum_conditional_threshold = threshold;
        self
    }

    fn validate_statuses(statuses: &[TaskStatus]) -> Result<()> {
        for s in statuses {
            if !ALLOWED_PRUNE_STATUSES.contains(s) {
                return Err(CoreError::validation(format!(
                    "status {s} is not prunable; only completed, failed, cancelled are allowed"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Delete tasks whose effective timestamp is at or before `cutoff` and
    /// whose status is in `statuses`. `dry_run` selects without deleting.
    pub async fn prune_by_filter(
        &self,
        statuses: &[TaskStatus],
        cutoff: DateTime<Utc>,
        limit: Option<i64>,
        dry_run: bool,
        vacuum_mode: VacuumMode,
    ) -> Result<PruneReport> {
        Self::validate_statuses(statuses)?;

        let candidates = prune::select_prunable(&self.pool, statuses, cutoff, limit).await?;
        let mut by_status: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        for t in &candidates {
            *by_status.entry(t.status.to_string()).or_insert(0) += 1;
        }

        if dry_run || candidates.is_empty() {
            return Ok(PruneReport {
                deleted_tasks: candidates.len() as i64,
                deleted_dependencies: 0,
                by_status: by_status.into_iter().collect(),
                reclaimed_bytes: None,
            });
        }

        let ids: Vec<Uuid> = candidates.iter().map(|t| t.id).collect();
        let (deleted_tasks, deleted_dependencies) = prune::delete_tasks(&self.pool, &ids).await?;

        let reclaimed_bytes = self.maybe_vacuum(vacuum_mode, deleted_tasks).await?;

        Ok(PruneReport {
            deleted_tasks,
            deleted_dependencies,
            by_status: by_status.into_iter().collect(),
            reclaimed_bytes,
        })
    }

    /// Delete the subtree rooted at `root_id`, leaf-first, in one
    /// transaction. Refuses (without deleting anything) if any node in the
    /// subtree is non-terminal.
    pub async fn prune_subtree(&self, root_id: Uuid, dry_run: bool, vacuum_mode: VacuumMode) -> Result<PruneReport> {
        let subtree = prune::fetch_subtree(&self.pool, root_id).await?;
        if subtree.is_empty() {
            return Err(CoreError::not_found("task", root_id).into());
        }

        if let Some(non_terminal) = subtree.iter().find(|t| !t.status.is_terminal()) {
            return Err(CoreError::invariant(format!(
                "subtree rooted at {root_id} contains non-terminal task {} ({})",
                non_terminal.id, non_terminal.status
            ))
            .into());
        }

        let mut by_status: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        for t in &subtree {
            *by_status.entry(t.status.to_string()).or_insert(0) += 1;
        }

        if dry_run {
            return Ok(PruneReport {
                deleted_tasks: subtree.len() as i64,
                deleted_dependencies: 0,
                by_status: by_status.into_iter().collect(),
                reclaimed_bytes: None,
            });
        }

        let (deleted_tasks, deleted_dependencies) = prune::delete_subtree_leaf_first(&self.pool, &subtree).await?;
        let reclaimed_bytes = self.maybe_vacuum(vacuum_mode, deleted_tasks).await?;

        Ok(PruneReport {
            deleted_tasks,
            deleted_dependencies,
            by_status: by_status.into_iter().collect(),
            reclaimed_bytes,
        })
    }

    async fn maybe_vacuum(&self, mode: VacuumMode, rows_deleted: i64) -> Result<Option<u64>> {
        let should_vacuum = match mode {
            VacuumMode::Always => true,
            VacuumMode::Never => false,
            VacuumMode::Conditional => rows_deleted >= self.vacuum_conditional_threshold,
        };
        if !should_vacuum {
            return Ok(None);
        }
        let reclaimed = db_pool::vacuum(&self.pool, &self.database_path).await?;
        Ok(Some(reclaimed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use taskforge_db::queries::tasks::{self, NewTask};
    use taskforge_db::models::{DependencyType, TaskSource};
    use taskforge_test_utils::create_test_db;

    fn terminal_task(status: TaskStatus, parent: Option<Uuid>) -> NewTask {
        NewTask {
            prompt: "p".into(),
            summary: None,
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            base_priority: 5,
            max_retries: 3,
            max_execution_timeout_seconds: 3600,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: None,
            parent_task_id: parent,
            dependency_depth: 0,
            status,
        }
    }

    #[tokio::test]
    async fn dry_run_deletes_nothing() {
        let db = create_test_db().await;
        tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, None)).await.unwrap();
        let engine = PruneEngine::new(db.pool.clone(), "test.db");

        let cutoff = Utc::now() + ChronoDuration::days(1);
        let report = engine
            .prune_by_filter(&[TaskStatus::Completed], cutoff, None, true, VacuumMode::Never)
            .await
            .unwrap();
        assert_eq!(report.deleted_tasks, 1);

        let status = tasks::queue_status(&db.pool).await.unwrap();
        assert_eq!(status.total, 1);
    }

    #[tokio::test]
    async fn second_identical_run_deletes_zero() {
        let db = create_test_db().await;
        tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, None)).await.unwrap();
        let engine = PruneEngine::new(db.pool.clone(), "test.db");
        let cutoff = Utc::now() + ChronoDuration::days(1);

        let first = engine.prune_by_filter(&[TaskStatus::Completed], cutoff, None, false, VacuumMode::Never).await.unwrap();
        assert_eq!(first.deleted_tasks, 1);

        let second = engine.prune_by_filter(&[TaskStatus::Completed], cutoff, None, false, VacuumMode::Never).await.unwrap();
        assert_eq!(second.deleted_tasks, 0);
    }

    #[tokio::test]
    async fn rejects_non_terminal_status() {
        let db = create_test_db().await;
        let engine = PruneEngine::new(db.pool.clone(), "test.db");
        let result = engine
            .prune_by_filter(&[TaskStatus::Running], Utc::now(), None, false, VacuumMode::Never)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn subtree_prune_requires_all_terminal() {
        let db = create_test_db().await;
        let parent = tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, None)).await.unwrap();
        tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Running, Some(parent.id))).await.unwrap();

        let engine = PruneEngine::new(db.pool.clone(), "test.db");
        let result = engine.prune_subtree(parent.id, false, VacuumMode::Never).await;
        assert!(result.is_err());

        let status = tasks::queue_status(&db.pool).await.unwrap();
        assert_eq!(status.total, 2);
    }

    #[tokio::test]
    async fn subtree_prune_deletes_leaf_first() {
        let db = create_test_db().await;
        let parent = tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, None)).await.unwrap();
        let child = tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, Some(parent.id))).await.unwrap();
        tasks::insert_task(&db.pool, &terminal_task(TaskStatus::Completed, Some(child.id))).await.unwrap();

        let engine = PruneEngine::new(db.pool.clone(), "test.db");
        let report = engine.prune_subtree(parent.id, false, VacuumMode::Never).await.unwrap();
        assert_eq!(report.deleted_tasks, 3);

        let status = tasks::queue_status(&db.pool).await.unwrap();
        assert_eq!(status.total, 0);
    }
}
