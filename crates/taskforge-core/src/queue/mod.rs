//! TaskQueueService: submission, the state-machine edges, cascade semantics,
//! and queue introspection.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use taskforge_db::models::{DependencyType, Task, TaskSource, TaskStatus};
use taskforge_db::queries::{audit, prune, tasks};
use uuid::Uuid;

use crate::error::CoreError;
use crate::priority::PriorityCalculator;
use crate::resolver::DependencyResolver;

/// Whether a transition edge is allowed by the state machine in .
fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Ready)
            | (Pending, Blocked)
            | (Blocked, Ready)
            | (Ready, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Failed, Pending)
            | (Cancelled, Pending)
    ) || (!from.is_terminal() && to == Cancelled)
}

/// Fields accepted by [`TaskQueueService::submit_task`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub prompt: String,
    pub summary: Option<String>,
    pub agent_type: String,
    pub source: TaskSource,
    pub dependency_type: DependencyType,
    pub base_priority: i32,
    pub max_retries: i32,
    pub max_execution_timeout_seconds: i64,
    pub deadline: Option<chrono::DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub input_data: Option<serde_json::Value>,
    pub parent_task_id: Option<Uuid>,
    pub dependencies: Vec<Uuid>,
}

/// Internal-layer summary normalisation: trim whitespace, truncate to 140
/// chars, empty-after-trim becomes `None`. The external-interface layer
/// (CLI argument parsing) is responsible for *rejecting* empty/over-length
/// summaries before ever calling here.
fn normalize_summary(summary: Option<&str>) -> Option<String> {
    let trimmed = summary?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(140).collect())
}

pub struct TaskQueueService {
    pool: SqlitePool,
    resolver: DependencyResolver,
    priority: PriorityCalculator,
}

impl TaskQueueService {
    pub fn new(pool: SqlitePool, resolver: DependencyResolver, priority: PriorityCalculator) -> Self {
        Self { pool, resolver, priority }
    }

    /// Validate dependencies, insert the task and its edges, compute initial
    /// depth and priority, and transition directly to `ready` or `blocked`.
    pub async fn submit_task(&self, req: SubmitRequest) -> Result<Uuid> {
        if req.max_execution_timeout_seconds < 60 {
            return Err(CoreError::validation("max_execution_timeout_seconds must be >= 60").into());
        }
        if !(0..=10).contains(&req.base_priority) {
            return Err(CoreError::validation("base_priority must be in [0, 10]").into());
        }

        for dep in &req.dependencies {
            let Some(_) = tasks::get_task(&self.pool, *dep).await? else {
                return Err(CoreError::validation(format!("missing prerequisite {dep}")).into());
            };
        }

        let status = if req.dependencies.is_empty() {
            TaskStatus::Ready
        } else {
            TaskStatus::Blocked
        };

        let mut max_depth = 0;
        for dep in &req.dependencies {
            let d = self.resolver.dependency_depth(*dep).await?;
            max_depth = max_depth.max(d);
        }
        let dependency_depth = if req.dependencies.is_empty() { 0 } else { max_depth + 1 };

        let new = tasks::NewTask {
            prompt: req.prompt,
            summary: normalize_summary(req.summary.as_deref()),
            agent_type: req.agent_type,
            source: req.source,
            dependency_type: req.dependency_type,
            base_priority: req.base_priority,
            max_retries: req.max_retries,
            max_execution_timeout_seconds: req.max_execution_timeout_seconds,
            deadline: req.deadline,
            estimated_duration_seconds: req.estimated_duration_seconds,
            input_data: req.input_data,
            parent_task_id: req.parent_task_id,
            dependency_depth,
            status,
        };

        let task = tasks::insert_task(&self.pool, &new).await?;

        for dep in &req.dependencies {
            if self.resolver.would_create_cycle(task.id, *dep).await? {
                // The task row exists but has no dependents yet, so it is
                // safe to delete outright rather than route through prune.
                prune::delete_tasks(&self.pool, &[task.id]).await.ok();
                return Err(CoreError::validation(format!(
                    "dependency on {dep} would create a cycle"
                ))
                .into());
            }
            tasks::insert_dependency(&self.pool, task.id, *dep, req.dependency_type).await?;
        }

        let priority = self
            .priority
            .score_with_resolver(&task, &self.resolver, Utc::now())
            .await?;
        tasks::update_priority(&self.pool, task.id, priority, dependency_depth).await?;

        audit::log_audit(
            &self.pool,
            Some(task.id),
            None,
            "task_submitted",
            Some(&json!({ "agent_type": task.agent_type, "priority": task.base_priority, "status": status.to_string() })),
            "ok",
        )
        .await
        .ok();

        Ok(task.id)
    }

    /// Delegate to the Store's atomic dequeue.
    pub async fn get_next_task(&self) -> Result<Option<Task>> {
        tasks::dequeue_next_task(&self.pool).await
    }

    /// Terminal transition to `completed`; unblock dependents whose
    /// prerequisites are now all satisfied. Idempotent.
    pub async fn complete_task(&self, id: Uuid, result_data: Option<serde_json::Value>) -> Result<()> {
        let Some(task) = tasks::get_task(&self.pool, id).await? else {
            return Err(CoreError::not_found("task", id).into());
        };
        if task.status == TaskStatus::Completed {
            return Ok(());
        }

        let rows = tasks::transition_task_status(&self.pool, id, TaskStatus::Running, TaskStatus::Completed, None).await?;
        if rows == 0 {
            // Already transitioned concurrently, or not in `running`: treat
            // as idempotent if it's already terminal, otherwise surface.
            let current = tasks::get_task(&self.pool, id).await?.unwrap();
            if current.status.is_terminal() {
                return Ok(());
            }
            return Err(CoreError::invariant(format!(
                "task {id} expected status running, found {}",
                current.status
            ))
            .into());
        }

        if let Some(data) = result_data {
            tasks::set_result_data(&self.pool, id, &data).await?;
        }
        tasks::resolve_dependency_edges_for(&self.pool, id).await?;
        self.resolver.invalidate(id);

        for dependent_id in self.resolver.direct_dependents(id).await? {
            self.resolver.invalidate(dependent_id);
            let Some(dependent) = tasks::get_task(&self.pool, dependent_id).await? else { continue };
            if dependent.status != TaskStatus::Blocked {
                continue;
            }
            if self.resolver.is_ready(dependent_id).await? {
                tasks::transition_task_status(&self.pool, dependent_id, TaskStatus::Blocked, TaskStatus::Ready, None).await?;
                let refreshed = tasks::get_task(&self.pool, dependent_id).await?.unwrap();
                let priority = self
                    .priority
                    .score_with_resolver(&refreshed, &self.resolver, Utc::now())
                    .await?;
                tasks::update_priority(&self.pool, dependent_id, priority, refreshed.dependency_depth).await?;
            }
        }

        audit::log_audit(&self.pool, Some(id), None, "task_completed", None, "ok").await.ok();
        Ok(())
    }

    /// Record a failure. Retries remaining: leave `failed` for
    /// `FailureRecovery`'s backoff sweep. Retries exhausted: cascade-cancel
    /// every transitive dependent.
    pub async fn fail_task(&self, id: Uuid, error: &str) -> Result<()> {
        let Some(task) = tasks::get_task(&self.pool, id).await? else {
            return Err(CoreError::not_found("task", id).into());
        };
        if task.status.is_terminal() {
            return Ok(());
        }

        tasks::transition_task_status(&self.pool, id, task.status, TaskStatus::Failed, Some(error)).await?;
        self.resolver.invalidate(id);

        audit::log_audit(
            &self.pool,
            Some(id),
            None,
            "task_failed",
            Some(&json!({ "error": error, "retry_count": task.retry_count, "max_retries": task.max_retries })),
            "failed",
        )
        .await
        .ok();

        if task.retry_count >= task.max_retries {
            self.cascade_cancel_dependents(id, &format!("prerequisite {id} permanently failed")).await?;
        }

        Ok(())
    }

    /// Transition to `cancelled` and cascade to transitive dependents.
    /// Cancelling a `running` task is a cooperative signal only: the
    /// Orchestrator observes the state change at its next status check
    /// rather than aborting the in-flight invocation.
    pub async fn cancel_task(&self, id: Uuid, reason: &str) -> Result<()> {
        let Some(task) = tasks::get_task(&self.pool, id).await? else {
            return Err(CoreError::not_found("task", id).into());
        };
        if task.status.is_terminal() {
            return Ok(());
        }

        tasks::transition_task_status(&self.pool, id, task.status, TaskStatus::Cancelled, Some(reason)).await?;
        self.resolver.invalidate(id);

        audit::log_audit(&self.pool, Some(id), None, "task_cancelled", Some(&json!({ "reason": reason })), "cancelled")
            .await
            .ok();

        self.cascade_cancel_dependents(id, &format!("prerequisite {id} was cancelled: {reason}")).await?;
        Ok(())
    }

    /// Visit transitive dependents in topological order (closest first) so a
    /// task never observes a dependent already terminal before itself.
    async fn cascade_cancel_dependents(&self, root: Uuid, reason: &str) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(root);
        let mut visited = std::collections::HashSet::new();
        visited.insert(root);

        while let Some(current) = queue.pop_front() {
            for dependent_id in self.resolver.direct_dependents(current).await? {
                if !visited.insert(dependent_id) {
                    continue;
                }
                let Some(dependent) = tasks::get_task(&self.pool, dependent_id).await? else { continue };
                if dependent.status.is_terminal() {
                    continue;
                }
                tasks::transition_task_status(&self.pool, dependent_id, dependent.status, TaskStatus::Cancelled, Some(reason)).await?;
                self.resolver.invalidate(dependent_id);
                audit::log_audit(
                    &self.pool,
                    Some(dependent_id),
                    None,
                    "task_cascaded_cancel",
                    Some(&json!({ "root": root.to_string(), "reason": reason })),
                    "cancelled",
                )
                .await
                .ok();
                queue.push_back(dependent_id);
            }
        }
        Ok(())
    }

    /// Only callable from `failed` or `cancelled`. Resets status to
    /// `pending` and re-runs the readiness check, as in `submit_task`.
    /// `retry_count` is owned by `FailureRecovery`; this never touches it.
    pub async fn retry_task(&self, id: Uuid) -> Result<()> {
        let Some(task) = tasks::get_task(&self.pool, id).await? else {
            return Err(CoreError::not_found("task", id).into());
        };
        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(CoreError::validation(format!(
                "task {id} is {}; retry only valid from failed or cancelled",
                task.status
            ))
            .into());
        }

        let rows = tasks::transition_task_status(&self.pool, id, task.status, TaskStatus::Pending, None).await?;
        if rows == 0 {
            return Err(CoreError::invariant(format!("task {id} status changed concurrently")).into());
        }
        self.resolver.invalidate(id);

        let target = if self.resolver.is_ready(id).await? { TaskStatus::Ready } else { TaskStatus::Blocked };
        tasks::transition_task_status(&self.pool, id, TaskStatus::Pending, target, None).await?;

        audit::log_audit(&self.pool, Some(id), None, "task_retried", None, "ok").await.ok();
        Ok(())
    }

    /// Used only by `FailureRecovery` when a stalled `running` task has
    /// retries remaining: move it back to `pending` and re-run the same
    /// readiness check `retry_task` uses, without touching `retry_count`
    /// (the caller already incremented it).
    pub(crate) async fn reenter_from_running(&self, id: Uuid) -> Result<()> {
        let rows = tasks::transition_task_status(&self.pool, id, TaskStatus::Running, TaskStatus::Pending, None).await?;
        if rows == 0 {
            return Err(CoreError::invariant(format!("task {id} status changed concurrently")).into());
        }
        self.resolver.invalidate(id);
        let target = if self.resolver.is_ready(id).await? { TaskStatus::Ready } else { TaskStatus::Blocked };
        tasks::transition_task_status(&self.pool, id, TaskStatus::Pending, target, None).await?;
        Ok(())
    }

    /// Only `FailureRecovery` calls this -- it owns `retry_count`.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Aggregate counts by status, average priority, max depth.
    pub async fn queue_status(&self) -> Result<tasks::QueueStatus> {
        tasks::queue_status(&self.pool).await
    }

    /// Topological sort of currently non-terminal tasks, grouped into
    /// parallel-executable batches (Kahn's algorithm, layered).
    pub async fn execution_plan(&self) -> Result<Vec<Vec<Task>>> {
        let pending_tasks = tasks::list_non_terminal_tasks(&self.pool).await?;
        let ids: Vec<Uuid> = pending_tasks.iter().map(|t| t.id).collect();
        let edges = tasks::get_dependencies_for_tasks(&self.pool, &ids).await?;

        let mut in_degree: HashMap<Uuid, usize> = ids.iter().map(|id| (*id, 0)).collect();
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let id_set: std::collections::HashSet<Uuid> = ids.iter().copied().collect();

        for (dependent, prerequisite) in &edges {
            if id_set.contains(prerequisite) && id_set.contains(dependent) {
                *in_degree.entry(*dependent).or_insert(0) += 1;
                dependents.entry(*prerequisite).or_default().push(*dependent);
            }
        }

        let by_id: HashMap<Uuid, Task> = pending_tasks.into_iter().map(|t| (t.id, t)).collect();
        let mut remaining = in_degree;
        let mut levels = Vec::new();

        loop {
            let ready: Vec<Uuid> = remaining
                .iter()
                .filter(|(_, deg)| **deg == 0)
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in &ready {
                remaining.remove(id);
            }
            let mut batch: Vec<Task> = ready.iter().filter_map(|id| by_id.get(id).cloned()).collect();
            batch.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
            for id in &ready {
                if let Some(next) = dependents.get(id) {
                    for n in next {
                        if let Some(deg) = remaining.get_mut(n) {
                            *deg = deg.saturating_sub(1);
                        }
                    }
                }
            }
            levels.push(batch);
        }

        Ok(levels)
    }
}
