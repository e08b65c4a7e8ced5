//! The `Executor` trait -- the adapter interface to the externally-spawned
//! agent process that actually runs a task.
//!
//! The orchestration kernel never spawns or talks to an LLM itself; it
//! hands a [`Task`] to whatever implements this trait and translates the
//! returned [`ExecutorOutcome`] into a state transition. The trait is
//! object-safe so it can be stored as `Arc<dyn Executor>` in the
//! [`crate::orchestrator::Orchestrator`].

use anyhow::Result;
use async_trait::async_trait;
use taskforge_db::models::Task;

/// The result of handing a task to the external executor.
#[derive(Debug, Clone)]
pub enum ExecutorOutcome {
    /// The agent finished the task successfully.
    Success { result_data: Option<serde_json::Value> },
    /// The agent reported a failure. `message` is classified transient vs
    /// permanent by [`crate::error::is_transient_error`].
    Failure { message: String },
    /// The agent observed a cooperative cancellation signal mid-run.
    Cancelled { reason: String },
}

/// Adapter interface for running a task on an externally-spawned agent.
///
/// # Object Safety
///
/// Every method returns a concrete or boxed type, so `Box<dyn Executor>` /
/// `Arc<dyn Executor>` are both usable.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable name (for logging and the `agents.specialization` column).
    fn name(&self) -> &str;

    /// Run `task` to completion or failure. Implementations should
    /// periodically touch the bound agent's activity clock via
    /// [`crate::pool::AgentPool::update_activity`] for long-running work,
    /// though the kernel relies on `FailureRecovery`'s stall sweep rather
    /// than racing a per-task timer against this call.
    async fn execute(&self, task: &Task) -> Result<ExecutorOutcome>;
}

/// An executor that always succeeds immediately with no result payload.
/// Useful for tests and for `taskforge run --dry-run`-style smoke checks.
pub struct NoopExecutor;

#[async_trait]
impl Executor for NoopExecutor {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _task: &Task) -> Result<ExecutorOutcome> {
        Ok(ExecutorOutcome::Success { result_data: None })
    }
}

// Compile-time assertion: Executor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_db::models::{DependencyType, TaskSource, TaskStatus};
    use uuid::Uuid;

    fn sample_task() -> Task {
        let now = chrono::Utc::now();
        Task {
            id: Uuid::new_v4(),
            summary: None,
            prompt: "do work".into(),
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            status: TaskStatus::Running,
            base_priority: 5,
            calculated_priority: 0.0,
            input_data: None,
            result_data: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            max_execution_timeout_seconds: 3600,
            submitted_at: now,
            started_at: Some(now),
            completed_at: None,
            failed_at: None,
            last_updated_at: now,
            parent_task_id: None,
            deadline: None,
            estimated_duration_seconds: None,
            dependency_depth: 0,
        }
    }

    #[tokio::test]
    async fn noop_executor_always_succeeds() {
        let executor: Box<dyn Executor> = Box::new(NoopExecutor);
        let task = sample_task();
        match executor.execute(&task).await.unwrap() {
            ExecutorOutcome::Success { result_data } => assert!(result_data.is_none()),
            other => panic!("expected Success, got {other:?}"),
        }
    }
}
