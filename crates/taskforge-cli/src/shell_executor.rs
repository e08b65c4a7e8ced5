//! Shell executor: runs a task's prompt through an externally-configured
//! command and translates its exit status into an [`ExecutorOutcome`].
//!
//! This is the default, agent-agnostic adapter for `taskforge run`: it
//! spawns `<binary> <task.prompt>`, feeds the task's `input_data` (if any)
//! on stdin as JSON, waits for the process to exit, and captures stdout as
//! the result payload. Unlike a streaming multi-turn agent harness, this
//! contract is one-shot: spawn, wait, translate -- there is no mid-run
//! event stream or cooperative-cancel channel, since `Executor` doesn't
//! expose one.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use taskforge_db::models::Task;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use taskforge_core::{Executor, ExecutorOutcome};

/// Runs each task by spawning a configured binary and passing the task's
/// prompt as its sole argument.
pub struct ShellExecutor {
    binary_path: String,
}

impl ShellExecutor {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self { binary_path: binary_path.into() }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        &self.binary_path
    }

    async fn execute(&self, task: &Task) -> Result<ExecutorOutcome> {
        let mut child = Command::new(&self.binary_path)
            .arg(&task.prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn executor binary {}", self.binary_path))?;

        if let Some(input) = &task.input_data {
            if let Some(mut stdin) = child.stdin.take() {
                let payload = serde_json::to_vec(input)?;
                stdin.write_all(&payload).await.ok();
            }
        } else {
            // Dropping stdin without writing closes it, so a binary
            // blocked on reading never hangs forever.
            drop(child.stdin.take());
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("executor binary {} did not exit cleanly", self.binary_path))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let result_data = serde_json::from_str::<serde_json::Value>(stdout.trim())
                .unwrap_or_else(|_| json!({ "stdout": stdout.trim() }));
            Ok(ExecutorOutcome::Success { result_data: Some(result_data) })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("executor exited with status {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            Ok(ExecutorOutcome::Failure { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskforge_db::models::{DependencyType, TaskSource, TaskStatus};
    use uuid::Uuid;

    fn sample_task(prompt: &str, input_data: Option<serde_json::Value>) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            summary: None,
            prompt: prompt.into(),
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            status: TaskStatus::Running,
            base_priority: 5,
            calculated_priority: 0.0,
            input_data,
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
    async fn successful_exit_yields_success_outcome() {
        let executor = ShellExecutor::new("true");
        let task = sample_task("irrelevant", None);
        match executor.execute(&task).await.unwrap() {
            ExecutorOutcome::Success { .. } => {}
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_yields_failure_outcome() {
        let executor = ShellExecutor::new("false");
        let task = sample_task("irrelevant", None);
        match executor.execute(&task).await.unwrap() {
            ExecutorOutcome::Failure { .. } => {}
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let executor = ShellExecutor::new("definitely-not-a-real-binary-xyz");
        let task = sample_task("irrelevant", None);
        assert!(executor.execute(&task).await.is_err());
    }
}
