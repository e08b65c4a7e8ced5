//! FailureRecovery: the periodic sweeper for stalled `running` tasks and
//! backoff-eligible `failed`/`cancelled` tasks.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use taskforge_db::models::Task;
use taskforge_db::queries::tasks;

use crate::error::is_transient_error;
use crate::queue::TaskQueueService;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub sweep_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Counts from one sweep pass, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub stalled_requeued: usize,
    pub stalled_permanently_failed: usize,
    pub retried: usize,
}

pub struct FailureRecovery<'a> {
    queue: &'a TaskQueueService,
    config: RecoveryConfig,
}

impl<'a> FailureRecovery<'a> {
    pub fn new(queue: &'a TaskQueueService, config: RecoveryConfig) -> Self {
        Self { queue, config }
    }

    /// Backoff duration for a task currently at `retry_count` retries,
    /// before jitter: `initial · multiplier ^ retry_count`, capped at
    /// `max_backoff`.
    fn backoff_for(&self, retry_count: i32) -> Duration {
        let scaled = self.config.initial_backoff.as_secs_f64() * self.config.backoff_multiplier.powi(retry_count);
        Duration::from_secs_f64(scaled.min(self.config.max_backoff.as_secs_f64()))
    }

    /// Apply up to 20% jitter, added on top of the base backoff.
    fn with_jitter(&self, base: Duration) -> Duration {
        if !self.config.jitter {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(0.0..0.2);
        base + Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Run one full sweep: stalled `running` tasks, then backoff-eligible
    /// terminal tasks.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let stale = tasks::get_stale_running_tasks(self.queue.pool()).await?;
        for task in stale {
            self.handle_stale_task(&task, &mut report).await?;
        }

        let retryable = tasks::get_retryable_terminal_tasks(self.queue.pool()).await?;
        for task in retryable {
            if self.backoff_elapsed(&task) {
                self.handle_retryable_task(&task, &mut report).await?;
            }
        }

        Ok(report)
    }

    async fn handle_stale_task(&self, task: &Task, report: &mut SweepReport) -> Result<()> {
        let rows = tasks::increment_retry_count(self.queue.pool(), task.id, task.retry_count).await?;
        if rows == 0 {
            // Lost a race with another sweep or a concurrent transition; skip.
            return Ok(());
        }

        if task.retry_count + 1 > task.max_retries {
            self.queue
                .fail_task(task.id, &format!("task stalled: exceeded max_execution_timeout_seconds of {}s", task.max_execution_timeout_seconds))
                .await?;
            report.stalled_permanently_failed += 1;
        } else {
            self.queue.reenter_from_running(task.id).await?;
            report.stalled_requeued += 1;
        }
        Ok(())
    }

    /// Whether enough time has elapsed since `failed_at` (falling back to
    /// `last_updated_at` if unset) to satisfy the exponential backoff for
    /// this task's current `retry_count`.
    fn backoff_elapsed(&self, task: &Task) -> bool {
        let since = task.failed_at.unwrap_or(task.last_updated_at);
        let elapsed = Utc::now() - since;
        let Ok(elapsed) = elapsed.to_std() else { return true };
        elapsed >= self.with_jitter(self.backoff_for(task.retry_count))
    }

    async fn handle_retryable_task(&self, task: &Task, report: &mut SweepReport) -> Result<()> {
        if let Some(error) = &task.error_message {
            if !is_transient_error(error) {
                return Ok(());
            }
        }

        let rows = tasks::increment_retry_count(self.queue.pool(), task.id, task.retry_count).await?;
        if rows == 0 {
            return Ok(());
        }
        self.queue.retry_task(task.id).await?;
        report.retried += 1;
        Ok(())
    }

    /// Spawn the periodic sweep as a background task. Runs until
    /// `shutdown_signal` resolves.
    pub fn spawn(
        queue: std::sync::Arc<TaskQueueService>,
        config: RecoveryConfig,
        shutdown_signal: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let recovery_config = config.clone();
            let mut ticker = tokio::time::interval(config.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let recovery = FailureRecovery::new(&queue, recovery_config.clone());
                        match recovery.sweep_once().await {
                            Ok(report) if report == SweepReport::default() => {}
                            Ok(report) => tracing::info!(?report, "failure recovery sweep"),
                            Err(err) => tracing::error!(error = %err, "failure recovery sweep failed"),
                        }
                    }
                    _ = shutdown_signal.cancelled() => {
                        tracing::info!("failure recovery sweep stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_db::models::{DependencyType, TaskSource, TaskStatus};
    use taskforge_db::queries::tasks::NewTask;
    use taskforge_test_utils::create_test_db;

    use crate::priority::PriorityCalculator;
    use crate::resolver::DependencyResolver;

    fn queue_service(pool: sqlx::SqlitePool) -> TaskQueueService {
        TaskQueueService::new(pool.clone(), DependencyResolver::new(pool), PriorityCalculator::default())
    }

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            sweep_interval: Duration::from_millis(10),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn stalled_task_with_retries_remaining_goes_back_to_ready() {
        let db = create_test_db().await;
        let queue = queue_service(db.pool.clone());
        let new = NewTask {
            prompt: "p".into(),
            summary: None,
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            base_priority: 5,
            max_retries: 3,
            max_execution_timeout_seconds: 60,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: None,
            parent_task_id: None,
            dependency_depth: 0,
            status: TaskStatus::Ready,
        };
        let task = tasks::insert_task(&db.pool, &new).await.unwrap();
        tasks::transition_task_status(&db.pool, task.id, TaskStatus::Ready, TaskStatus::Running, None).await.unwrap();
        // Force staleness by setting last_updated_at far in the past.
        sqlx::query("UPDATE tasks SET last_updated_at = datetime('now', '-1 hour') WHERE id = ?")
            .bind(task.id)
            .execute(&db.pool)
            .await
            .unwrap();

        let recovery = FailureRecovery::new(&queue, fast_config());
        let report = recovery.sweep_once().await.unwrap();
        assert_eq!(report.stalled_requeued, 1);

        let refreshed = tasks::get_task(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TaskStatus::Ready);
        assert_eq!(refreshed.retry_count, 1);
    }

    #[tokio::test]
    async fn stalled_task_exhausting_retries_permanently_fails() {
        let db = create_test_db().await;
        let queue = queue_service(db.pool.clone());
        let new = NewTask {
            prompt: "p".into(),
            summary: None,
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            base_priority: 5,
            max_retries: 0,
            max_execution_timeout_seconds: 60,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: None,
            parent_task_id: None,
            dependency_depth: 0,
            status: TaskStatus::Ready,
        };
        let task = tasks::insert_task(&db.pool, &new).await.unwrap();
        tasks::transition_task_status(&db.pool, task.id, TaskStatus::Ready, TaskStatus::Running, None).await.unwrap();
        sqlx::query("UPDATE tasks SET last_updated_at = datetime('now', '-1 hour') WHERE id = ?")
            .bind(task.id)
            .execute(&db.pool)
            .await
            .unwrap();

        let recovery = FailureRecovery::new(&queue, fast_config());
        let report = recovery.sweep_once().await.unwrap();
        assert_eq!(report.stalled_permanently_failed, 1);

        let refreshed = tasks::get_task(&db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn permanent_error_is_never_retried() {
        let db = create_test_db().await;
        let queue = queue_service(db.pool.clone());
        let id = queue
            .submit_task(crate::queue::SubmitRequest {
                prompt: "p".into(),
                summary: None,
                agent_type: "impl".into(),
                source: TaskSource::Human,
                dependency_type: DependencyType::Sequential,
                base_priority: 5,
                max_retries: 3,
                max_execution_timeout_seconds: 60,
                deadline: None,
                estimated_duration_seconds: None,
                input_data: None,
                parent_task_id: None,
                dependencies: vec![],
            })
            .await
            .unwrap();
        tasks::transition_task_status(&db.pool, id, TaskStatus::Ready, TaskStatus::Running, None).await.unwrap();
        queue.fail_task(id, "invalid syntax in prompt template").await.unwrap();

        let recovery = FailureRecovery::new(&queue, fast_config());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = recovery.sweep_once().await.unwrap();
        assert_eq!(report.retried, 0);

        let refreshed = tasks::get_task(&db.pool, id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TaskStatus::Failed);
    }
}
