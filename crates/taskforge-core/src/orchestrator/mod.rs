//! Orchestrator: the long-running loop that polls the Store for ready
//! tasks, admits them through the AgentPool, and hands them to the
//! external executor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use taskforge_db::models::Task;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{Executor, ExecutorOutcome};
use crate::pool::AgentPool;
use crate::queue::TaskQueueService;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Stop after this many tasks have been dispatched. `None` runs forever.
    pub task_limit: Option<usize>,
    /// Grace period for in-flight invocations to finish after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            task_limit: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorResult {
    /// Stopped after reaching `task_limit`.
    TaskLimitReached { dispatched: usize },
    /// Stopped by a shutdown signal.
    ShutDown { dispatched: usize },
}

struct InvocationDone {
    task_id: Uuid,
    agent_id: Uuid,
    outcome: Result<ExecutorOutcome>,
}

pub struct Orchestrator {
    queue: Arc<TaskQueueService>,
    pool: Arc<AgentPool>,
    executor: Arc<dyn Executor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(queue: Arc<TaskQueueService>, pool: Arc<AgentPool>, executor: Arc<dyn Executor>, config: OrchestratorConfig) -> Self {
        Self { queue, pool, executor, config }
    }

    /// Run the loop until shutdown is requested or `task_limit` is reached.
    ///
    /// Loop body: attempt a dequeue; pre-increment the in-flight
    /// counter before spawning so a burst of ready tasks can never dispatch
    /// more than `task_limit`; acquire a pool slot or re-queue and back off;
    /// run the executor concurrently; translate the result into a state
    /// transition.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<OrchestratorResult> {
        let (tx, mut rx) = mpsc::channel::<InvocationDone>(64);
        let mut dispatched: usize = 0;
        let mut in_flight: usize = 0;

        loop {
            if shutdown.is_cancelled() {
                self.drain(&mut rx, &mut in_flight).await;
                return Ok(OrchestratorResult::ShutDown { dispatched });
            }
            if let Some(limit) = self.config.task_limit {
                if dispatched >= limit {
                    self.drain(&mut rx, &mut in_flight).await;
                    return Ok(OrchestratorResult::TaskLimitReached { dispatched });
                }
            }

            while let Ok(done) = rx.try_recv() {
                in_flight -= 1;
                self.apply_outcome(done).await;
            }

            let Some(task) = self.queue.get_next_task().await? else {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            };

            dispatched += 1;
            in_flight += 1;

            let Some(agent_id) = self.pool.acquire("orchestrator-worker", Some(&task.agent_type), task.id).await? else {
                taskforge_db::queries::tasks::requeue_ready(self.queue.pool(), task.id).await?;
                in_flight -= 1;
                dispatched -= 1;
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };
            self.pool.mark_busy(agent_id, task.id).await?;

            let task_id = task.id;
            if let Err(err) =
                taskforge_db::queries::state::set_state(self.queue.pool(), task_id, "last_agent_id", Some(&agent_id.to_string())).await
            {
                tracing::warn!(task_id = %task_id, error = %err, "failed to record last_agent_id state");
            }

            self.spawn_invocation(task, agent_id, tx.clone());
        }
    }

    fn spawn_invocation(&self, task: Task, agent_id: Uuid, tx: mpsc::Sender<InvocationDone>) {
        let executor = Arc::clone(&self.executor);
        let pool = Arc::clone(&self.pool);
        let task_id = task.id;

        tokio::spawn(async move {
            let outcome = executor.execute(&task).await;
            let _ = pool.update_activity(agent_id).await;
            let _ = tx.send(InvocationDone { task_id, agent_id, outcome }).await;
        });
    }

    async fn apply_outcome(&self, done: InvocationDone) {
        let result = match done.outcome {
            Ok(ExecutorOutcome::Success { result_data }) => self.queue.complete_task(done.task_id, result_data).await,
            Ok(ExecutorOutcome::Failure { message }) => self.queue.fail_task(done.task_id, &message).await,
            Ok(ExecutorOutcome::Cancelled { reason }) => self.queue.cancel_task(done.task_id, &reason).await,
            Err(err) => self.queue.fail_task(done.task_id, &err.to_string()).await,
        };
        if let Err(err) = result {
            tracing::error!(task_id = %done.task_id, error = %err, "failed to apply executor outcome");
        }
        if let Err(err) = self.pool.release(done.agent_id).await {
            tracing::error!(agent_id = %done.agent_id, error = %err, "failed to release agent slot");
        }
    }

    /// Wait up to `shutdown_grace` for in-flight invocations to report back.
    async fn drain(&self, rx: &mut mpsc::Receiver<InvocationDone>, in_flight: &mut usize) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while *in_flight > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(done)) => {
                    *in_flight -= 1;
                    self.apply_outcome(done).await;
                }
                _ => {
                    tracing::warn!(remaining = *in_flight, "shutdown grace period expired with tasks still in flight");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taskforge_db::models::{DependencyType, TaskSource};
    use taskforge_test_utils::create_test_db;

    use crate::pool::AgentPoolConfig;
    use crate::priority::PriorityCalculator;
    use crate::queue::SubmitRequest;
    use crate::resolver::DependencyResolver;

    struct CountingExecutor {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        fn name(&self) -> &str {
            "counting"
        }
        async fn execute(&self, _task: &Task) -> Result<ExecutorOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutorOutcome::Success { result_data: None })
        }
    }

    #[tokio::test]
    async fn runs_until_task_limit_reached() {
        let db = create_test_db().await;
        let queue = Arc::new(TaskQueueService::new(
            db.pool.clone(),
            DependencyResolver::new(db.pool.clone()),
            PriorityCalculator::default(),
        ));
        for i in 0..3 {
            queue
                .submit_task(SubmitRequest {
                    prompt: format!("task {i}"),
                    summary: None,
                    agent_type: "impl".into(),
                    source: TaskSource::Human,
                    dependency_type: DependencyType::Sequential,
                    base_priority: 5,
                    max_retries: 1,
                    max_execution_timeout_seconds: 60,
                    deadline: None,
                    estimated_duration_seconds: None,
                    input_data: None,
                    parent_task_id: None,
                    dependencies: vec![],
                })
                .await
                .unwrap();
        }

        let pool = Arc::new(AgentPool::new(db.pool.clone(), AgentPoolConfig::default()));
        let executor = Arc::new(CountingExecutor { runs: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(
            queue.clone(),
            pool,
            executor.clone(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(5),
                task_limit: Some(2),
                shutdown_grace: Duration::from_secs(5),
            },
        );

        let shutdown = CancellationToken::new();
        let result = orchestrator.run(shutdown).await.unwrap();
        assert_eq!(result, OrchestratorResult::TaskLimitReached { dispatched: 2 });
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

        let status = queue.queue_status().await.unwrap();
        assert_eq!(status.completed, 2);
    }

    #[tokio::test]
    async fn dispatch_records_last_agent_id_in_state_bag() {
        let db = create_test_db().await;
        let queue = Arc::new(TaskQueueService::new(
            db.pool.clone(),
            DependencyResolver::new(db.pool.clone()),
            PriorityCalculator::default(),
        ));
        let task_id = queue
            .submit_task(SubmitRequest {
                prompt: "task".into(),
                summary: None,
                agent_type: "impl".into(),
                source: TaskSource::Human,
                dependency_type: DependencyType::Sequential,
                base_priority: 5,
                max_retries: 1,
                max_execution_timeout_seconds: 60,
                deadline: None,
                estimated_duration_seconds: None,
                input_data: None,
                parent_task_id: None,
                dependencies: vec![],
            })
            .await
            .unwrap();

        let pool = Arc::new(AgentPool::new(db.pool.clone(), AgentPoolConfig::default()));
        let executor = Arc::new(CountingExecutor { runs: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(
            queue.clone(),
            pool,
            executor,
            OrchestratorConfig {
                poll_interval: Duration::from_millis(5),
                task_limit: Some(1),
                shutdown_grace: Duration::from_secs(5),
            },
        );

        orchestrator.run(CancellationToken::new()).await.unwrap();

        let recorded = taskforge_db::queries::state::get_state(&db.pool, task_id, "last_agent_id").await.unwrap();
        assert!(recorded.is_some());
    }
}
