//! `taskforge run`: the long-running Orchestrator loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_core::{
    AgentPool, AgentPoolConfig, DependencyResolver, Executor, FailureRecovery, NoopExecutor, Orchestrator,
    OrchestratorConfig, OrchestratorResult, PriorityCalculator, RecoveryConfig, TaskQueueService,
};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::shell_executor::ShellExecutor;

pub struct RunArgs {
    pub max_agents: Option<usize>,
    pub poll_interval: Option<u64>,
    pub task_limit: Option<usize>,
    pub executor_binary: Option<String>,
}

pub async fn run(pool: SqlitePool, config: Arc<AppConfig>, args: RunArgs) -> Result<()> {
    let queue = Arc::new(TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    ));

    let agent_pool = Arc::new(AgentPool::new(
        pool.clone(),
        AgentPoolConfig {
            max_pool_size: args.max_agents.unwrap_or(config.max_concurrent_agents),
            idle_timeout: config.idle_timeout,
            health_check_interval: config.health_check_interval,
        },
    ));

    let executor: Arc<dyn Executor> = match &args.executor_binary {
        Some(binary) => Arc::new(ShellExecutor::new(binary.clone())),
        None => Arc::new(NoopExecutor),
    };

    let orchestrator_config = OrchestratorConfig {
        poll_interval: args
            .poll_interval
            .map(Duration::from_secs)
            .unwrap_or(config.poll_interval),
        task_limit: args.task_limit,
        shutdown_grace: Duration::from_secs(30),
    };

    let shutdown = CancellationToken::new();

    let health_sweep = Arc::clone(&agent_pool).spawn_health_sweep(shutdown.clone());
    let recovery_sweep = FailureRecovery::spawn(
        Arc::clone(&queue),
        RecoveryConfig {
            sweep_interval: config.stall_detection_interval,
            initial_backoff: config.retry_initial_backoff,
            max_backoff: config.retry_max_backoff,
            backoff_multiplier: config.retry_backoff_multiplier,
            jitter: config.retry_jitter,
        },
        shutdown.clone(),
    );

    let ctrlc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, draining in-flight tasks");
            ctrlc_shutdown.cancel();
        }
    });

    let orchestrator = Orchestrator::new(Arc::clone(&queue), Arc::clone(&agent_pool), executor, orchestrator_config);
    let result = orchestrator.run(shutdown.clone()).await?;

    shutdown.cancel();
    let _ = health_sweep.await;
    let _ = recovery_sweep.await;
    agent_pool.shutdown().await?;

    match result {
        OrchestratorResult::TaskLimitReached { dispatched } => {
            println!("task limit reached after dispatching {dispatched} tasks");
        }
        OrchestratorResult::ShutDown { dispatched } => {
            println!("shut down after dispatching {dispatched} tasks");
        }
    }

    Ok(())
}
