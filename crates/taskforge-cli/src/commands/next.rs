//! `taskforge next`: dequeue and transition to `running`.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use taskforge_core::{DependencyResolver, PriorityCalculator, TaskQueueService};

use crate::config::AppConfig;

pub async fn run(pool: &SqlitePool, config: &AppConfig) -> Result<()> {
    let service = TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    );

    let Some(task) = service.get_next_task().await? else {
        bail!("no ready task available");
    };

    println!("{}", task.id);
    Ok(())
}
