//! `taskforge cancel`.

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_core::{DependencyResolver, PriorityCalculator, TaskQueueService};
use uuid::Uuid;

use crate::config::AppConfig;

pub async fn run(pool: &SqlitePool, config: &AppConfig, id: Uuid, reason: Option<&str>) -> Result<()> {
    let service = TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    );
    service.cancel_task(id, reason.unwrap_or("cancelled via CLI")).await?;
    Ok(())
}
