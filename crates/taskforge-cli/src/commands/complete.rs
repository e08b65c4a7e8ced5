//! `taskforge complete`.

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_core::{CoreError, DependencyResolver, PriorityCalculator, TaskQueueService};
use uuid::Uuid;

use crate::config::AppConfig;

pub async fn run(pool: &SqlitePool, config: &AppConfig, id: Uuid, result_json: Option<String>) -> Result<()> {
    let result_data = match result_json {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| CoreError::validation(format!("invalid --result-json: {e}")))?,
        ),
        None => None,
    };

    let service = TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    );
    service.complete_task(id, result_data).await?;
    Ok(())
}
