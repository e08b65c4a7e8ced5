//! `taskforge plan`: the execution plan as grouped parallel batches.

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_core::{DependencyResolver, PriorityCalculator, TaskQueueService};

use crate::config::AppConfig;

pub async fn run(pool: &SqlitePool, config: &AppConfig) -> Result<()> {
    let service = TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    );

    let plan = service.execution_plan().await?;
    for (i, batch) in plan.iter().enumerate() {
        println!("batch {i}:");
        for task in batch {
            println!("  {} [{}] {}", task.id, task.status, truncate(&task.prompt, 60));
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max).collect();
        t.push('…');
        t
    }
}
