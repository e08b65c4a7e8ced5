//! `taskforge submit`.

use std::str::FromStr;

use anyhow::Result;
use clap::ValueEnum;
use sqlx::SqlitePool;
use taskforge_core::{CoreError, DependencyResolver, PriorityCalculator, SubmitRequest, TaskQueueService};
use taskforge_db::models::{DependencyType, TaskSource};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DependencyTypeArg {
    Sequential,
    Parallel,
}

impl From<DependencyTypeArg> for DependencyType {
    fn from(value: DependencyTypeArg) -> Self {
        match value {
            DependencyTypeArg::Sequential => DependencyType::Sequential,
            DependencyTypeArg::Parallel => DependencyType::Parallel,
        }
    }
}

pub struct SubmitArgs {
    pub prompt: String,
    pub priority: i32,
    pub deps: Vec<Uuid>,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub source: String,
    pub agent_type: String,
    pub summary: Option<String>,
    pub dependency_type: DependencyTypeArg,
    pub max_retries: Option<i32>,
    pub timeout_seconds: Option<i64>,
    pub estimated_duration_seconds: Option<i64>,
    pub parent: Option<Uuid>,
    pub input_json: Option<String>,
}

pub async fn run(pool: &SqlitePool, config: &AppConfig, args: SubmitArgs) -> Result<()> {
    if let Some(summary) = &args.summary {
        let trimmed = summary.trim();
        if trimmed.is_empty() {
            return Err(CoreError::validation("summary must not be empty after trimming").into());
        }
        if trimmed.len() > 140 {
            return Err(CoreError::validation("summary must be at most 140 characters").into());
        }
    }

    let source = TaskSource::from_str(&args.source)
        .map_err(|_| CoreError::validation(format!("unknown source {:?}", args.source)))?;

    let input_data = match args.input_json {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| CoreError::validation(format!("invalid --input-json: {e}")))?,
        ),
        None => None,
    };

    let service = TaskQueueService::new(
        pool.clone(),
        DependencyResolver::with_ttl(pool.clone(), config.priority_resolver_cache_ttl),
        PriorityCalculator::new(config.priority_weights),
    );

    let id = service
        .submit_task(SubmitRequest {
            prompt: args.prompt,
            summary: args.summary,
            agent_type: args.agent_type,
            source,
            dependency_type: args.dependency_type.into(),
            base_priority: args.priority,
            max_retries: args.max_retries.unwrap_or(config.max_retries_default),
            max_execution_timeout_seconds: args.timeout_seconds.unwrap_or(3600),
            deadline: args.deadline,
            estimated_duration_seconds: args.estimated_duration_seconds,
            input_data,
            parent_task_id: args.parent,
            dependencies: args.deps,
        })
        .await?;

    println!("{id}");
    Ok(())
}
