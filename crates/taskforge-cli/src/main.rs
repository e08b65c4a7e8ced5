mod commands;
mod config;
mod shell_executor;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskforge_core::CoreError;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "taskforge", about = "DAG task-orchestration engine for fleets of externally-spawned worker agents")]
struct Cli {
    /// Path to the SQLite database (overrides TASKFORGE_DATABASE_PATH env var and config file)
    #[arg(long, global = true)]
    database_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new task
    Submit {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 5)]
        priority: i32,
        #[arg(long = "dep")]
        deps: Vec<uuid::Uuid>,
        #[arg(long)]
        deadline: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long, default_value = "human")]
        source: String,
        #[arg(long, default_value = "general")]
        agent_type: String,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long, value_enum, default_value = "sequential")]
        dependency_type: commands::submit::DependencyTypeArg,
        #[arg(long)]
        max_retries: Option<i32>,
        #[arg(long)]
        timeout_seconds: Option<i64>,
        #[arg(long)]
        estimated_duration_seconds: Option<i64>,
        #[arg(long)]
        parent: Option<uuid::Uuid>,
        #[arg(long)]
        input_json: Option<String>,
    },
    /// Dequeue the next ready task and transition it to running
    Next,
    /// Mark a task completed
    Complete {
        id: uuid::Uuid,
        #[arg(long)]
        result_json: Option<String>,
    },
    /// Mark a task failed
    Fail {
        id: uuid::Uuid,
        #[arg(long)]
        error: String,
    },
    /// Cancel a task and its transitive dependents
    Cancel {
        id: uuid::Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Print aggregate queue counters
    Status,
    /// Print the execution plan as grouped parallel batches
    Plan,
    /// Delete terminal tasks matching a filter
    Prune {
        #[command(subcommand)]
        command: Option<commands::prune::PruneSubcommand>,
        #[arg(long, conflicts_with = "before")]
        older_than: Option<String>,
        #[arg(long, conflicts_with = "older_than")]
        before: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long = "status")]
        statuses: Vec<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value = "conditional")]
        vacuum: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Run the Orchestrator loop until shutdown or --task-limit is reached
    Run {
        #[arg(long)]
        max_agents: Option<usize>,
        #[arg(long)]
        poll_interval: Option<u64>,
        #[arg(long)]
        task_limit: Option<usize>,
        /// Binary spawned once per task; defaults to an always-succeeding no-op
        #[arg(long)]
        executor_binary: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.database_path.as_deref());

    let result = run(cli.command, config).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(core_err) = err.downcast_ref::<CoreError>() {
                eprintln!("{}: {}", core_err.tag(), core_err);
                ExitCode::from(core_err.exit_code() as u8)
            } else {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    let db_config = taskforge_db::DbConfig::new(&config.database_path);
    let pool = taskforge_db::create_pool(&db_config).await?;
    taskforge_db::pool::run_migrations(&pool, taskforge_db::pool::default_migrations_path()).await?;

    match command {
        Commands::Submit {
            prompt,
            priority,
            deps,
            deadline,
            source,
            agent_type,
            summary,
            dependency_type,
            max_retries,
            timeout_seconds,
            estimated_duration_seconds,
            parent,
            input_json,
        } => {
            commands::submit::run(
                &pool,
                &config,
                commands::submit::SubmitArgs {
                    prompt,
                    priority,
                    deps,
                    deadline,
                    source,
                    agent_type,
                    summary,
                    dependency_type,
                    max_retries,
                    timeout_seconds,
                    estimated_duration_seconds,
                    parent,
                    input_json,
                },
            )
            .await
        }
        Commands::Next => commands::next::run(&pool, &config).await,
        Commands::Complete { id, result_json } => commands::complete::run(&pool, &config, id, result_json).await,
        Commands::Fail { id, error } => commands::fail::run(&pool, &config, id, &error).await,
        Commands::Cancel { id, reason } => commands::cancel::run(&pool, &config, id, reason.as_deref()).await,
        Commands::Status => commands::status::run(&pool).await,
        Commands::Plan => commands::plan::run(&pool, &config).await,
        Commands::Prune { command, older_than, before, statuses, dry_run, vacuum, limit } => {
            commands::prune::run(
                &pool,
                &config.database_path,
                config.vacuum_conditional_threshold,
                commands::prune::PruneArgs { command, older_than, before, statuses, dry_run, vacuum, limit },
            )
            .await
        }
        Commands::Run { max_agents, poll_interval, task_limit, executor_binary } => {
            commands::run_cmd::run(
                pool,
                Arc::new(config),
                commands::run_cmd::RunArgs { max_agents, poll_interval, task_limit, executor_binary },
            )
            .await
        }
    }
}
