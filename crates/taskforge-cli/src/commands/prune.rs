//! `taskforge prune` / `taskforge prune subtree`.

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use sqlx::SqlitePool;
use taskforge_core::{CoreError, PruneEngine, VacuumMode};
use taskforge_db::models::TaskStatus;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum PruneSubcommand {
    /// Delete the subtree rooted at ID, leaf-first, in one transaction
    Subtree {
        id: Uuid,
        #[arg(long)]
        dry_run: bool,
    },
}

pub struct PruneArgs {
    pub command: Option<PruneSubcommand>,
    pub older_than: Option<String>,
    pub before: Option<DateTime<Utc>>,
    pub statuses: Vec<String>,
    pub dry_run: bool,
    pub vacuum: String,
    pub limit: Option<i64>,
}

fn parse_vacuum_mode(raw: &str) -> Result<VacuumMode> {
    match raw {
        "always" => Ok(VacuumMode::Always),
        "never" => Ok(VacuumMode::Never),
        "conditional" => Ok(VacuumMode::Conditional),
        other => Err(CoreError::validation(format!("unknown --vacuum mode {other:?}; expected always, never, or conditional")).into()),
    }
}

pub async fn run(pool: &SqlitePool, database_path: &std::path::Path, vacuum_conditional_threshold: i64, args: PruneArgs) -> Result<()> {
    let engine = PruneEngine::new(pool.clone(), database_path).with_vacuum_threshold(vacuum_conditional_threshold);
    let vacuum_mode = parse_vacuum_mode(&args.vacuum)?;

    if let Some(PruneSubcommand::Subtree { id, dry_run }) = args.command {
        let report = engine.prune_subtree(id, dry_run, vacuum_mode).await?;
        print_report(&report, dry_run);
        return Ok(());
    }

    let cutoff = match (args.older_than, args.before) {
        (Some(_), Some(_)) => {
            return Err(CoreError::validation("--older-than and --before are mutually exclusive").into());
        }
        (Some(older_than), None) => {
            let parsed = taskforge_core::duration::parse(&older_than)?;
            Utc::now() - chrono::Duration::days(parsed.days)
        }
        (None, Some(before)) => before,
        (None, None) => {
            return Err(CoreError::validation("one of --older-than or --before is required").into());
        }
    };

    let statuses: Vec<TaskStatus> = if args.statuses.is_empty() {
        vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled]
    } else {
        args.statuses
            .iter()
            .map(|s| TaskStatus::from_str(s).map_err(|_| CoreError::validation(format!("unknown status {s:?}"))))
            .collect::<Result<_, _>>()?
    };

    let report = engine.prune_by_filter(&statuses, cutoff, args.limit, args.dry_run, vacuum_mode).await?;
    print_report(&report, args.dry_run);
    Ok(())
}

fn print_report(report: &taskforge_db::queries::prune::PruneReport, dry_run: bool) {
    let verb = if dry_run { "would delete" } else { "deleted" };
    println!("{verb} {} tasks, {} dependency edges", report.deleted_tasks, report.deleted_dependencies);
    for (status, count) in &report.by_status {
        println!("  {status}: {count}");
    }
    if let Some(bytes) = report.reclaimed_bytes {
        println!("reclaimed {bytes} bytes");
    }
}
