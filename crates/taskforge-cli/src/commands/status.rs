//! `taskforge status`: aggregate queue counters.

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_db::queries::tasks;

pub async fn run(pool: &SqlitePool) -> Result<()> {
    let status = tasks::queue_status(pool).await?;

    println!("total:             {}", status.total);
    println!("pending:           {}", status.pending);
    println!("blocked:           {}", status.blocked);
    println!("ready:             {}", status.ready);
    println!("running:           {}", status.running);
    println!("completed:         {}", status.completed);
    println!("failed:            {}", status.failed);
    println!("cancelled:         {}", status.cancelled);
    println!("average_priority:  {:.3}", status.average_priority);
    println!("max_depth:         {}", status.max_depth);

    Ok(())
}
