//! Database query functions for the `agents` table -- the AgentPool's
//! persisted view of registered workers.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{Agent, AgentState};

/// Register a new agent in `spawning` state.
pub async fn insert_agent(
    pool: &SqlitePool,
    name: &str,
    specialization: Option<&str>,
) -> Result<Agent> {
    let now = Utc::now();
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (id, name, specialization, state, spawned_at, last_activity_at) \
         VALUES (?, ?, ?, 'spawning', ?, ?) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(specialization)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to insert agent")?;

    Ok(agent)
}

/// Fetch a single agent by id.
pub async fn get_agent(pool: &SqlitePool, id: Uuid) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;
    Ok(agent)
}

/// Transition an agent's state and, when binding it to a task, set `task_id`.
pub async fn update_agent_state(
    pool: &SqlitePool,
    id: Uuid,
    state: AgentState,
    task_id: Option<Uuid>,
) -> Result<()> {
    let now = Utc::now();
    let terminated_at = matches!(state, AgentState::Terminated).then_some(now);

    sqlx::query(
        "UPDATE agents \
         SET state = ?, task_id = ?, last_activity_at = ?, \
             terminated_at = COALESCE(?, terminated_at) \
         WHERE id = ?",
    )
    .bind(state)
    .bind(task_id)
    .bind(now)
    .bind(terminated_at)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update agent state")?;

    Ok(())
}

/// Touch an agent's last-activity timestamp (heartbeat).
pub async fn touch_agent_activity(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE agents SET last_activity_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to touch agent activity")?;
    Ok(())
}

/// Agents whose `last_activity_at` is older than `idle_timeout_seconds` and
/// whose state is not already `terminated` -- candidates for the health
/// sweep's forced release.
pub async fn get_idle_agents(pool: &SqlitePool, idle_timeout_seconds: i64) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>(
        "SELECT * FROM agents \
         WHERE state != 'terminated' \
           AND (unixepoch('now') - unixepoch(last_activity_at)) > ?",
    )
    .bind(idle_timeout_seconds)
    .fetch_all(pool)
    .await
    .context("failed to fetch idle agents")?;
    Ok(agents)
}

/// All agents not yet terminated (used by `shutdown()` to release everything).
pub async fn list_active_agents(pool: &SqlitePool) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE state != 'terminated'")
        .fetch_all(pool)
        .await
        .context("failed to list active agents")?;
    Ok(agents)
}

/// Counts by agent state, for `AgentPool::stats()`.
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub spawning: i64,
    pub idle: i64,
    pub busy: i64,
    pub terminating: i64,
    pub terminated: i64,
}

pub async fn agent_stats(pool: &SqlitePool) -> Result<AgentStats> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) as cnt FROM agents GROUP BY state")
            .fetch_all(pool)
            .await
            .context("failed to aggregate agent stats")?;

    let mut stats = AgentStats::default();
    for (state, count) in &rows {
        match state.as_str() {
            "spawning" => stats.spawning = *count,
            "idle" => stats.idle = *count,
            "busy" => stats.busy = *count,
            "terminating" => stats.terminating = *count,
            "terminated" => stats.terminated = *count,
            _ => {}
        }
    }
    Ok(stats)
}
