//! AgentPool: the bounded-concurrency primitive. A best-effort,
//! non-blocking `acquire` gates how many agents can be registered as
//! `busy` at once; a background sweep releases agents that stop reporting
//! activity.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_db::models::AgentState;
use taskforge_db::queries::agents::{self, AgentStats};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AgentPoolConfig {
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 8,
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Bounded concurrency of `max_pool_size` slots. Acquire/release is the
/// only mutex in the hot path; all other methods are safe for
/// concurrent access and the sweep runs independently.
pub struct AgentPool {
    pool: SqlitePool,
    config: AgentPoolConfig,
    occupied: Mutex<HashSet<Uuid>>,
}

impl AgentPool {
    pub fn new(pool: SqlitePool, config: AgentPoolConfig) -> Self {
        Self { pool, config, occupied: Mutex::new(HashSet::new()) }
    }

    /// Non-blocking best-effort slot acquisition. Registers the agent in
    /// the Store (`spawning` -> `idle`) and consumes one slot, or returns
    /// `None` if the pool is full.
    pub async fn acquire(&self, name: &str, specialization: Option<&str>, task_id: Uuid) -> Result<Option<Uuid>> {
        {
            let mut occupied = self.occupied.lock().unwrap();
            if occupied.len() >= self.config.max_pool_size {
                return Ok(None);
            }
            // Reserve the slot before the await below so a concurrent
            // caller can't also observe room and overshoot max_pool_size.
            occupied.insert(task_id);
        }

        let agent = agents::insert_agent(&self.pool, name, specialization).await?;
        agents::update_agent_state(&self.pool, agent.id, AgentState::Idle, Some(task_id)).await?;

        let mut occupied = self.occupied.lock().unwrap();
        occupied.remove(&task_id);
        occupied.insert(agent.id);

        Ok(Some(agent.id))
    }

    /// Release a slot: `terminating` -> `terminated`.
    pub async fn release(&self, agent_id: Uuid) -> Result<()> {
        agents::update_agent_state(&self.pool, agent_id, AgentState::Terminating, None).await?;
        agents::update_agent_state(&self.pool, agent_id, AgentState::Terminated, None).await?;
        self.occupied.lock().unwrap().remove(&agent_id);
        Ok(())
    }

    /// Touch an agent's last-activity timestamp.
    pub async fn update_activity(&self, agent_id: Uuid) -> Result<()> {
        agents::touch_agent_activity(&self.pool, agent_id).await
    }

    /// Mark an agent `busy`, bound to `task_id`.
    pub async fn mark_busy(&self, agent_id: Uuid, task_id: Uuid) -> Result<()> {
        agents::update_agent_state(&self.pool, agent_id, AgentState::Busy, Some(task_id)).await
    }

    /// Run one health-sweep pass: release every agent whose last activity
    /// exceeds the idle timeout. Returns the number released.
    pub async fn health_sweep_once(&self) -> Result<usize> {
        let idle = agents::get_idle_agents(&self.pool, self.config.idle_timeout.as_secs() as i64).await?;
        let count = idle.len();
        for agent in idle {
            self.release(agent.id).await?;
        }
        Ok(count)
    }

    /// Spawn the background sweep loop. Runs until `shutdown_signal` resolves.
    pub fn spawn_health_sweep(
        self: std::sync::Arc<Self>,
        shutdown_signal: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.health_check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.health_sweep_once().await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(released = n, "health sweep released idle agents"),
                            Err(err) => tracing::error!(error = %err, "health sweep failed"),
                        }
                    }
                    _ = shutdown_signal.cancelled() => {
                        tracing::info!("agent pool health sweep stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sweep (via the caller dropping/cancelling its token) and
    /// release every still-active agent.
    pub async fn shutdown(&self) -> Result<()> {
        let active = agents::list_active_agents(&self.pool).await?;
        for agent in active {
            self.release(agent.id).await?;
        }
        self.occupied.lock().unwrap().clear();
        Ok(())
    }

    /// Snapshot counts by agent state.
    pub async fn stats(&self) -> Result<AgentStats> {
        agents::agent_stats(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_test_utils::create_test_db;

    fn config(max: usize) -> AgentPoolConfig {
        AgentPoolConfig { max_pool_size: max, idle_timeout: Duration::from_millis(50), health_check_interval: Duration::from_millis(10) }
    }

    #[tokio::test]
    async fn acquire_respects_pool_cap() {
        let db = create_test_db().await;
        let pool = AgentPool::new(db.pool.clone(), config(1));

        let first = pool.acquire("worker-1", Some("impl"), Uuid::new_v4()).await.unwrap();
        assert!(first.is_some());

        let second = pool.acquire("worker-2", Some("impl"), Uuid::new_v4()).await.unwrap();
        assert!(second.is_none());

        pool.release(first.unwrap()).await.unwrap();
        let third = pool.acquire("worker-3", Some("impl"), Uuid::new_v4()).await.unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn health_sweep_releases_idle_agents() {
        let db = create_test_db().await;
        let pool = AgentPool::new(db.pool.clone(), config(4));
        let agent_id = pool.acquire("worker-1", None, Uuid::new_v4()).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let released = pool.health_sweep_once().await.unwrap();
        assert_eq!(released, 1);

        let agent = agents::get_agent(&db.pool, agent_id).await.unwrap().unwrap();
        assert_eq!(agent.state, AgentState::Terminated);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let db = create_test_db().await;
        let pool = AgentPool::new(db.pool.clone(), config(4));
        pool.acquire("worker-1", None, Uuid::new_v4()).await.unwrap();
        pool.acquire("worker-2", None, Uuid::new_v4()).await.unwrap();

        pool.shutdown().await.unwrap();
        let stats = pool.stats().await.unwrap();
        assert_eq!(stats.terminated, 2);
        assert_eq!(stats.idle, 0);
    }
}
