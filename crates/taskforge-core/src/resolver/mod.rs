//! DependencyResolver: prerequisite/dependent queries over the DAG, with a
//! small TTL cache. Cache keys are task ids, never task records, so
//! no stale record can leak across an async boundary.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use sqlx::SqlitePool;
use taskforge_db::queries::tasks;
use uuid::Uuid;

use crate::error::CoreError;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum QueryKind {
    DirectPrerequisites,
    TransitivePrerequisites,
    DirectDependents,
    TransitiveDependents,
    Depth,
}

#[derive(Debug, Clone)]
enum CachedValue {
    Ids(Vec<Uuid>),
    Depth(i32),
}

struct CacheEntry {
    value: CachedValue,
    inserted_at: Instant,
}

/// Computes and caches dependency-graph queries over the Store.
pub struct DependencyResolver {
    pool: SqlitePool,
    ttl: Duration,
    cache: Mutex<HashMap<(Uuid, QueryKind), CacheEntry>>,
}

impl DependencyResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached entry for `task_id`. Call on any insert/update to
    /// its dependencies or on its own terminal state transition.
    pub fn invalidate(&self, task_id: Uuid) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|(id, _), _| *id != task_id);
    }

    /// Drop the entire cache. Useful after a batch of schema-changing writes.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn cache_get(&self, task_id: Uuid, kind: QueryKind) -> Option<CachedValue> {
        let cache = self.cache.lock().unwrap();
        cache.get(&(task_id, kind)).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn cache_put(&self, task_id: Uuid, kind: QueryKind, value: CachedValue) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            (task_id, kind),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// The immediate predecessor set.
    pub async fn direct_prerequisites(&self, task: Uuid) -> Result<Vec<Uuid>> {
        if let Some(CachedValue::Ids(ids)) = self.cache_get(task, QueryKind::DirectPrerequisites) {
            return Ok(ids);
        }
        let ids = tasks::get_dependencies(&self.pool, task).await?;
        self.cache_put(task, QueryKind::DirectPrerequisites, CachedValue::Ids(ids.clone()));
        Ok(ids)
    }

    /// The immediate successor set.
    pub async fn direct_dependents(&self, task: Uuid) -> Result<Vec<Uuid>> {
        if let Some(CachedValue::Ids(ids)) = self.cache_get(task, QueryKind::DirectDependents) {
            return Ok(ids);
        }
        let ids = tasks::get_dependents(&self.pool, task).await?;
        self.cache_put(task, QueryKind::DirectDependents, CachedValue::Ids(ids.clone()));
        Ok(ids)
    }

    /// BFS transitive closure over prerequisite edges.
    pub async fn transitive_prerequisites(&self, task: Uuid) -> Result<Vec<Uuid>> {
        if let Some(CachedValue::Ids(ids)) = self.cache_get(task, QueryKind::TransitivePrerequisites) {
            return Ok(ids);
        }
        let ids = self.bfs(task, Direction::Prerequisites).await?;
        self.cache_put(task, QueryKind::TransitivePrerequisites, CachedValue::Ids(ids.clone()));
        Ok(ids)
    }

    /// BFS transitive closure over dependent edges.
    pub async fn transitive_dependents(&self, task: Uuid) -> Result<Vec<Uuid>> {
        if let Some(CachedValue::Ids(ids)) = self.cache_get(task, QueryKind::TransitiveDependents) {
            return Ok(ids);
        }
        let ids = self.bfs(task, Direction::Dependents).await?;
        self.cache_put(task, QueryKind::TransitiveDependents, CachedValue::Ids(ids.clone()));
        Ok(ids)
    }

    async fn bfs(&self, start: Uuid, direction: Direction) -> Result<Vec<Uuid>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);

        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            let neighbors = match direction {
                Direction::Prerequisites => tasks::get_dependencies(&self.pool, current).await?,
                Direction::Dependents => tasks::get_dependents(&self.pool, current).await?,
            };
            for n in neighbors {
                if visited.insert(n) {
                    result.push(n);
                    queue.push_back(n);
                }
            }
        }
        Ok(result)
    }

    /// `dependency_depth(t) = 0` if no prerequisites, else
    /// `1 + max(dependency_depth(p) for p in direct_prerequisites(t))`.
    /// Memoised DFS; the cache makes repeated calls on overlapping subtrees
    /// cheap.
    pub async fn dependency_depth(&self, task: Uuid) -> Result<i32> {
        if let Some(CachedValue::Depth(d)) = self.cache_get(task, QueryKind::Depth) {
            return Ok(d);
        }
        let depth = Box::pin(self.dependency_depth_uncached(task)).await?;
        self.cache_put(task, QueryKind::Depth, CachedValue::Depth(depth));
        Ok(depth)
    }

    async fn dependency_depth_uncached(&self, task: Uuid) -> Result<i32> {
        let prereqs = self.direct_prerequisites(task).await?;
        if prereqs.is_empty() {
            return Ok(0);
        }
        let mut max_depth = 0;
        for p in prereqs {
            let d = Box::pin(self.dependency_depth(p)).await?;
            max_depth = max_depth.max(d);
        }
        Ok(max_depth + 1)
    }

    /// True iff adding an edge `dependent -> prerequisite` would close a
    /// cycle, i.e. `dependent` is already reachable from `prerequisite`
    /// via prerequisite edges.
    pub async fn would_create_cycle(&self, dependent: Uuid, prerequisite: Uuid) -> Result<bool> {
        if dependent == prerequisite {
            return Ok(true);
        }
        let transitive = self.transitive_prerequisites(prerequisite).await?;
        Ok(transitive.contains(&dependent))
    }

    /// All direct prerequisites are `completed`.
    pub async fn is_ready(&self, task: Uuid) -> Result<bool> {
        let prereqs = self.direct_prerequisites(task).await?;
        for p in prereqs {
            let Some(row) = tasks::get_task(&self.pool, p).await? else {
                return Err(CoreError::validation(format!("missing prerequisite {p}")).into());
            };
            if row.status != taskforge_db::models::TaskStatus::Completed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Prerequisites,
    Dependents,
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_db::models::{DependencyType, TaskSource, TaskStatus};
    use taskforge_db::queries::tasks::NewTask;
    use taskforge_test_utils::create_test_db;

    fn new_task(status: TaskStatus) -> NewTask {
        NewTask {
            prompt: "p".into(),
            summary: None,
            agent_type: "impl".into(),
            source: TaskSource::Human,
            dependency_type: DependencyType::Sequential,
            base_priority: 5,
            max_retries: 3,
            max_execution_timeout_seconds: 3600,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: None,
            parent_task_id: None,
            dependency_depth: 0,
            status,
        }
    }

    #[tokio::test]
    async fn linear_chain_depth_and_cycle_detection() {
        let db = create_test_db().await;
        let a = tasks::insert_task(&db.pool, &new_task(TaskStatus::Ready)).await.unwrap();
        let b = tasks::insert_task(&db.pool, &new_task(TaskStatus::Blocked)).await.unwrap();
        let c = tasks::insert_task(&db.pool, &new_task(TaskStatus::Blocked)).await.unwrap();
        tasks::insert_dependency(&db.pool, b.id, a.id, DependencyType::Sequential).await.unwrap();
        tasks::insert_dependency(&db.pool, c.id, b.id, DependencyType::Sequential).await.unwrap();

        let resolver = DependencyResolver::new(db.pool.clone());
        assert_eq!(resolver.dependency_depth(a.id).await.unwrap(), 0);
        assert_eq!(resolver.dependency_depth(b.id).await.unwrap(), 1);
        assert_eq!(resolver.dependency_depth(c.id).await.unwrap(), 2);

        let transitive = resolver.transitive_prerequisites(c.id).await.unwrap();
        assert!(transitive.contains(&a.id));
        assert!(transitive.contains(&b.id));

        // Adding c -> a would not cycle (already transitive, fine) but a -> c would.
        assert!(resolver.would_create_cycle(a.id, c.id).await.unwrap());
        assert!(!resolver.would_create_cycle(c.id, a.id).await.unwrap());
    }

    #[tokio::test]
    async fn is_ready_reflects_prerequisite_status() {
        let db = create_test_db().await;
        let a = tasks::insert_task(&db.pool, &new_task(TaskStatus::Ready)).await.unwrap();
        let b = tasks::insert_task(&db.pool, &new_task(TaskStatus::Blocked)).await.unwrap();
        tasks::insert_dependency(&db.pool, b.id, a.id, DependencyType::Sequential).await.unwrap();

        let resolver = DependencyResolver::new(db.pool.clone());
        assert!(!resolver.is_ready(b.id).await.unwrap());

        tasks::transition_task_status(&db.pool, a.id, TaskStatus::Ready, TaskStatus::Running, None)
            .await
            .unwrap();
        tasks::transition_task_status(&db.pool, a.id, TaskStatus::Running, TaskStatus::Completed, None)
            .await
            .unwrap();

        assert!(resolver.is_ready(b.id).await.unwrap());
    }

    #[tokio::test]
    async fn cache_invalidation_picks_up_new_edges() {
        let db = create_test_db().await;
        let a = tasks::insert_task(&db.pool, &new_task(TaskStatus::Ready)).await.unwrap();
        let b = tasks::insert_task(&db.pool, &new_task(TaskStatus::Blocked)).await.unwrap();

        let resolver = DependencyResolver::new(db.pool.clone());
        assert!(resolver.direct_prerequisites(b.id).await.unwrap().is_empty());

        tasks::insert_dependency(&db.pool, b.id, a.id, DependencyType::Sequential).await.unwrap();
        resolver.invalidate(b.id);

        assert_eq!(resolver.direct_prerequisites(b.id).await.unwrap(), vec![a.id]);
    }
}
