//! S6: a parent task with two children, one of which has a grandchild.
//! Completing all four and pruning the subtree removes exactly four tasks
//! in one transaction; pruning with any node non-terminal deletes nothing.

use taskforge_core::{DependencyResolver, PriorityCalculator, PruneEngine, TaskQueueService, VacuumMode};
use taskforge_db::models::{DependencyType, TaskSource, TaskStatus};
use taskforge_db::queries::tasks::{self, NewTask};
use taskforge_test_utils::create_test_db;

fn child_of(parent: uuid::Uuid) -> NewTask {
    NewTask {
        prompt: "p".into(),
        summary: None,
        agent_type: "impl".into(),
        source: TaskSource::AgentPlanner,
        dependency_type: DependencyType::Sequential,
        base_priority: 5,
        max_retries: 1,
        max_execution_timeout_seconds: 3600,
        deadline: None,
        estimated_duration_seconds: None,
        input_data: None,
        parent_task_id: Some(parent),
        dependency_depth: 0,
        status: TaskStatus::Ready,
    }
}

#[tokio::test]
async fn subtree_prune_requires_all_terminal_then_succeeds() {
    let db = create_test_db().await;
    let queue = TaskQueueService::new(
        db.pool.clone(),
        DependencyResolver::new(db.pool.clone()),
        PriorityCalculator::default(),
    );

    let mut root = child_of(uuid::Uuid::nil());
    root.parent_task_id = None;
    let parent = tasks::insert_task(&db.pool, &root).await.unwrap();
    let c1 = tasks::insert_task(&db.pool, &child_of(parent.id)).await.unwrap();
    let c2 = tasks::insert_task(&db.pool, &child_of(parent.id)).await.unwrap();
    let grandchild = tasks::insert_task(&db.pool, &child_of(c1.id)).await.unwrap();

    let engine = PruneEngine::new(db.pool.clone(), "unused.db");

    // Non-terminal yet: refused, nothing deleted.
    let refused = engine.prune_subtree(parent.id, false, VacuumMode::Never).await;
    assert!(refused.is_err());
    let status = queue.queue_status().await.unwrap();
    assert_eq!(status.total, 4);

    for id in [parent.id, c1.id, c2.id, grandchild.id] {
        tasks::transition_task_status(&db.pool, id, TaskStatus::Ready, TaskStatus::Running, None).await.unwrap();
        queue.complete_task(id, None).await.unwrap();
    }

    let report = engine.prune_subtree(parent.id, false, VacuumMode::Never).await.unwrap();
    assert_eq!(report.deleted_tasks, 4);

    let status = queue.queue_status().await.unwrap();
    assert_eq!(status.total, 0);
}
