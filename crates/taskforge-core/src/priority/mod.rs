//! PriorityCalculator: the weighted scalar priority function.

use chrono::{DateTime, Utc};
use taskforge_db::models::{Task, TaskSource};

use crate::resolver::DependencyResolver;

/// Configurable weights and scale constants for the five scoring factors.
/// Defaults match ; weights must sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct PriorityWeights {
    pub base: f64,
    pub depth: f64,
    pub urgency: f64,
    pub blocking: f64,
    pub source: f64,
    pub depth_max: f64,
    pub blocking_max: f64,
    pub urgency_scale_seconds: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            base: 0.3,
            depth: 0.15,
            urgency: 0.25,
            blocking: 0.2,
            source: 0.1,
            depth_max: 10.0,
            blocking_max: 64.0,
            urgency_scale_seconds: 86_400.0,
        }
    }
}

impl PriorityWeights {
    /// True if the five scheduling weights sum to 1.0 within tolerance.
    pub fn weights_sum_to_one(&self) -> bool {
        let sum = self.base + self.depth + self.urgency + self.blocking + self.source;
        (sum - 1.0).abs() < 1e-9
    }
}

/// Computes `calculated_priority` as a weighted sum of five normalised
/// scores. Deterministic for identical inputs and `now`.
pub struct PriorityCalculator {
    weights: PriorityWeights,
}

impl PriorityCalculator {
    pub fn new(weights: PriorityWeights) -> Self {
        Self { weights }
    }

    /// Compute `calculated_priority` for `task`, given its resolved depth,
    /// transitive-dependent count, and the current time. The caller supplies
    /// `dependency_depth` and `dependent_count` (typically from
    /// [`DependencyResolver`]) rather than this type reaching into the
    /// resolver itself, keeping the scoring function pure and testable.
    pub fn score(&self, task: &Task, dependent_count: usize, now: DateTime<Utc>) -> f64 {
        let w = &self.weights;

        let base = task.base_priority as f64;

        let depth = (task.dependency_depth as f64).min(w.depth_max) / w.depth_max * 10.0;

        let urgency = match task.deadline {
            None => 0.0,
            Some(deadline) => {
                let slack_seconds = (deadline - now).num_seconds() as f64
                    - task.estimated_duration_seconds.unwrap_or(0) as f64;
                if slack_seconds < 0.0 {
                    10.0
                } else {
                    let exponent = -slack_seconds / w.urgency_scale_seconds;
                    10.0 * exponent.exp()
                }
            }
        };

        let blocking = (1.0 + dependent_count as f64).log2() * 10.0 / (1.0 + w.blocking_max).log2();

        let source = task.source.priority_score();

        w.base * base + w.depth * depth + w.urgency * urgency + w.blocking * blocking + w.source * source
    }

    /// Compute a task's score by pulling depth and dependent-count from the
    /// resolver.
    pub async fn score_with_resolver(
        &self,
        task: &Task,
        resolver: &DependencyResolver,
        now: DateTime<Utc>,
    ) -> anyhow::Result<f64> {
        let dependent_count = resolver.transitive_dependents(task.id).await?.len();
        Ok(self.score(task, dependent_count, now))
    }
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self::new(PriorityWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use taskforge_db::models::DependencyType;
    use uuid::Uuid;

    fn base_task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            summary: None,
            prompt: "x".into(),
            agent_type: "impl".into(),
            source: TaskSource::AgentImplementation,
            dependency_type: DependencyType::Sequential,
            status: taskforge_db::models::TaskStatus::Ready,
            base_priority: 5,
            calculated_priority: 0.0,
            input_data: None,
            result_data: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            max_execution_timeout_seconds: 3600,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_updated_at: now,
            parent_task_id: None,
            deadline: None,
            estimated_duration_seconds: None,
            dependency_depth: 0,
        }
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(PriorityWeights::default().weights_sum_to_one());
    }

    #[test]
    fn no_deadline_has_zero_urgency() {
        let calc = PriorityCalculator::default();
        let task = base_task();
        let now = Utc::now();
        let score = calc.score(&task, 0, now);
        // With zero depth, zero urgency, zero blocking: only base + source contribute.
        let expected = 0.3 * 5.0 + 0.1 * TaskSource::AgentImplementation.priority_score();
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_slack_saturates_urgency_to_max() {
        let calc = PriorityCalculator::default();
        let mut task = base_task();
        let now = Utc::now();
        task.deadline = Some(now - ChronoDuration::days(5));
        let with_deadline = calc.score(&task, 0, now);

        task.deadline = None;
        let without_deadline = calc.score(&task, 0, now);

        // Urgency weight (0.25) * 10 = 2.5 more than the no-deadline case.
        assert!((with_deadline - without_deadline - 2.5).abs() < 1e-6);
    }

    #[test]
    fn more_dependents_increase_blocking_score() {
        let calc = PriorityCalculator::default();
        let task = base_task();
        let now = Utc::now();
        let few = calc.score(&task, 1, now);
        let many = calc.score(&task, 63, now);
        assert!(many > few);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let calc = PriorityCalculator::default();
        let task = base_task();
        let now = Utc::now();
        assert_eq!(calc.score(&task, 5, now), calc.score(&task, 5, now));
    }

    #[test]
    fn source_mapping_orders_correctly() {
        let calc = PriorityCalculator::default();
        let now = Utc::now();
        let mut human = base_task();
        human.source = TaskSource::Human;
        let mut impl_task = base_task();
        impl_task.source = TaskSource::AgentImplementation;
        assert!(calc.score(&human, 0, now) > calc.score(&impl_task, 0, now));
    }
}
