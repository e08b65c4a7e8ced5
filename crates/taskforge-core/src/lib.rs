//! The orchestration kernel: task/dependency data model and state machine,
//! dependency resolution, priority scoring, the agent pool, the
//! orchestrator loop, failure recovery, and the prune engine.

pub mod duration;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pool;
pub mod priority;
pub mod prune;
pub mod queue;
pub mod recovery;
pub mod resolver;

pub use error::CoreError;
pub use executor::{Executor, ExecutorOutcome, NoopExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorResult};
pub use pool::{AgentPool, AgentPoolConfig};
pub use priority::{PriorityCalculator, PriorityWeights};
pub use prune::{PruneEngine, VacuumMode};
pub use queue::{SubmitRequest, TaskQueueService};
pub use recovery::{FailureRecovery, RecoveryConfig};
pub use resolver::DependencyResolver;
