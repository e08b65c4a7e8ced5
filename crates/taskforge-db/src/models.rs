use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "blocked" => Ok(Self::Blocked),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

impl TaskStatus {
    /// Terminal statuses are sticky; transitions out require explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Who or what submitted a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TaskSource {
    Human,
    AgentRequirements,
    AgentPlanner,
    AgentImplementation,
}

impl TaskSource {
    /// Fixed source-priority score used by the priority calculator.
    pub fn priority_score(self) -> f64 {
        match self {
            Self::Human => 10.0,
            Self::AgentRequirements => 8.0,
            Self::AgentPlanner => 6.0,
            Self::AgentImplementation => 4.0,
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Human => "human",
            Self::AgentRequirements => "agent-requirements",
            Self::AgentPlanner => "agent-planner",
            Self::AgentImplementation => "agent-implementation",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskSource {
    type Err = TaskSourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent-requirements" => Ok(Self::AgentRequirements),
            "agent-planner" => Ok(Self::AgentPlanner),
            "agent-implementation" => Ok(Self::AgentImplementation),
            other => Err(TaskSourceParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskSource`] string.
#[derive(Debug, Clone)]
pub struct TaskSourceParseError(pub String);

impl fmt::Display for TaskSourceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task source: {:?}", self.0)
    }
}

impl std::error::Error for TaskSourceParseError {}

// ---------------------------------------------------------------------------

/// Semantics of a dependency edge. Sequential and parallel are identical
/// today (all prerequisites must complete); the tag is retained for future
/// AND/OR extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Sequential,
    Parallel,
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

impl FromStr for DependencyType {
    type Err = DependencyTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(DependencyTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`DependencyType`] string.
#[derive(Debug, Clone)]
pub struct DependencyTypeParseError(pub String);

impl fmt::Display for DependencyTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid dependency type: {:?}", self.0)
    }
}

impl std::error::Error for DependencyTypeParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Spawning,
    Idle,
    Busy,
    Terminating,
    Terminated,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spawning => "spawning",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentState {
    type Err = AgentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawning" => Ok(Self::Spawning),
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            other => Err(AgentStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AgentState`] string.
#[derive(Debug, Clone)]
pub struct AgentStateParseError(pub String);

impl fmt::Display for AgentStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent state: {:?}", self.0)
    }
}

impl std::error::Error for AgentStateParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work in the dependency DAG.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub summary: Option<String>,
    pub prompt: String,
    pub agent_type: String,
    pub source: TaskSource,
    pub dependency_type: DependencyType,
    pub status: TaskStatus,
    pub base_priority: i32,
    pub calculated_priority: f64,
    pub input_data: Option<serde_json::Value>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub max_execution_timeout_seconds: i64,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub parent_task_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub dependency_depth: i32,
}

/// An edge in the prerequisite DAG: `dependent_task_id` depends on
/// `prerequisite_task_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    pub id: Uuid,
    pub dependent_task_id: Uuid,
    pub prerequisite_task_id: Uuid,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A registered worker process bound to at most one task at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub specialization: Option<String>,
    pub task_id: Option<Uuid>,
    pub state: AgentState,
    pub spawned_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub resource_usage: Option<serde_json::Value>,
}

/// An immutable audit log row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub task_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub action_type: String,
    pub action_data: Option<serde_json::Value>,
    pub result: String,
}

/// A row in the opaque per-task state bag.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StateEntry {
    pub task_id: Uuid,
    pub key: String,
    pub value: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Blocked,
            TaskStatus::Ready,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
    }

    #[test]
    fn task_source_display_roundtrip() {
        let variants = [
            TaskSource::Human,
            TaskSource::AgentRequirements,
            TaskSource::AgentPlanner,
            TaskSource::AgentImplementation,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskSource = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_source_priority_scores() {
        assert_eq!(TaskSource::Human.priority_score(), 10.0);
        assert_eq!(TaskSource::AgentRequirements.priority_score(), 8.0);
        assert_eq!(TaskSource::AgentPlanner.priority_score(), 6.0);
        assert_eq!(TaskSource::AgentImplementation.priority_score(), 4.0);
    }

    #[test]
    fn task_source_invalid() {
        assert!("robot".parse::<TaskSource>().is_err());
    }

    #[test]
    fn dependency_type_display_roundtrip() {
        let variants = [DependencyType::Sequential, DependencyType::Parallel];
        for v in &variants {
            let s = v.to_string();
            let parsed: DependencyType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn dependency_type_invalid() {
        assert!("either".parse::<DependencyType>().is_err());
    }

    #[test]
    fn agent_state_display_roundtrip() {
        let variants = [
            AgentState::Spawning,
            AgentState::Idle,
            AgentState::Busy,
            AgentState::Terminating,
            AgentState::Terminated,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: AgentState = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn agent_state_invalid() {
        assert!("sleeping".parse::<AgentState>().is_err());
    }
}
