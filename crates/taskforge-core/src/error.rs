//! Error kinds surfaced to callers. `Validation` and `NotFound` carry a
//! stable tag for CLI scripting; `Invariant` indicates a programming error
//! and should never normally occur.

use thiserror::Error;
use uuid::Uuid;

/// A stable, scriptable error from the orchestration kernel.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Bad input: summary, duration, prune status, cycle, missing
    /// prerequisite, mutually exclusive options.
    #[error("validation error: {0}")]
    Validation(String),
    /// An operation referenced an id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A broken invariant -- deleting a parent with children outside a
    /// subtree prune, or transitioning out of a terminal state. Never
    /// expected to surface in correct operation.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &str, id: Uuid) -> Self {
        Self::NotFound(format!("{kind} {id} not found"))
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Process exit code: 2 validation, 3 not-found, 4 invariant.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::NotFound(_) => 3,
            Self::Invariant(_) => 4,
        }
    }

    /// Stable machine-readable tag, stable enough for scripting.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not-found",
            Self::Invariant(_) => "invariant",
        }
    }
}

/// Classify an agent-invocation error message as transient or permanent.
/// Substring match against a fixed vocabulary; advisory only.
pub fn is_transient_error(message: &str) -> bool {
    const TRANSIENT_MARKERS: &[&str] = &[
        "timeout",
        "timed out",
        "rate limit",
        "connection",
        "network",
        "temporary",
        "503",
        "429",
    ];
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CoreError::validation("x").exit_code(), 2);
        assert_eq!(CoreError::not_found("task", Uuid::nil()).exit_code(), 3);
        assert_eq!(CoreError::invariant("x").exit_code(), 4);
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_error("Connection reset by peer"));
        assert!(is_transient_error("request timed out after 30s"));
        assert!(is_transient_error("HTTP 503 Service Unavailable"));
        assert!(is_transient_error("rate limit exceeded, retry later"));
        assert!(!is_transient_error("invalid syntax in prompt template"));
        assert!(!is_transient_error("permission denied"));
    }
}
