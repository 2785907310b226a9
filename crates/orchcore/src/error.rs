use thiserror::Error;

use crate::{ActionId, RunId};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Cannot plan an empty action set")]
    EmptyActionSet,

    #[error("Action '{action_id}' belongs to container '{found}', expected '{expected}'")]
    ContainerMismatch {
        action_id: ActionId,
        expected: String,
        found: String,
    },

    #[error("Duplicate action id: {0}")]
    DuplicateAction(ActionId),

    #[error("Cyclic dependency between execution groups")]
    CyclicDependency,

    #[error("Unknown execution group: {0}")]
    UnknownGroup(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("Retry policy evaluation failed for '{action_id}': {reason}")]
    RetryPolicyEvaluationFailed { action_id: ActionId, reason: String },

    #[error("Context for '{requester}' from '{target}' could not be resolved: {reason}")]
    DependencyResolutionFailed {
        requester: ActionId,
        target: ActionId,
        reason: String,
    },

    #[error("Unrecognized agent recovery action: {0}")]
    RecoveryActionInvalid(String),

    #[error("Business rule validation service unavailable: {0}")]
    ValidationServiceUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    #[error("Cannot {operation} run {run_id} while {phase}")]
    InvalidTransition {
        run_id: RunId,
        operation: &'static str,
        phase: String,
    },

    #[error("Run driver for {0} terminated abnormally")]
    DriverFailed(RunId),
}

/// Failures reported by external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },
}
