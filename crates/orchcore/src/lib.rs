//! Core abstractions for the orchestration engine
//!
//! Data model, error taxonomy, retry policy and the interfaces of the
//! external collaborators. Nothing in here drives execution.

mod action;
mod condition;
mod error;
pub mod events;
mod plan;
pub mod recovery;
mod retry;
pub mod services;

pub use action::{
    ActionContext, ActionId, ActionNode, ActionOutcome, ActionResult, ActionStatus, AgentId,
    ContainerId, ExecutionMode,
};
pub use condition::{Condition, ExecutionContext};
pub use error::{EngineError, PlanError, PolicyError, RecoveryError, RunError, ServiceError};
pub use events::{ActionEvent, EventBus, EventEmitter, OrchestrationEvent};
pub use plan::{ExecutionGroup, ExecutionPlan, GroupId, PlanId};
pub use recovery::{
    ActionTaken, ErrorHandlingRequest, ErrorHandlingResult, FinalStatus, OperationType,
};
pub use retry::{RetryPolicy, RetryPolicyDef, RetryStrategy};

pub type RunId = uuid::Uuid;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
