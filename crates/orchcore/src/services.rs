//! Interfaces of the collaborators the engine consumes.
//!
//! Implementations live outside this crate; the engine only sees these traits.

use crate::{ActionContext, ActionNode, RecoveryError, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub retry_attempt: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Per-action execution state held by the snapshot store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub status: ExecutionStatus,
    /// 0-100
    pub progress: u8,
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub output: Option<Value>,
}

#[async_trait]
pub trait ActionExecutionService: Send + Sync {
    /// Run one action to completion and return its output.
    async fn execute_action(
        &self,
        action: &ActionNode,
        ctx: &ActionContext,
    ) -> Result<Value, ServiceError>;

    /// Record a failure on the action's snapshot.
    async fn fail_execution(&self, action_id: &str, error: &str) -> Result<(), ServiceError>;

    /// Whether the store still allows this action to be retried.
    async fn evaluate_retry_policy(&self, action_id: &str) -> Result<bool, ServiceError>;

    async fn get_execution_snapshot(
        &self,
        action_id: &str,
    ) -> Result<ExecutionSnapshot, ServiceError>;

    /// Re-run the action; increments the snapshot's retry attempt.
    async fn retry_execution(&self, action_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRecoveryAction {
    Disable,
    Restart,
    Retry,
}

impl FromStr for AgentRecoveryAction {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(AgentRecoveryAction::Disable),
            "restart" => Ok(AgentRecoveryAction::Restart),
            "retry" => Ok(AgentRecoveryAction::Retry),
            _ => Err(RecoveryError::RecoveryActionInvalid(s.to_string())),
        }
    }
}

impl fmt::Display for AgentRecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentRecoveryAction::Disable => "disable",
            AgentRecoveryAction::Restart => "restart",
            AgentRecoveryAction::Retry => "retry",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    #[serde(default)]
    pub average_execution_time_ms: u64,
}

#[async_trait]
pub trait AgentRecoveryService: Send + Sync {
    async fn handle_agent_failure(
        &self,
        agent_id: &str,
        reason: &str,
        action: AgentRecoveryAction,
    ) -> Result<(), ServiceError>;

    async fn get_agent_metrics(&self, agent_id: &str) -> Result<AgentMetrics, ServiceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait BusinessRuleValidationService: Send + Sync {
    async fn validate_business_rules(
        &self,
        model: &Value,
        actions: &[ActionNode],
    ) -> Result<ValidationVerdict, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAccessMode {
    Read,
    Inherit,
}

#[async_trait]
pub trait NodeContextAccessService: Send + Sync {
    async fn get_node_context(
        &self,
        requester: &str,
        target: &str,
        mode: ContextAccessMode,
    ) -> Result<Value, ServiceError>;
}
