//! Requests to and decisions of the error-handling coordinator.

use crate::{ActionId, AgentId, ActionNode, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    ActionExecution,
    AgentExecution,
    BusinessValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionTaken {
    Retry,
    FailFast,
    Restart,
    Disable,
    ValidationPassed,
    ValidationFailed,
    DependencyFailure,
    WorkflowImpact,
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionTaken::Retry => "retry",
            ActionTaken::FailFast => "fail-fast",
            ActionTaken::Restart => "restart",
            ActionTaken::Disable => "disable",
            ActionTaken::ValidationPassed => "validation-passed",
            ActionTaken::ValidationFailed => "validation-failed",
            ActionTaken::DependencyFailure => "dependency-failure",
            ActionTaken::WorkflowImpact => "workflow-impact",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalStatus {
    Completed,
    Failed,
    Retrying,
    Disabled,
    Restarted,
    ValidationBlocked,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl RecoveryMetrics {
    pub fn since(started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        let execution_time_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            started_at,
            finished_at,
            execution_time_ms,
        }
    }
}

/// Outcome of one recovery decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingResult {
    pub operation_type: OperationType,
    pub operation_id: String,
    pub success: bool,
    pub action_taken: ActionTaken,
    pub retry_attempted: bool,
    pub retry_count: u32,
    pub backoff_delay_ms: u64,
    pub errors: Vec<String>,
    pub final_status: FinalStatus,
    pub metrics: RecoveryMetrics,
    /// Set on cascading results: the primary decision they derive from
    pub cascade_source: Option<String>,
    pub context: HashMap<String, Value>,
}

impl ErrorHandlingResult {
    pub fn new(
        operation_type: OperationType,
        operation_id: impl Into<String>,
        action_taken: ActionTaken,
        final_status: FinalStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_type,
            operation_id: operation_id.into(),
            success: false,
            action_taken,
            retry_attempted: false,
            retry_count: 0,
            backoff_delay_ms: 0,
            errors: Vec::new(),
            final_status,
            metrics: RecoveryMetrics::since(started_at),
            cascade_source: None,
            context: HashMap::new(),
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cascade_source(mut self, source: impl Into<String>) -> Self {
        self.cascade_source = Some(source.into());
        self
    }

    pub fn is_cascade(&self) -> bool {
        self.cascade_source.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFailureRequest {
    pub action_id: ActionId,
    pub error: String,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub related_operations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailureRequest {
    pub agent_id: AgentId,
    pub reason: String,
    /// Explicit recovery preference (`disable`, `restart`, `retry`)
    #[serde(default)]
    pub recovery_action: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessValidationRequest {
    pub operation_id: String,
    #[serde(default)]
    pub model: Value,
    #[serde(default)]
    pub actions: Vec<ActionNode>,
    #[serde(default)]
    pub related_operations: Vec<String>,
}

/// Input to the coordinator's single entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorHandlingRequest {
    ActionFailure(ActionFailureRequest),
    AgentFailure(AgentFailureRequest),
    BusinessValidation(BusinessValidationRequest),
}

impl ErrorHandlingRequest {
    pub fn operation_type(&self) -> OperationType {
        match self {
            ErrorHandlingRequest::ActionFailure(_) => OperationType::ActionExecution,
            ErrorHandlingRequest::AgentFailure(_) => OperationType::AgentExecution,
            ErrorHandlingRequest::BusinessValidation(_) => OperationType::BusinessValidation,
        }
    }
}
