use crate::condition::Condition;
use crate::events::EventEmitter;
use crate::recovery::ErrorHandlingResult;
use crate::retry::RetryPolicy;
use crate::RunId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type ActionId = String;
pub type ContainerId = String;
pub type AgentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Conditional,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Conditional => "conditional",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an action node as authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Active,
    Retrying,
    Failed,
    Completed,
    #[default]
    Configured,
}

/// One unit of work inside a workflow container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNode {
    pub id: ActionId,
    pub container_id: ContainerId,
    #[serde(default)]
    pub name: Option<String>,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub priority: i32,
    /// Estimated duration in milliseconds
    #[serde(default)]
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Only consulted when the node runs in conditional mode
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Actions whose context must be propagated in before this one runs
    #[serde(default)]
    pub context_from: Vec<ActionId>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl ActionNode {
    pub fn new(
        id: impl Into<ActionId>,
        container_id: impl Into<ContainerId>,
        execution_mode: ExecutionMode,
    ) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            name: None,
            execution_mode,
            execution_order: 0,
            priority: 0,
            estimated_duration_ms: 0,
            retry_policy: RetryPolicy::default(),
            status: ActionStatus::Configured,
            agent_id: None,
            condition: None,
            context_from: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.execution_order = order;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_context_from(mut self, action_id: impl Into<ActionId>) -> Self {
        self.context_from.push(action_id.into());
        self
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Context handed to the execution collaborator for one action
#[derive(Clone)]
pub struct ActionContext {
    pub run_id: RunId,
    pub action_id: ActionId,
    /// Context propagated from `context_from` actions, keyed by source id
    pub inputs: HashMap<ActionId, serde_json::Value>,
    /// Run-level variables visible to every action
    pub variables: HashMap<String, serde_json::Value>,
    pub events: EventEmitter,
    /// Cancelled when the run aborts; work may stop cooperatively
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl ActionContext {
    pub fn input(&self, source: &str) -> Option<&serde_json::Value> {
        self.inputs.get(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// Condition evaluated false
    Skipped,
    /// Never reached because of fail-fast or run abort
    NotStarted,
}

/// Result of running one action inside a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub outcome: ActionOutcome,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub recovery: Vec<ErrorHandlingResult>,
}

impl ActionResult {
    pub fn succeeded(action_id: impl Into<ActionId>, output: Option<serde_json::Value>) -> Self {
        Self {
            action_id: action_id.into(),
            outcome: ActionOutcome::Succeeded,
            output,
            error: None,
            attempts: 1,
            duration_ms: 0,
            recovery: Vec::new(),
        }
    }

    pub fn failed(action_id: impl Into<ActionId>, error: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            outcome: ActionOutcome::Failed,
            output: None,
            error: Some(error.into()),
            attempts: 1,
            duration_ms: 0,
            recovery: Vec::new(),
        }
    }

    pub fn skipped(action_id: impl Into<ActionId>) -> Self {
        Self {
            action_id: action_id.into(),
            outcome: ActionOutcome::Skipped,
            output: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
            recovery: Vec::new(),
        }
    }

    pub fn not_started(action_id: impl Into<ActionId>, reason: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            outcome: ActionOutcome::NotStarted,
            output: None,
            error: Some(reason.into()),
            attempts: 0,
            duration_ms: 0,
            recovery: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == ActionOutcome::Failed
    }

    /// Succeeded or skipped by its condition.
    pub fn counts_as_completed(&self) -> bool {
        matches!(
            self.outcome,
            ActionOutcome::Succeeded | ActionOutcome::Skipped
        )
    }
}
