use crate::{ActionId, ActionNode, ContainerId, ExecutionMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PlanId = Uuid;
pub type GroupId = String;

/// Batch of action nodes sharing one execution mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub id: GroupId,
    pub execution_mode: ExecutionMode,
    pub actions: Vec<ActionNode>,
    /// Groups that must be terminal before this one starts
    pub depends_on: Vec<GroupId>,
    pub estimated_duration_ms: u64,
    pub priority: i32,
}

impl ExecutionGroup {
    pub fn action_ids(&self) -> impl Iterator<Item = &ActionId> {
        self.actions.iter().map(|a| &a.id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Grouped, ordered actions for one container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    pub container_id: ContainerId,
    /// Actions in planned order
    pub actions: Vec<ActionNode>,
    pub groups: Vec<ExecutionGroup>,
    pub total_estimated_duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn find_group(&self, id: &str) -> Option<&ExecutionGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn find_action(&self, id: &str) -> Option<&ActionNode> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn total_actions(&self) -> usize {
        self.actions.len()
    }
}
