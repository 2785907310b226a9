use crate::recovery::{ActionTaken, OperationType};
use crate::{ActionId, ExecutionMode, GroupId, PlanId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while a plan runs or a failure is handled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestrationEvent {
    RunStarted {
        run_id: RunId,
        plan_id: PlanId,
        container_id: String,
        total_actions: usize,
        timestamp: DateTime<Utc>,
    },
    RunPaused {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    RunResumed {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    GroupStarted {
        run_id: RunId,
        group_id: GroupId,
        execution_mode: ExecutionMode,
        actions: usize,
        timestamp: DateTime<Utc>,
    },
    GroupCompleted {
        run_id: RunId,
        group_id: GroupId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActionStarted {
        run_id: RunId,
        action_id: ActionId,
        timestamp: DateTime<Utc>,
    },
    ActionCompleted {
        run_id: RunId,
        action_id: ActionId,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActionFailed {
        run_id: RunId,
        action_id: ActionId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ActionSkipped {
        run_id: RunId,
        action_id: ActionId,
        timestamp: DateTime<Utc>,
    },
    Action {
        run_id: RunId,
        action_id: ActionId,
        event: ActionEvent,
        timestamp: DateTime<Utc>,
    },
    RecoveryDecision {
        operation_id: String,
        operation_type: OperationType,
        action_taken: ActionTaken,
        success: bool,
        cascade: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Messages an execution collaborator may report while an action runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ActionEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Per-action handle onto the event bus
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    action_id: ActionId,
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventEmitter {
    pub fn new(
        run_id: RunId,
        action_id: ActionId,
        sender: broadcast::Sender<OrchestrationEvent>,
    ) -> Self {
        Self {
            run_id,
            action_id,
            sender,
        }
    }

    pub fn emit(&self, event: ActionEvent) {
        let sent = self.sender.send(OrchestrationEvent::Action {
            run_id: self.run_id,
            action_id: self.action_id.clone(),
            event,
            timestamp: Utc::now(),
        });
        if sent.is_err() {
            tracing::trace!(run_id = %self.run_id, action_id = %self.action_id, "no subscribers, action event dropped");
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ActionEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(ActionEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(ActionEvent::Progress { percent, message });
    }
}

/// In-process broadcast bus; events are dropped when nobody listens.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: OrchestrationEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(?event, "no subscribers, event dropped");
        }
    }

    pub fn create_emitter(&self, run_id: RunId, action_id: ActionId) -> EventEmitter {
        EventEmitter::new(run_id, action_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
