use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchcore::services::{AgentMetrics, AgentRecoveryAction, AgentRecoveryService};
use orchcore::{AgentId, ServiceError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Retrying,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailureRecord {
    pub reason: String,
    pub action: AgentRecoveryAction,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AgentRecord {
    state: AgentState,
    metrics: AgentMetrics,
    restarts: u32,
    history: Vec<AgentFailureRecord>,
}

/// Agent registry that applies recovery actions to in-memory state
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent_id: impl Into<AgentId>) {
        self.agents.write().await.entry(agent_id.into()).or_insert(AgentRecord {
            state: AgentState::Active,
            metrics: AgentMetrics::default(),
            restarts: 0,
            history: Vec::new(),
        });
    }

    /// Fold one finished execution into the agent's metrics.
    pub async fn record_execution(
        &self,
        agent_id: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), ServiceError> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| ServiceError::NotFound(agent_id.to_string()))?;
        let m = &mut record.metrics;
        let total_time = m.average_execution_time_ms * m.total_executions + duration_ms;
        m.total_executions += 1;
        if success {
            m.successful_executions += 1;
        } else {
            m.failed_executions += 1;
        }
        m.average_execution_time_ms = total_time / m.total_executions;
        Ok(())
    }

    pub async fn state(&self, agent_id: &str) -> Option<AgentState> {
        self.agents.read().await.get(agent_id).map(|r| r.state)
    }

    pub async fn restarts(&self, agent_id: &str) -> u32 {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|r| r.restarts)
            .unwrap_or(0)
    }

    pub async fn history(&self, agent_id: &str) -> Vec<AgentFailureRecord> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    /// Simulate an outage of the agent management backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("agent registry".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRecoveryService for InMemoryAgentRegistry {
    async fn handle_agent_failure(
        &self,
        agent_id: &str,
        reason: &str,
        action: AgentRecoveryAction,
    ) -> Result<(), ServiceError> {
        self.check_available()?;
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| ServiceError::NotFound(agent_id.to_string()))?;

        record.metrics.failed_executions += 1;
        record.history.push(AgentFailureRecord {
            reason: reason.to_string(),
            action,
            recorded_at: Utc::now(),
        });
        record.state = match action {
            AgentRecoveryAction::Retry => AgentState::Retrying,
            AgentRecoveryAction::Restart => {
                record.restarts += 1;
                AgentState::Active
            }
            AgentRecoveryAction::Disable => AgentState::Disabled,
        };

        tracing::info!(agent_id, %action, state = ?record.state, "agent recovery applied");
        Ok(())
    }

    async fn get_agent_metrics(&self, agent_id: &str) -> Result<AgentMetrics, ServiceError> {
        self.check_available()?;
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|r| r.metrics.clone())
            .ok_or_else(|| ServiceError::NotFound(agent_id.to_string()))
    }
}
