use async_trait::async_trait;
use orchcore::services::{
    ActionExecutionService, ContextAccessMode, ExecutionSnapshot, ExecutionStatus,
    NodeContextAccessService, SnapshotMetadata,
};
use orchcore::{ActionContext, ActionId, ActionNode, ServiceError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};

struct InFlight<'a> {
    active: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ActionState {
    /// Absent when the failure was reported without a prior run here
    action: Option<ActionNode>,
    snapshot: ExecutionSnapshot,
    /// Executions so far, initial run included
    runs: u32,
    /// Context of the initial run, reused by retries
    ctx: Option<ActionContext>,
}

/// In-memory execution collaborator driven by each action's parameters:
///
/// - `delay_ms`: simulated work time
/// - `timeout_ms`: runs whose work outlasts this fail with a timeout
/// - `fail_attempts`: the first N runs fail
/// - `always_fail`: every run fails
/// - `error`: failure message
/// - `output`: value returned on success
/// - `output_from`: return the context propagated from this source instead
/// - `retryable`: `false` makes the snapshot store refuse retries
#[derive(Default)]
pub struct SimulatedExecutionService {
    states: RwLock<HashMap<ActionId, ActionState>>,
    deny_retry: RwLock<HashSet<ActionId>>,
    policy_errors: RwLock<HashSet<ActionId>>,
    executions: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SimulatedExecutionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `evaluate_retry_policy` answer false for this action.
    pub async fn deny_retries(&self, action_id: impl Into<ActionId>) {
        self.deny_retry.write().await.insert(action_id.into());
    }

    /// Make `evaluate_retry_policy` fail for this action.
    pub async fn break_policy_evaluation(&self, action_id: impl Into<ActionId>) {
        self.policy_errors.write().await.insert(action_id.into());
    }

    /// Make an action known without running it, so it can be retried.
    pub async fn register_action(&self, action: ActionNode) {
        self.states.write().await.insert(
            action.id.clone(),
            ActionState {
                action: Some(action),
                snapshot: ExecutionSnapshot {
                    status: ExecutionStatus::Pending,
                    progress: 0,
                    metadata: SnapshotMetadata::default(),
                    output: None,
                },
                runs: 1,
                ctx: None,
            },
        );
    }

    /// Total runs started, retries included
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Highest number of runs that were in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn simulate(
        &self,
        action: &ActionNode,
        ctx: Option<&ActionContext>,
        run: u32,
    ) -> Result<Value, ServiceError> {
        let _in_flight = InFlight::enter(&self.active, &self.peak);
        self.executions.fetch_add(1, Ordering::SeqCst);

        let delay_ms = action
            .parameters
            .get("delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let timeout_ms = action.parameters.get("timeout_ms").and_then(|v| v.as_u64());
        if delay_ms > 0 {
            match timeout_ms {
                Some(ms) => timeout(Duration::from_millis(ms), sleep(Duration::from_millis(delay_ms)))
                    .await
                    .map_err(|_| ServiceError::Timeout { ms })?,
                None => sleep(Duration::from_millis(delay_ms)).await,
            }
        }

        let fail_attempts = action
            .parameters
            .get("fail_attempts")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let always_fail = action
            .parameters
            .get("always_fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if always_fail || u64::from(run) <= fail_attempts {
            let message = action
                .parameters
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("simulated failure");
            tracing::debug!(action_id = %action.id, run, "simulated run failed");
            return Err(ServiceError::ExecutionFailed(message.to_string()));
        }

        let forwarded = action
            .parameters
            .get("output_from")
            .and_then(|v| v.as_str())
            .zip(ctx)
            .map(|(source, ctx)| {
                ctx.input(source).cloned().ok_or_else(|| {
                    ServiceError::NotFound(format!("no context from '{source}'"))
                })
            })
            .transpose()?;

        Ok(forwarded
            .or_else(|| action.parameters.get("output").cloned())
            .unwrap_or_else(|| json!({ "action_id": action.id, "run": run })))
    }

    async fn settle(&self, action_id: &str, outcome: &Result<Value, ServiceError>) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(action_id) {
            match outcome {
                Ok(output) => {
                    state.snapshot.status = ExecutionStatus::Completed;
                    state.snapshot.progress = 100;
                    state.snapshot.output = Some(output.clone());
                }
                Err(e) => {
                    state.snapshot.status = ExecutionStatus::Failed;
                    state.snapshot.metadata.last_error = Some(e.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl ActionExecutionService for SimulatedExecutionService {
    async fn execute_action(
        &self,
        action: &ActionNode,
        ctx: &ActionContext,
    ) -> Result<Value, ServiceError> {
        self.states.write().await.insert(
            action.id.clone(),
            ActionState {
                action: Some(action.clone()),
                snapshot: ExecutionSnapshot {
                    status: ExecutionStatus::Running,
                    progress: 0,
                    metadata: SnapshotMetadata::default(),
                    output: None,
                },
                runs: 1,
                ctx: Some(ctx.clone()),
            },
        );
        ctx.events.info(format!("executing {}", action.display_name()));

        let outcome = tokio::select! {
            outcome = self.simulate(action, Some(ctx), 1) => outcome,
            _ = ctx.cancellation.cancelled() => {
                Err(ServiceError::ExecutionFailed("cancelled".to_string()))
            }
        };
        match &outcome {
            Ok(_) => ctx.events.progress(100.0, None),
            Err(e) => ctx.events.warn(e.to_string()),
        }
        self.settle(&action.id, &outcome).await;
        outcome
    }

    async fn fail_execution(&self, action_id: &str, error: &str) -> Result<(), ServiceError> {
        let mut states = self.states.write().await;
        let state = states
            .entry(action_id.to_string())
            .or_insert_with(|| ActionState {
                action: None,
                snapshot: ExecutionSnapshot {
                    status: ExecutionStatus::Failed,
                    progress: 0,
                    metadata: SnapshotMetadata::default(),
                    output: None,
                },
                runs: 1,
                ctx: None,
            });
        state.snapshot.status = ExecutionStatus::Failed;
        state.snapshot.metadata.last_error = Some(error.to_string());
        tracing::debug!(action_id, error, "failure recorded");
        Ok(())
    }

    async fn evaluate_retry_policy(&self, action_id: &str) -> Result<bool, ServiceError> {
        if self.policy_errors.read().await.contains(action_id) {
            return Err(ServiceError::Unavailable(format!(
                "retry policy store unreachable for '{action_id}'"
            )));
        }
        if self.deny_retry.read().await.contains(action_id) {
            return Ok(false);
        }

        let states = self.states.read().await;
        let state = states
            .get(action_id)
            .ok_or_else(|| ServiceError::NotFound(action_id.to_string()))?;
        Ok(state
            .action
            .as_ref()
            .and_then(|a| a.parameters.get("retryable"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }

    async fn get_execution_snapshot(
        &self,
        action_id: &str,
    ) -> Result<ExecutionSnapshot, ServiceError> {
        self.states
            .read()
            .await
            .get(action_id)
            .map(|s| s.snapshot.clone())
            .ok_or_else(|| ServiceError::NotFound(action_id.to_string()))
    }

    async fn retry_execution(&self, action_id: &str) -> Result<(), ServiceError> {
        let (action, ctx, run) = {
            let mut states = self.states.write().await;
            let state = states
                .get_mut(action_id)
                .ok_or_else(|| ServiceError::NotFound(action_id.to_string()))?;
            let action = state.action.clone().ok_or_else(|| {
                ServiceError::NotFound(format!("no execution recorded for '{action_id}'"))
            })?;
            state.runs += 1;
            state.snapshot.metadata.retry_attempt += 1;
            state.snapshot.status = ExecutionStatus::Retrying;
            (action, state.ctx.clone(), state.runs)
        };

        let outcome = self.simulate(&action, ctx.as_ref(), run).await;
        self.settle(action_id, &outcome).await;
        outcome.map(|_| ())
    }
}

#[async_trait]
impl NodeContextAccessService for SimulatedExecutionService {
    async fn get_node_context(
        &self,
        requester: &str,
        target: &str,
        mode: ContextAccessMode,
    ) -> Result<Value, ServiceError> {
        let states = self.states.read().await;
        let state = states
            .get(target)
            .filter(|s| s.snapshot.status == ExecutionStatus::Completed)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no completed context for '{target}'"))
            })?;
        let output = state.snapshot.output.clone().unwrap_or(Value::Null);

        Ok(match mode {
            ContextAccessMode::Read => output,
            ContextAccessMode::Inherit => json!({
                "inherited_by": requester,
                "source": target,
                "context": output,
            }),
        })
    }
}
