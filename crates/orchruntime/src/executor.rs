use crate::coordinator::ErrorHandlingRecoveryCoordinator;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use orchcore::recovery::ActionFailureRequest;
use orchcore::services::{ActionExecutionService, ContextAccessMode, NodeContextAccessService};
use orchcore::{
    ActionContext, ActionId, ActionNode, ActionResult, EngineError, ErrorHandlingRequest,
    EventBus, ExecutionContext, ExecutionGroup, ExecutionMode, OrchestrationEvent,
    RecoveryError, RunId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs single actions, including context propagation and recovery.
pub struct ActionRunner {
    execution: Arc<dyn ActionExecutionService>,
    context_access: Option<Arc<dyn NodeContextAccessService>>,
    coordinator: Arc<ErrorHandlingRecoveryCoordinator>,
    events: EventBus,
}

impl ActionRunner {
    pub fn new(
        execution: Arc<dyn ActionExecutionService>,
        context_access: Option<Arc<dyn NodeContextAccessService>>,
        coordinator: Arc<ErrorHandlingRecoveryCoordinator>,
        events: EventBus,
    ) -> Self {
        Self {
            execution,
            context_access,
            coordinator,
            events,
        }
    }

    /// Execute one action. Never fails: every problem ends up in the result.
    pub async fn run(
        &self,
        run_id: RunId,
        action: &ActionNode,
        variables: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let start = Instant::now();
        self.events.emit(OrchestrationEvent::ActionStarted {
            run_id,
            action_id: action.id.clone(),
            timestamp: Utc::now(),
        });

        let mut inputs = HashMap::new();
        for source in &action.context_from {
            match self.resolve_context(&action.id, source).await {
                Ok(value) => {
                    inputs.insert(source.clone(), value);
                }
                Err(e) => {
                    tracing::error!(action_id = %action.id, source = %source, "{}", e);
                    let mut result = ActionResult::failed(action.id.clone(), e.to_string());
                    result.attempts = 0;
                    return self.finish(run_id, result, start);
                }
            }
        }

        let ctx = ActionContext {
            run_id,
            action_id: action.id.clone(),
            inputs,
            variables,
            events: self.events.create_emitter(run_id, action.id.clone()),
            cancellation,
        };

        let mut error = match self.execution.execute_action(action, &ctx).await {
            Ok(output) => {
                return self.finish(run_id, ActionResult::succeeded(action.id.clone(), Some(output)), start);
            }
            Err(e) => e.to_string(),
        };

        let mut attempts = 1;
        let mut recovery = Vec::new();
        let rounds = action.retry_policy.max_attempts() + 1;

        for _ in 0..rounds {
            let request = ErrorHandlingRequest::ActionFailure(ActionFailureRequest {
                action_id: action.id.clone(),
                error: error.clone(),
                retry_policy: action.retry_policy.clone(),
                related_operations: Vec::new(),
            });
            let decisions = match self.coordinator.handle(&request).await {
                Ok(decisions) => decisions,
                Err(e) => {
                    error = e.to_string();
                    break;
                }
            };
            let Some(primary) = decisions.first().cloned() else {
                break;
            };
            recovery.extend(decisions);

            if primary.retry_attempted {
                attempts += 1;
            }
            if primary.success {
                let output = self
                    .execution
                    .get_execution_snapshot(&action.id)
                    .await
                    .ok()
                    .and_then(|s| s.output);
                let mut result = ActionResult::succeeded(action.id.clone(), output);
                result.attempts = attempts;
                result.recovery = recovery;
                return self.finish(run_id, result, start);
            }
            if let Some(last) = primary.errors.last() {
                error = last.clone();
            }
            if !primary.retry_attempted {
                break;
            }
        }

        let mut result = ActionResult::failed(action.id.clone(), error);
        result.attempts = attempts;
        result.recovery = recovery;
        self.finish(run_id, result, start)
    }

    async fn resolve_context(
        &self,
        requester: &ActionId,
        target: &ActionId,
    ) -> Result<Value, RecoveryError> {
        let access = self.context_access.as_ref().ok_or_else(|| {
            RecoveryError::DependencyResolutionFailed {
                requester: requester.clone(),
                target: target.clone(),
                reason: "no context access service configured".to_string(),
            }
        })?;
        access
            .get_node_context(requester, target, ContextAccessMode::Read)
            .await
            .map_err(|e| RecoveryError::DependencyResolutionFailed {
                requester: requester.clone(),
                target: target.clone(),
                reason: e.to_string(),
            })
    }

    fn finish(&self, run_id: RunId, mut result: ActionResult, start: Instant) -> ActionResult {
        result.duration_ms = start.elapsed().as_millis() as u64;
        let event = match &result.error {
            None => OrchestrationEvent::ActionCompleted {
                run_id,
                action_id: result.action_id.clone(),
                attempts: result.attempts,
                duration_ms: result.duration_ms,
                timestamp: Utc::now(),
            },
            Some(error) => OrchestrationEvent::ActionFailed {
                run_id,
                action_id: result.action_id.clone(),
                error: error.clone(),
                timestamp: Utc::now(),
            },
        };
        self.events.emit(event);
        result
    }
}

/// Called once per group member as soon as its result is known.
pub type ProgressSink = Arc<dyn Fn(&ActionResult) + Send + Sync>;

/// Per-run state handed from group to group.
pub struct RuntimeContext {
    pub run_id: RunId,
    pub runner: Arc<ActionRunner>,
    pub max_parallel: usize,
    pub state: ExecutionContext,
    pub cancellation: CancellationToken,
    pub progress: Option<ProgressSink>,
}

impl RuntimeContext {
    pub fn new(run_id: RunId, runner: Arc<ActionRunner>, max_parallel: usize) -> Self {
        Self {
            run_id,
            runner,
            max_parallel,
            state: ExecutionContext::default(),
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    fn report(&self, result: &ActionResult) {
        if let Some(sink) = &self.progress {
            sink(result);
        }
    }

    pub fn record(&mut self, result: &ActionResult) {
        if result.is_failure() {
            self.state.record_failure(&result.action_id);
        } else if result.outcome == orchcore::ActionOutcome::Succeeded {
            self.state.record_success(&result.action_id, result.output.clone());
        }
    }

    fn skip(&self, action: &ActionNode) -> ActionResult {
        self.runner.events.emit(OrchestrationEvent::ActionSkipped {
            run_id: self.run_id,
            action_id: action.id.clone(),
            timestamp: Utc::now(),
        });
        ActionResult::skipped(action.id.clone())
    }
}

/// Strategy for running one execution group
#[async_trait]
pub trait ModeExecutor: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    async fn execute_group(
        &self,
        group: &ExecutionGroup,
        ctx: &mut RuntimeContext,
    ) -> Result<Vec<ActionResult>, EngineError>;
}

pub struct SequentialExecutor;
pub struct ParallelExecutor;
pub struct ConditionalExecutor;

pub fn executor_for(mode: ExecutionMode) -> &'static dyn ModeExecutor {
    match mode {
        ExecutionMode::Sequential => &SequentialExecutor,
        ExecutionMode::Parallel => &ParallelExecutor,
        ExecutionMode::Conditional => &ConditionalExecutor,
    }
}

/// Members in order; the first unrecovered failure stops the rest.
async fn run_in_order(
    group: &ExecutionGroup,
    ctx: &mut RuntimeContext,
    check_conditions: bool,
) -> Vec<ActionResult> {
    let mut results = Vec::with_capacity(group.len());
    let mut halted_by: Option<ActionId> = None;

    for action in &group.actions {
        if let Some(failed) = &halted_by {
            let result = ActionResult::not_started(
                action.id.clone(),
                format!("not started after '{failed}' failed"),
            );
            ctx.report(&result);
            results.push(result);
            continue;
        }

        if check_conditions {
            let should_run = action
                .condition
                .as_ref()
                .map_or(true, |c| c.evaluate(&ctx.state));
            if !should_run {
                tracing::debug!(action_id = %action.id, "condition false, skipping");
                let result = ctx.skip(action);
                ctx.report(&result);
                results.push(result);
                continue;
            }
        }

        let result = ctx
            .runner
            .run(
                ctx.run_id,
                action,
                ctx.state.variables.clone(),
                ctx.cancellation.clone(),
            )
            .await;
        ctx.record(&result);
        ctx.report(&result);

        if result.is_failure() {
            tracing::warn!(
                group_id = %group.id,
                action_id = %action.id,
                "action failed, stopping group"
            );
            halted_by = Some(action.id.clone());
        }
        results.push(result);
    }

    results
}

#[async_trait]
impl ModeExecutor for SequentialExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn execute_group(
        &self,
        group: &ExecutionGroup,
        ctx: &mut RuntimeContext,
    ) -> Result<Vec<ActionResult>, EngineError> {
        Ok(run_in_order(group, ctx, false).await)
    }
}

#[async_trait]
impl ModeExecutor for ConditionalExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Conditional
    }

    async fn execute_group(
        &self,
        group: &ExecutionGroup,
        ctx: &mut RuntimeContext,
    ) -> Result<Vec<ActionResult>, EngineError> {
        Ok(run_in_order(group, ctx, true).await)
    }
}

#[async_trait]
impl ModeExecutor for ParallelExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    /// Workers only hand back `(slot, result)`; slots are written and the
    /// run context updated here, after the tasks have joined.
    async fn execute_group(
        &self,
        group: &ExecutionGroup,
        ctx: &mut RuntimeContext,
    ) -> Result<Vec<ActionResult>, EngineError> {
        let limit = ctx.max_parallel.max(1).min(group.len().max(1));
        let ids: Vec<ActionId> = group.action_ids().cloned().collect();
        let mut slots: Vec<Option<ActionResult>> = vec![None; group.len()];
        let mut pending = group.actions.iter().cloned().enumerate();
        let mut running = FuturesUnordered::new();

        tracing::debug!(group_id = %group.id, actions = group.len(), limit, "starting parallel group");

        loop {
            while running.len() < limit {
                let Some((slot, action)) = pending.next() else {
                    break;
                };
                let runner = Arc::clone(&ctx.runner);
                let run_id = ctx.run_id;
                let variables = ctx.state.variables.clone();
                let cancellation = ctx.cancellation.clone();
                let handle = tokio::spawn(async move {
                    runner.run(run_id, &action, variables, cancellation).await
                });
                running.push(async move { (slot, handle.await) });
            }

            let Some((slot, joined)) = running.next().await else {
                break;
            };
            let result = match joined {
                Ok(result) => result,
                Err(e) => ActionResult::failed(ids[slot].clone(), format!("task join error: {e}")),
            };
            ctx.report(&result);
            slots[slot] = Some(result);
        }

        let results: Vec<ActionResult> = slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| slot.unwrap_or_else(|| ActionResult::failed(id, "no result recorded")))
            .collect();

        for result in &results {
            ctx.record(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_matches_requested_mode() {
        for mode in [
            ExecutionMode::Sequential,
            ExecutionMode::Parallel,
            ExecutionMode::Conditional,
        ] {
            assert_eq!(executor_for(mode).mode(), mode);
        }
    }
}
