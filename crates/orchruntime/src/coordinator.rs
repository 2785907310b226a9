//! Error handling and recovery decisions.
//!
//! Three independent procedures (action failure, agent failure, business-rule
//! validation) share one entry point, [`ErrorHandlingRecoveryCoordinator::handle`],
//! which returns the primary decision followed by its cascading results.
//! Cascades are computed by the pure [`cascading_results`] function and never
//! retry anything themselves.

use crate::config::RecoveryRuleTable;
use chrono::{DateTime, Utc};
use orchcore::recovery::{ActionFailureRequest, AgentFailureRequest, BusinessValidationRequest};
use orchcore::services::{
    ActionExecutionService, AgentRecoveryAction, AgentRecoveryService,
    BusinessRuleValidationService,
};
use orchcore::{
    ActionTaken, EngineError, ErrorHandlingRequest, ErrorHandlingResult, EventBus, FinalStatus,
    OperationType, OrchestrationEvent, RecoveryError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const ACTION_CASCADE_SOURCE: &str = "primary-action-failure";
pub const AGENT_CASCADE_SOURCE: &str = "primary-agent-disable";
pub const VALIDATION_CASCADE_SOURCE: &str = "primary-validation-failure";

pub struct ErrorHandlingRecoveryCoordinator {
    execution: Arc<dyn ActionExecutionService>,
    agents: Arc<dyn AgentRecoveryService>,
    validation: Arc<dyn BusinessRuleValidationService>,
    rules: RecoveryRuleTable,
    max_backoff: Option<Duration>,
    events: EventBus,
}

impl ErrorHandlingRecoveryCoordinator {
    pub fn new(
        execution: Arc<dyn ActionExecutionService>,
        agents: Arc<dyn AgentRecoveryService>,
        validation: Arc<dyn BusinessRuleValidationService>,
        events: EventBus,
    ) -> Self {
        Self {
            execution,
            agents,
            validation,
            rules: RecoveryRuleTable::default(),
            max_backoff: None,
            events,
        }
    }

    pub fn with_rules(mut self, rules: RecoveryRuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Option<Duration>) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Decide on a failure and return the primary result plus cascades.
    pub async fn handle(
        &self,
        request: &ErrorHandlingRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        let primary = match request {
            ErrorHandlingRequest::ActionFailure(req) => self.handle_action_node_failure(req).await,
            ErrorHandlingRequest::AgentFailure(req) => {
                self.handle_agent_execution_failure(req).await?
            }
            ErrorHandlingRequest::BusinessValidation(req) => {
                self.validate_business_rules(req).await?
            }
        };

        let cascades = cascading_results(request, &primary);
        let mut results = Vec::with_capacity(1 + cascades.len());
        results.push(primary);
        results.extend(cascades);

        for result in &results {
            self.events.emit(OrchestrationEvent::RecoveryDecision {
                operation_id: result.operation_id.clone(),
                operation_type: result.operation_type,
                action_taken: result.action_taken,
                success: result.success,
                cascade: result.is_cascade(),
                timestamp: Utc::now(),
            });
        }

        Ok(results)
    }

    pub async fn execute_error_handling_and_recovery(
        &self,
        request: &ErrorHandlingRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        self.handle(request).await
    }

    /// Record the failure, then retry once if both the snapshot store and the
    /// action's policy allow it. Collaborator errors become fail-fast results.
    pub async fn handle_action_node_failure(
        &self,
        req: &ActionFailureRequest,
    ) -> ErrorHandlingResult {
        let started_at = Utc::now();
        let action_id = req.action_id.as_str();

        if let Err(e) = self.execution.fail_execution(action_id, &req.error).await {
            return fail_fast(req, started_at, 0, format!("failed to record failure: {e}"));
        }

        let snapshot = match self.execution.get_execution_snapshot(action_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return fail_fast(req, started_at, 0, format!("snapshot unavailable: {e}"));
            }
        };
        let retries_so_far = snapshot.metadata.retry_attempt;
        let attempt = retries_so_far + 1;

        let store_allows = match self.execution.evaluate_retry_policy(action_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                let err = RecoveryError::RetryPolicyEvaluationFailed {
                    action_id: req.action_id.clone(),
                    reason: e.to_string(),
                };
                return fail_fast(req, started_at, retries_so_far, err.to_string());
            }
        };

        if !store_allows || !req.retry_policy.is_eligible(attempt) {
            let reason = if !store_allows {
                "retry rejected by execution store"
            } else if !req.retry_policy.is_enabled() {
                "retry disabled by policy"
            } else {
                "retry attempts exhausted"
            };
            error!(action_id, attempt, reason, "action failed fast");
            return fail_fast(req, started_at, retries_so_far, reason.to_string());
        }

        let mut delay = req.retry_policy.delay_for(attempt);
        if let Some(cap) = self.max_backoff {
            delay = delay.min(cap);
        }

        warn!(
            action_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %req.error,
            "retrying failed action"
        );
        tokio::time::sleep(delay).await;

        let outcome = self.execution.retry_execution(action_id).await;
        let success = outcome.is_ok();
        let mut result = ErrorHandlingResult::new(
            OperationType::ActionExecution,
            action_id,
            ActionTaken::Retry,
            if success {
                FinalStatus::Completed
            } else {
                FinalStatus::Retrying
            },
            started_at,
        )
        .with_success(success)
        .with_error(req.error.clone())
        .with_context("attempt", attempt)
        .with_context("max_attempts", req.retry_policy.max_attempts());
        result.retry_attempted = true;
        result.retry_count = attempt;
        result.backoff_delay_ms = delay.as_millis() as u64;

        match outcome {
            Ok(()) => info!(action_id, attempt, "retry succeeded"),
            Err(e) => {
                warn!(action_id, attempt, error = %e, "retry failed");
                result.errors.push(e.to_string());
            }
        }
        result
    }

    pub async fn handle_agent_execution_failure(
        &self,
        req: &AgentFailureRequest,
    ) -> Result<ErrorHandlingResult, EngineError> {
        let started_at = Utc::now();
        let (action, source) = match &req.recovery_action {
            Some(preference) => (preference.parse::<AgentRecoveryAction>()?, "explicit"),
            None => (self.rules.classify(&req.reason), "rule_table"),
        };
        let operation_id = req.operation_id.clone().unwrap_or_else(|| req.agent_id.clone());

        let (taken, status) = match action {
            AgentRecoveryAction::Retry => (ActionTaken::Retry, FinalStatus::Retrying),
            AgentRecoveryAction::Restart => (ActionTaken::Restart, FinalStatus::Restarted),
            AgentRecoveryAction::Disable => (ActionTaken::Disable, FinalStatus::Disabled),
        };

        info!(agent_id = %req.agent_id, %action, source, reason = %req.reason, "recovering agent");

        let outcome = self
            .agents
            .handle_agent_failure(&req.agent_id, &req.reason, action)
            .await;

        let mut result = ErrorHandlingResult::new(
            OperationType::AgentExecution,
            operation_id,
            taken,
            status,
            started_at,
        )
        .with_error(req.reason.clone())
        .with_context("agent_id", req.agent_id.clone())
        .with_context("recovery_action", action.to_string())
        .with_context("classification", source);

        if let Some(model_id) = &req.model_id {
            result = result.with_context("model_id", model_id.clone());
        }

        match outcome {
            Ok(()) => result.success = true,
            Err(e) => {
                error!(agent_id = %req.agent_id, error = %e, "agent recovery failed");
                result.final_status = FinalStatus::Failed;
                result.errors.push(e.to_string());
            }
        }

        match self.agents.get_agent_metrics(&req.agent_id).await {
            Ok(metrics) => {
                if let Ok(value) = serde_json::to_value(metrics) {
                    result.context.insert("agent_metrics".to_string(), value);
                }
            }
            Err(e) => warn!(agent_id = %req.agent_id, error = %e, "agent metrics unavailable"),
        }

        result.metrics = orchcore::recovery::RecoveryMetrics::since(started_at);
        Ok(result)
    }

    /// Gate an operation on the external rule verdict.
    pub async fn validate_business_rules(
        &self,
        req: &BusinessValidationRequest,
    ) -> Result<ErrorHandlingResult, EngineError> {
        let started_at = Utc::now();
        let verdict = self
            .validation
            .validate_business_rules(&req.model, &req.actions)
            .await
            .map_err(|e| RecoveryError::ValidationServiceUnavailable(e.to_string()))?;

        let mut result = if verdict.is_valid {
            ErrorHandlingResult::new(
                OperationType::BusinessValidation,
                req.operation_id.clone(),
                ActionTaken::ValidationPassed,
                FinalStatus::Completed,
                started_at,
            )
            .with_success(true)
        } else {
            warn!(
                operation_id = %req.operation_id,
                violations = verdict.errors.len(),
                "business rule validation blocked operation"
            );
            let mut blocked = ErrorHandlingResult::new(
                OperationType::BusinessValidation,
                req.operation_id.clone(),
                ActionTaken::ValidationFailed,
                FinalStatus::ValidationBlocked,
                started_at,
            );
            blocked.errors = verdict.errors.clone();
            blocked
        };

        if !verdict.warnings.is_empty() {
            result = result.with_context("warnings", verdict.warnings.clone());
        }
        Ok(result.with_context("violations", verdict.errors.len()))
    }
}

fn fail_fast(
    req: &ActionFailureRequest,
    started_at: DateTime<Utc>,
    retries_so_far: u32,
    reason: String,
) -> ErrorHandlingResult {
    let mut result = ErrorHandlingResult::new(
        OperationType::ActionExecution,
        req.action_id.clone(),
        ActionTaken::FailFast,
        FinalStatus::Failed,
        started_at,
    )
    .with_error(req.error.clone())
    .with_context("reason", reason);
    result.retry_count = retries_so_far;
    result
}

/// Secondary results implied by a primary decision.
pub fn cascading_results(
    request: &ErrorHandlingRequest,
    primary: &ErrorHandlingResult,
) -> Vec<ErrorHandlingResult> {
    let started_at = primary.metrics.finished_at;

    match request {
        ErrorHandlingRequest::ActionFailure(req) if !primary.success => {
            let mut result = ErrorHandlingResult::new(
                OperationType::ActionExecution,
                primary.operation_id.clone(),
                ActionTaken::DependencyFailure,
                FinalStatus::Blocked,
                started_at,
            )
            .with_cascade_source(ACTION_CASCADE_SOURCE)
            .with_context("failed_action", req.action_id.clone())
            .with_context("related_operations", req.related_operations.clone());
            result.errors = primary.errors.clone();
            vec![result]
        }
        ErrorHandlingRequest::AgentFailure(req) if primary.action_taken == ActionTaken::Disable => {
            let mut result = ErrorHandlingResult::new(
                OperationType::AgentExecution,
                primary.operation_id.clone(),
                ActionTaken::WorkflowImpact,
                FinalStatus::Blocked,
                started_at,
            )
            .with_cascade_source(AGENT_CASCADE_SOURCE)
            .with_error(format!("agent '{}' disabled", req.agent_id))
            .with_context("disabled_agent", req.agent_id.clone());
            if let Some(model_id) = &req.model_id {
                result = result.with_context("affected_model", model_id.clone());
            }
            vec![result]
        }
        ErrorHandlingRequest::BusinessValidation(req) if !primary.success => {
            let mut result = ErrorHandlingResult::new(
                OperationType::BusinessValidation,
                primary.operation_id.clone(),
                ActionTaken::ValidationFailed,
                FinalStatus::Blocked,
                started_at,
            )
            .with_cascade_source(VALIDATION_CASCADE_SOURCE)
            .with_context("blocked_operations", req.related_operations.clone());
            result.errors = primary.errors.clone();
            vec![result]
        }
        _ => Vec::new(),
    }
}
