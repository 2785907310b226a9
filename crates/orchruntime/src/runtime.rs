use crate::config::EngineConfig;
use crate::coordinator::ErrorHandlingRecoveryCoordinator;
use crate::executor::ActionRunner;
use crate::orchestrator::{OrchestrationProgress, OrchestrationStateMachine, RunReport};
use crate::planner::ExecutionPlanner;
use orchcore::recovery::{ActionFailureRequest, AgentFailureRequest, BusinessValidationRequest};
use orchcore::services::{
    ActionExecutionService, AgentRecoveryService, BusinessRuleValidationService,
    NodeContextAccessService,
};
use orchcore::{
    ActionNode, EngineError, ErrorHandlingRequest, ErrorHandlingResult, EventBus, ExecutionPlan,
    OrchestrationEvent, RunId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// External collaborators the engine is wired to
#[derive(Clone)]
pub struct EngineServices {
    pub execution: Arc<dyn ActionExecutionService>,
    pub agents: Arc<dyn AgentRecoveryService>,
    pub validation: Arc<dyn BusinessRuleValidationService>,
    /// Without it, any action with `context_from` fails dependency resolution
    pub context_access: Option<Arc<dyn NodeContextAccessService>>,
}

/// Main entry point: planning, run control and failure recovery
pub struct OrchestrationEngine {
    config: EngineConfig,
    planner: ExecutionPlanner,
    coordinator: Arc<ErrorHandlingRecoveryCoordinator>,
    state_machine: OrchestrationStateMachine,
    event_bus: EventBus,
}

impl OrchestrationEngine {
    /// Create an engine with default settings
    pub fn new(services: EngineServices) -> Self {
        Self::with_config(services, EngineConfig::default())
    }

    pub fn with_config(services: EngineServices, config: EngineConfig) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let coordinator = Arc::new(
            ErrorHandlingRecoveryCoordinator::new(
                Arc::clone(&services.execution),
                services.agents,
                services.validation,
                event_bus.clone(),
            )
            .with_rules(config.recovery_rules.clone())
            .with_max_backoff(config.max_backoff_ms.map(Duration::from_millis)),
        );
        let runner = Arc::new(ActionRunner::new(
            services.execution,
            services.context_access,
            Arc::clone(&coordinator),
            event_bus.clone(),
        ));
        let state_machine = OrchestrationStateMachine::new(
            runner,
            event_bus.clone(),
            config.failure_handling,
            config.max_parallel_actions,
        );

        Self {
            planner: ExecutionPlanner::new(config.priority_grouping),
            config,
            coordinator,
            state_machine,
            event_bus,
        }
    }

    pub fn create_execution_plan(
        &self,
        container_id: &str,
        actions: Vec<ActionNode>,
    ) -> Result<ExecutionPlan, EngineError> {
        Ok(self.planner.create_plan(container_id, actions)?)
    }

    /// Start running a plan in the background
    pub async fn start_execution(&self, plan: ExecutionPlan) -> Result<RunId, EngineError> {
        self.state_machine.start_execution(plan).await
    }

    pub async fn start_execution_with_variables(
        &self,
        plan: ExecutionPlan,
        variables: HashMap<String, Value>,
    ) -> Result<RunId, EngineError> {
        self.state_machine.start_execution_with(plan, variables).await
    }

    pub async fn pause_execution(&self, run_id: RunId) -> Result<(), EngineError> {
        self.state_machine.pause_execution(run_id).await
    }

    pub async fn resume_execution(&self, run_id: RunId) -> Result<(), EngineError> {
        self.state_machine.resume_execution(run_id).await
    }

    pub async fn monitor_progress(&self, run_id: RunId) -> Result<OrchestrationProgress, EngineError> {
        self.state_machine.monitor_progress(run_id).await
    }

    pub async fn wait_for_completion(&self, run_id: RunId) -> Result<Arc<RunReport>, EngineError> {
        self.state_machine.wait_for_completion(run_id).await
    }

    pub async fn archive_run(&self, run_id: RunId) -> Result<Arc<RunReport>, EngineError> {
        self.state_machine.archive_run(run_id).await
    }

    pub async fn list_runs(&self) -> Vec<RunId> {
        self.state_machine.list_runs().await
    }

    /// Plan, run and wait in one call
    pub async fn execute(
        &self,
        container_id: &str,
        actions: Vec<ActionNode>,
        variables: HashMap<String, Value>,
    ) -> Result<Arc<RunReport>, EngineError> {
        let plan = self.create_execution_plan(container_id, actions)?;
        let run_id = self.start_execution_with_variables(plan, variables).await?;
        self.wait_for_completion(run_id).await
    }

    pub async fn handle_action_node_failure(
        &self,
        request: ActionFailureRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        self.coordinator
            .handle(&ErrorHandlingRequest::ActionFailure(request))
            .await
    }

    pub async fn handle_agent_execution_failure(
        &self,
        request: AgentFailureRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        self.coordinator
            .handle(&ErrorHandlingRequest::AgentFailure(request))
            .await
    }

    pub async fn validate_business_rules(
        &self,
        request: BusinessValidationRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        self.coordinator
            .handle(&ErrorHandlingRequest::BusinessValidation(request))
            .await
    }

    pub async fn execute_error_handling_and_recovery(
        &self,
        request: &ErrorHandlingRequest,
    ) -> Result<Vec<ErrorHandlingResult>, EngineError> {
        self.coordinator.execute_error_handling_and_recovery(request).await
    }

    /// Subscribe to orchestration events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<OrchestrationEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
