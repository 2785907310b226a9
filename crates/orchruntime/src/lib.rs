//! Orchestration runtime
//!
//! Turns action sets into grouped plans, drives runs group by group through
//! the mode executors, and decides how failures are recovered.

mod config;
mod coordinator;
mod executor;
mod loader;
mod orchestrator;
mod planner;
mod runtime;

pub use config::{AgentRecoveryRule, EngineConfig, FailureHandling, RecoveryRuleTable};
pub use coordinator::{
    cascading_results, ErrorHandlingRecoveryCoordinator, ACTION_CASCADE_SOURCE,
    AGENT_CASCADE_SOURCE, VALIDATION_CASCADE_SOURCE,
};
pub use executor::{
    executor_for, ActionRunner, ConditionalExecutor, ModeExecutor, ParallelExecutor, ProgressSink,
    RuntimeContext, SequentialExecutor,
};
pub use loader::{load_request, ActionSetFile};
pub use orchestrator::{
    OrchestrationProgress, OrchestrationRun, OrchestrationStateMachine, RunPhase, RunReport,
};
pub use planner::{group_duration, ExecutionPlanner, GroupGraph};
pub use runtime::{EngineServices, OrchestrationEngine};
