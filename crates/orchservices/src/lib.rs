//! In-process collaborators
//!
//! Simulated implementations of the services the engine consumes, used by
//! the CLI and by tests.

mod agents;
mod execution;
mod validation;

pub use agents::{AgentFailureRecord, AgentState, InMemoryAgentRegistry};
pub use execution::SimulatedExecutionService;
pub use validation::{BusinessRule, RuleSetValidator};
