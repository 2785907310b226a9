use orchcore::recovery::ActionFailureRequest;
use orchcore::{
    ActionNode, ActionStatus, Condition, ErrorHandlingRequest, ErrorHandlingResult, EventBus,
    ExecutionMode, FinalStatus, OperationType, OrchestrationEvent, RetryStrategy,
};
use serde_json::json;
use uuid::Uuid;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")),
        )
        .with_test_writer()
        .try_init();
}

#[test]
fn test_action_node_from_minimal_json() {
    let action: ActionNode = serde_json::from_value(json!({
        "id": "a",
        "container_id": "c",
        "execution_mode": "parallel"
    }))
    .unwrap();

    assert_eq!(action.execution_mode, ExecutionMode::Parallel);
    assert_eq!(action.status, ActionStatus::Configured);
    assert_eq!(action.retry_policy.strategy(), RetryStrategy::Exponential);
    assert_eq!(action.retry_policy.max_attempts(), 3);
    assert!(action.condition.is_none());
    assert_eq!(action.display_name(), "a");
}

#[test]
fn test_nested_conditions_from_json() {
    let condition: Condition = serde_json::from_value(json!({
        "op": "all",
        "conditions": [
            {"op": "exists", "key": "region"},
            {"op": "not", "condition": {"op": "failed", "action_id": "build"}}
        ]
    }))
    .unwrap();

    let mut ctx = orchcore::ExecutionContext::new(
        [("region".to_string(), json!("eu"))].into_iter().collect(),
    );
    assert!(condition.evaluate(&ctx));
    ctx.record_failure("build");
    assert!(!condition.evaluate(&ctx));
}

#[test]
fn test_request_tagging() {
    let request: ErrorHandlingRequest = serde_json::from_value(json!({
        "type": "action_failure",
        "action_id": "a",
        "error": "boom"
    }))
    .unwrap();
    assert_eq!(request.operation_type(), OperationType::ActionExecution);
    let ErrorHandlingRequest::ActionFailure(ActionFailureRequest { retry_policy, .. }) = request
    else {
        panic!("expected action failure");
    };
    assert!(retry_policy.is_enabled());

    let unknown = serde_json::from_value::<ErrorHandlingRequest>(json!({"type": "meteor_strike"}));
    assert!(unknown.is_err());
}

#[test]
fn test_result_serializes_kebab_case() {
    let result = ErrorHandlingResult::new(
        OperationType::BusinessValidation,
        "op",
        orchcore::ActionTaken::ValidationFailed,
        FinalStatus::ValidationBlocked,
        chrono::Utc::now(),
    )
    .with_cascade_source("primary-validation-failure");

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["action_taken"], "validation-failed");
    assert_eq!(value["final_status"], "validation-blocked");
    assert_eq!(value["operation_type"], "business-validation");
    assert!(result.is_cascade());
}

#[tokio::test]
async fn test_event_bus_fans_out() {
    init_tracing();
    let bus = EventBus::new(16);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();
    let run_id = Uuid::new_v4();

    bus.create_emitter(run_id, "a".to_string()).progress(50.0, None);

    for rx in [&mut first, &mut second] {
        match rx.recv().await.unwrap() {
            OrchestrationEvent::Action { run_id: id, action_id, .. } => {
                assert_eq!(id, run_id);
                assert_eq!(action_id, "a");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    // no subscribers left is not an error
    drop(first);
    drop(second);
    bus.emit(OrchestrationEvent::RunPaused {
        run_id,
        timestamp: chrono::Utc::now(),
    });
}
