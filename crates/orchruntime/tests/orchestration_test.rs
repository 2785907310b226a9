use orchcore::services::NodeContextAccessService;
use orchcore::{
    ActionNode, ActionOutcome, Condition, EngineError, ExecutionMode, OrchestrationEvent,
    RetryPolicy, RunError,
};
use orchruntime::{EngineConfig, EngineServices, FailureHandling, OrchestrationEngine, RunPhase};
use orchservices::{InMemoryAgentRegistry, RuleSetValidator, SimulatedExecutionService};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

fn engine(config: EngineConfig) -> (OrchestrationEngine, Arc<SimulatedExecutionService>) {
    let execution = Arc::new(SimulatedExecutionService::new());
    let services = EngineServices {
        execution: execution.clone(),
        agents: Arc::new(InMemoryAgentRegistry::new()),
        validation: Arc::new(RuleSetValidator::default()),
        context_access: Some(execution.clone() as Arc<dyn NodeContextAccessService>),
    };
    (OrchestrationEngine::with_config(services, config), execution)
}

fn no_retry(action: ActionNode) -> ActionNode {
    action.with_retry_policy(RetryPolicy::disabled())
}

fn seq(id: &str, order: i32) -> ActionNode {
    ActionNode::new(id, "c1", ExecutionMode::Sequential).with_order(order)
}

fn par(id: &str, order: i32) -> ActionNode {
    ActionNode::new(id, "c1", ExecutionMode::Parallel).with_order(order)
}

fn cond(id: &str, order: i32, condition: Condition) -> ActionNode {
    ActionNode::new(id, "c1", ExecutionMode::Conditional)
        .with_order(order)
        .with_condition(condition)
}

#[tokio::test(start_paused = true)]
async fn test_successful_run_reports_full_progress() {
    init_tracing();
    let (engine, _) = engine(EngineConfig::default());
    let actions = vec![
        seq("a", 1).with_parameter("delay_ms", 100),
        seq("b", 2),
        par("c", 3).with_parameter("delay_ms", 50),
        par("d", 4),
        cond("e", 5, Condition::succeeded("c")),
    ];

    let plan = engine.create_execution_plan("c1", actions).unwrap();
    let run_id = engine.start_execution(plan).await.unwrap();
    let report = engine.wait_for_completion(run_id).await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.completed_groups.len(), 3);
    assert!(report.failed_groups.is_empty());
    let ids: Vec<_> = report.results.iter().map(|r| r.action_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    assert!(report
        .results
        .iter()
        .all(|r| r.outcome == ActionOutcome::Succeeded));
    assert!(report.finished_at.is_some());

    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.current_phase, RunPhase::Completed);
    assert!(progress.current_phase.is_terminal());
    assert_eq!(progress.total_actions, 5);
    assert_eq!(progress.completed_actions, 5);
    assert_eq!(progress.failed_actions, 0);
    assert_eq!(progress.in_progress_actions, 0);
    assert_eq!(progress.overall_progress, 100);

    // Reading progress has no side effects.
    assert_eq!(engine.monitor_progress(run_id).await.unwrap(), progress);
    assert_eq!(engine.list_runs().await, vec![run_id]);

    // A finished run can be waited on again.
    let again = engine.wait_for_completion(run_id).await.unwrap();
    assert_eq!(again.results.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_transitions() {
    init_tracing();
    let (engine, execution) = engine(EngineConfig::default());
    let plan = engine
        .create_execution_plan(
            "c1",
            vec![seq("a", 1).with_parameter("delay_ms", 100), par("b", 2)],
        )
        .unwrap();

    let run_id = engine.start_execution(plan).await.unwrap();
    engine.pause_execution(run_id).await.unwrap();

    let err = engine.pause_execution(run_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Run(RunError::InvalidTransition { operation: "pause", .. })
    ));

    // Nothing starts while paused.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.current_phase, RunPhase::Paused);
    assert_eq!(progress.completed_actions, 0);
    assert_eq!(execution.executions(), 0);

    engine.resume_execution(run_id).await.unwrap();
    assert!(matches!(
        engine.resume_execution(run_id).await,
        Err(EngineError::Run(RunError::InvalidTransition { operation: "resume", .. }))
    ));

    let report = engine.wait_for_completion(run_id).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(execution.executions(), 2);

    // Terminal runs accept neither operation.
    assert!(engine.pause_execution(run_id).await.is_err());
    assert!(engine.resume_execution(run_id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pause_lets_in_flight_group_finish() {
    let (engine, _) = engine(EngineConfig::default());
    let plan = engine
        .create_execution_plan(
            "c1",
            vec![
                seq("a", 1).with_parameter("delay_ms", 1_000),
                par("b", 2),
                par("c", 3),
            ],
        )
        .unwrap();

    let run_id = engine.start_execution(plan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.pause_execution(run_id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.current_phase, RunPhase::Paused);
    assert_eq!(progress.completed_actions, 1);
    assert_eq!(progress.overall_progress, 33);

    engine.resume_execution(run_id).await.unwrap();
    let report = engine.wait_for_completion(run_id).await.unwrap();
    assert!(report.succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_progress_counts_members_as_they_finish() {
    let (engine, _) = engine(EngineConfig::default());
    let plan = engine
        .create_execution_plan(
            "c1",
            vec![
                seq("a", 1).with_parameter("delay_ms", 100),
                seq("b", 2).with_parameter("delay_ms", 1_000),
                seq("c", 3).with_parameter("delay_ms", 1_000),
            ],
        )
        .unwrap();
    let run_id = engine.start_execution(plan).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.current_phase, RunPhase::Executing);
    assert!(!progress.current_phase.is_terminal());
    assert_eq!(progress.completed_actions, 1);
    assert_eq!(progress.in_progress_actions, 2);
    assert_eq!(progress.overall_progress, 33);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.completed_actions, 2);
    assert_eq!(progress.in_progress_actions, 1);
    assert_eq!(progress.overall_progress, 67);

    engine.wait_for_completion(run_id).await.unwrap();
    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.completed_actions, 3);
    assert_eq!(progress.in_progress_actions, 0);
}

#[tokio::test]
async fn test_unknown_run_is_rejected() {
    let (engine, _) = engine(EngineConfig::default());
    let missing = Uuid::new_v4();
    assert!(matches!(
        engine.monitor_progress(missing).await,
        Err(EngineError::Run(RunError::NotFound(id))) if id == missing
    ));
    assert!(engine.pause_execution(missing).await.is_err());
    assert!(engine.wait_for_completion(missing).await.is_err());
}

fn failing_plan_actions() -> Vec<ActionNode> {
    vec![
        seq("a", 1),
        no_retry(par("b", 2).with_parameter("always_fail", true)),
        par("c", 3),
        seq("d", 4),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_remaining_groups() {
    init_tracing();
    let (engine, _) = engine(EngineConfig::default());
    let plan = engine
        .create_execution_plan("c1", failing_plan_actions())
        .unwrap();
    let run_id = engine.start_execution(plan).await.unwrap();
    let report = engine.wait_for_completion(run_id).await.unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(report.completed_groups, vec!["group-1".to_string()]);
    assert_eq!(report.failed_groups, vec!["group-2".to_string()]);
    assert_eq!(report.result("b").unwrap().outcome, ActionOutcome::Failed);
    // siblings in a parallel group are not cancelled
    assert_eq!(report.result("c").unwrap().outcome, ActionOutcome::Succeeded);
    assert_eq!(report.result("d").unwrap().outcome, ActionOutcome::NotStarted);

    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.current_phase, RunPhase::Failed);
    assert_eq!(progress.completed_actions, 2);
    assert_eq!(progress.failed_actions, 1);
    assert_eq!(progress.overall_progress, 50);
}

#[tokio::test(start_paused = true)]
async fn test_continue_runs_remaining_groups_but_fails() {
    let config = EngineConfig {
        failure_handling: FailureHandling::Continue,
        ..EngineConfig::default()
    };
    let (engine, _) = engine(config);
    let report = engine
        .execute("c1", failing_plan_actions(), HashMap::new())
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Failed);
    assert_eq!(report.failed_groups, vec!["group-2".to_string()]);
    assert_eq!(report.result("d").unwrap().outcome, ActionOutcome::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_group_fails_fast() {
    let (engine, execution) = engine(EngineConfig::default());
    let report = engine
        .execute(
            "c1",
            vec![
                seq("a", 1),
                no_retry(seq("b", 2).with_parameter("always_fail", true)),
                seq("c", 3),
            ],
            HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.result("a").unwrap().outcome, ActionOutcome::Succeeded);
    assert_eq!(report.result("b").unwrap().outcome, ActionOutcome::Failed);
    assert_eq!(report.result("c").unwrap().outcome, ActionOutcome::NotStarted);
    assert_eq!(execution.executions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_conditional_group_skips_false_conditions() {
    let (engine, _) = engine(EngineConfig::default());
    let variables = HashMap::from([("env".to_string(), json!("staging"))]);
    let run_id = {
        let plan = engine
            .create_execution_plan(
                "c1",
                vec![
                    seq("build", 1).with_parameter("output", json!({"artifact": "app.tar"})),
                    cond("deploy_prod", 2, Condition::equals("env", "prod")),
                    cond("deploy_staging", 3, Condition::equals("env", "staging")),
                    cond("publish", 4, Condition::equals("build.artifact", "app.tar")),
                    ActionNode::new("always", "c1", ExecutionMode::Conditional).with_order(5),
                ],
            )
            .unwrap();
        engine
            .start_execution_with_variables(plan, variables)
            .await
            .unwrap()
    };
    let report = engine.wait_for_completion(run_id).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.result("deploy_prod").unwrap().outcome, ActionOutcome::Skipped);
    assert_eq!(
        report.result("deploy_staging").unwrap().outcome,
        ActionOutcome::Succeeded
    );
    assert_eq!(report.result("publish").unwrap().outcome, ActionOutcome::Succeeded);
    assert_eq!(report.result("always").unwrap().outcome, ActionOutcome::Succeeded);

    let progress = engine.monitor_progress(run_id).await.unwrap();
    assert_eq!(progress.completed_actions, 5);
    assert_eq!(progress.overall_progress, 100);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_group_is_bounded_and_complete() {
    let config = EngineConfig {
        max_parallel_actions: 2,
        ..EngineConfig::default()
    };
    let (engine, execution) = engine(config);
    let actions: Vec<_> = (0..6)
        .map(|i| {
            let action = par(&format!("p{i}"), i).with_parameter("delay_ms", 50);
            if i == 3 {
                no_retry(action.with_parameter("always_fail", true))
            } else {
                action
            }
        })
        .collect();

    let report = engine
        .execute("c1", actions, HashMap::new())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 6);
    let ids: Vec<_> = report.results.iter().map(|r| r.action_id.as_str()).collect();
    assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4", "p5"]);
    assert_eq!(
        report
            .results
            .iter()
            .filter(|r| r.outcome == ActionOutcome::Succeeded)
            .count(),
        5
    );
    assert_eq!(report.result("p3").unwrap().outcome, ActionOutcome::Failed);
    assert_eq!(execution.peak_concurrency(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_recovers_through_retries() {
    init_tracing();
    let (engine, execution) = engine(EngineConfig::default());
    let flaky = seq("flaky", 1)
        .with_parameter("fail_attempts", 2)
        .with_retry_policy(RetryPolicy::fixed(10, 3).unwrap());

    let report = engine
        .execute("c1", vec![flaky], HashMap::new())
        .await
        .unwrap();
    let result = report.result("flaky").unwrap();

    assert_eq!(result.outcome, ActionOutcome::Succeeded);
    assert_eq!(result.attempts, 3);
    assert_eq!(execution.executions(), 3);
    // two retry decisions, the first one failed and cascaded
    assert_eq!(result.recovery.len(), 3);
    assert!(result.recovery[0].retry_attempted);
    assert!(result.recovery[1].is_cascade());
    assert!(result.recovery[2].success);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let (engine, execution) = engine(EngineConfig::default());
    let broken = seq("broken", 1)
        .with_parameter("always_fail", true)
        .with_parameter("error", "disk full")
        .with_retry_policy(RetryPolicy::fixed(10, 2).unwrap());

    let report = engine
        .execute("c1", vec![broken], HashMap::new())
        .await
        .unwrap();
    let result = report.result("broken").unwrap();

    assert_eq!(result.outcome, ActionOutcome::Failed);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.error.as_deref(), Some("Execution failed: disk full"));
    assert_eq!(execution.executions(), 2);
    assert_eq!(report.phase, RunPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_context_propagates_between_groups() {
    let (engine, _) = engine(EngineConfig::default());
    let report = engine
        .execute(
            "c1",
            vec![
                seq("extract", 1).with_parameter("output", json!({"rows": 10})),
                par("load", 2).with_context_from("extract"),
                no_retry(par("orphan", 3).with_context_from("never-ran")),
            ],
            HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.result("load").unwrap().outcome, ActionOutcome::Succeeded);
    let orphan = report.result("orphan").unwrap();
    assert_eq!(orphan.outcome, ActionOutcome::Failed);
    assert_eq!(orphan.attempts, 0);
    assert!(orphan
        .error
        .as_deref()
        .unwrap()
        .contains("could not be resolved"));
}

#[tokio::test(start_paused = true)]
async fn test_run_emits_lifecycle_events() {
    let (engine, _) = engine(EngineConfig::default());
    let mut events = engine.subscribe_events();
    let plan = engine
        .create_execution_plan("c1", vec![seq("a", 1), par("b", 2), par("c", 3)])
        .unwrap();
    let run_id = engine.start_execution(plan).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("event before timeout")
            .expect("bus open");
        let done = matches!(event, OrchestrationEvent::RunCompleted { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(
        seen.first(),
        Some(OrchestrationEvent::RunStarted { run_id: id, total_actions: 3, .. }) if *id == run_id
    ));
    assert!(matches!(
        seen.last(),
        Some(OrchestrationEvent::RunCompleted { success: true, .. })
    ));
    let groups_started = seen
        .iter()
        .filter(|e| matches!(e, OrchestrationEvent::GroupStarted { .. }))
        .count();
    let actions_completed = seen
        .iter()
        .filter(|e| matches!(e, OrchestrationEvent::ActionCompleted { .. }))
        .count();
    assert_eq!(groups_started, 2);
    assert_eq!(actions_completed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_archived_run_is_forgotten() {
    let (engine, _) = engine(EngineConfig::default());
    let plan = engine.create_execution_plan("c1", vec![seq("a", 1)]).unwrap();
    let run_id = engine.start_execution(plan).await.unwrap();

    let report = engine.archive_run(run_id).await.unwrap();
    assert!(report.succeeded());
    assert!(engine.list_runs().await.is_empty());
    assert!(engine.monitor_progress(run_id).await.is_err());
}
