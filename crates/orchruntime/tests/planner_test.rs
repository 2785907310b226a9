use orchcore::{ActionNode, ExecutionMode, PlanError};
use orchruntime::{ActionSetFile, ExecutionPlanner, GroupGraph};

fn scenario() -> Vec<ActionNode> {
    vec![
        ActionNode::new("seqA", "container-1", ExecutionMode::Sequential)
            .with_order(1)
            .with_duration_ms(60_000),
        ActionNode::new("seqB", "container-1", ExecutionMode::Sequential)
            .with_order(2)
            .with_duration_ms(90_000),
        ActionNode::new("parC", "container-1", ExecutionMode::Parallel)
            .with_order(3)
            .with_duration_ms(45_000),
        ActionNode::new("parD", "container-1", ExecutionMode::Parallel)
            .with_order(4)
            .with_duration_ms(30_000),
        ActionNode::new("condE", "container-1", ExecutionMode::Conditional)
            .with_order(5)
            .with_duration_ms(120_000),
    ]
}

#[test]
fn test_five_action_scenario() {
    let plan = ExecutionPlanner::default()
        .create_plan("container-1", scenario())
        .unwrap();

    assert_eq!(plan.groups.len(), 3);
    assert_eq!(plan.total_actions(), 5);
    assert_eq!(plan.total_estimated_duration_ms, 315_000);

    let modes: Vec<_> = plan.groups.iter().map(|g| g.execution_mode).collect();
    assert_eq!(
        modes,
        vec![
            ExecutionMode::Sequential,
            ExecutionMode::Parallel,
            ExecutionMode::Conditional
        ]
    );
    let durations: Vec<_> = plan.groups.iter().map(|g| g.estimated_duration_ms).collect();
    assert_eq!(durations, vec![150_000, 45_000, 120_000]);

    let members: Vec<Vec<&str>> = plan
        .groups
        .iter()
        .map(|g| g.action_ids().map(String::as_str).collect())
        .collect();
    assert_eq!(members, vec![vec!["seqA", "seqB"], vec!["parC", "parD"], vec!["condE"]]);

    assert!(plan.groups[0].depends_on.is_empty());
    assert_eq!(plan.groups[1].depends_on, vec![plan.groups[0].id.clone()]);
    assert_eq!(plan.groups[2].depends_on, vec![plan.groups[1].id.clone()]);

    let graph = GroupGraph::build(&plan.groups).unwrap();
    let order: Vec<_> = plan.groups.iter().map(|g| g.id.clone()).collect();
    assert_eq!(graph.execution_order(), order.as_slice());
}

#[test]
fn test_submission_order_does_not_matter() {
    let mut actions = scenario();
    actions.reverse();
    let plan = ExecutionPlanner::default()
        .create_plan("container-1", actions)
        .unwrap();
    let ids: Vec<_> = plan.actions.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["seqA", "seqB", "parC", "parD", "condE"]);
    assert_eq!(plan.groups.len(), 3);
}

#[test]
fn test_interleaved_modes_form_separate_groups() {
    let actions = vec![
        ActionNode::new("a", "c", ExecutionMode::Sequential).with_order(1),
        ActionNode::new("b", "c", ExecutionMode::Parallel).with_order(2),
        ActionNode::new("c", "c", ExecutionMode::Sequential).with_order(3),
    ];
    let plan = ExecutionPlanner::default().create_plan("c", actions).unwrap();
    assert_eq!(plan.groups.len(), 3);
    assert!(plan.groups.iter().all(|g| g.len() == 1));
}

#[test]
fn test_priority_grouping_orders_by_priority() {
    let actions = vec![
        ActionNode::new("low", "c", ExecutionMode::Sequential)
            .with_order(1)
            .with_priority(1),
        ActionNode::new("high", "c", ExecutionMode::Sequential)
            .with_order(2)
            .with_priority(9),
        ActionNode::new("mid", "c", ExecutionMode::Sequential)
            .with_order(3)
            .with_priority(5),
    ];
    let plan = ExecutionPlanner::new(true).create_plan("c", actions).unwrap();
    let ids: Vec<_> = plan.groups[0].action_ids().map(String::as_str).collect();
    assert_eq!(ids, vec!["high", "mid", "low"]);
    assert_eq!(plan.groups[0].priority, 9);
}

#[test]
fn test_rejects_invalid_action_sets() {
    let planner = ExecutionPlanner::default();
    assert_eq!(
        planner.create_plan("c", vec![]).unwrap_err(),
        PlanError::EmptyActionSet
    );

    let mismatch = vec![
        ActionNode::new("a", "c", ExecutionMode::Sequential),
        ActionNode::new("b", "other", ExecutionMode::Sequential),
    ];
    assert_eq!(
        planner.create_plan("c", mismatch).unwrap_err(),
        PlanError::ContainerMismatch {
            action_id: "b".to_string(),
            expected: "c".to_string(),
            found: "other".to_string(),
        }
    );

    let duplicate = vec![
        ActionNode::new("a", "c", ExecutionMode::Sequential),
        ActionNode::new("a", "c", ExecutionMode::Parallel),
    ];
    assert_eq!(
        planner.create_plan("c", duplicate).unwrap_err(),
        PlanError::DuplicateAction("a".to_string())
    );
}

#[test]
fn test_action_set_from_json() {
    let raw = r#"{
        "container_id": "c",
        "variables": {"env": "prod"},
        "actions": [
            {
                "id": "deploy",
                "container_id": "c",
                "execution_mode": "conditional",
                "execution_order": 1,
                "estimated_duration_ms": 1000,
                "condition": {"op": "equals", "key": "env", "value": "prod"},
                "retry_policy": {"strategy": "fixed", "base_delay_ms": 100, "max_delay_ms": 100, "max_attempts": 2}
            }
        ]
    }"#;
    let set: ActionSetFile = serde_json::from_str(raw).unwrap();
    assert_eq!(set.variables["env"], "prod");
    let plan = ExecutionPlanner::default()
        .create_plan(&set.container_id, set.actions)
        .unwrap();
    assert_eq!(plan.groups[0].execution_mode, ExecutionMode::Conditional);
    assert_eq!(plan.actions[0].retry_policy.max_attempts(), 2);

    let bad_policy = r#"{
        "container_id": "c",
        "actions": [
            {"id": "x", "container_id": "c", "execution_mode": "sequential",
             "retry_policy": {"strategy": "fixed", "base_delay_ms": 100, "max_delay_ms": 10, "max_attempts": 2}}
        ]
    }"#;
    assert!(serde_json::from_str::<ActionSetFile>(bad_policy).is_err());
}
