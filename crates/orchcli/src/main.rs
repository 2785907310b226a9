// crates/orchcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchcore::services::NodeContextAccessService;
use orchcore::{
    ActionEvent, ActionNode, Condition, ErrorHandlingRequest, ExecutionMode, OrchestrationEvent,
    RetryPolicy,
};
use orchruntime::{
    load_request, ActionSetFile, EngineConfig, EngineServices, ExecutionPlanner, FailureHandling,
    OrchestrationEngine,
};
use orchservices::{BusinessRule, InMemoryAgentRegistry, RuleSetValidator, SimulatedExecutionService};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "orch")]
#[command(about = "Action orchestration engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the execution plan for an action set
    Plan {
        /// Path to action set JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Plan for this container instead of the file's
        #[arg(long)]
        container: Option<String>,

        /// Order by priority before grouping
        #[arg(long)]
        priority: bool,
    },

    /// Execute an action set against the simulated services
    Run {
        /// Path to action set JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep running later groups after a group fails
        #[arg(long)]
        continue_on_error: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run one recovery decision and print the results
    Recover {
        /// Path to an error-handling request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Business rules JSON file used for validation requests
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Create an example action set
    Init {
        /// Output file path
        #[arg(short, long, default_value = "actions.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            file,
            container,
            priority,
        } => {
            init_logging(false);
            show_plan(file, container, priority)?;
        }

        Commands::Run {
            file,
            config,
            continue_on_error,
            verbose,
        } => {
            init_logging(verbose);
            run_actions(file, config, continue_on_error).await?;
        }

        Commands::Recover { request, rules } => {
            init_logging(false);
            recover(request, rules).await?;
        }

        Commands::Init { output } => {
            create_example(output)?;
        }
    }

    Ok(())
}

fn show_plan(file: PathBuf, container: Option<String>, priority: bool) -> Result<()> {
    let set = ActionSetFile::load(&file)
        .with_context(|| format!("failed to load action set {}", file.display()))?;
    let container_id = container.unwrap_or(set.container_id);
    let plan = ExecutionPlanner::new(priority).create_plan(&container_id, set.actions)?;

    println!("📋 Plan {} for container {}", plan.id, plan.container_id);
    println!("   Actions: {}", plan.total_actions());
    println!("   Groups: {}", plan.groups.len());
    println!();

    for group in &plan.groups {
        let deps = if group.depends_on.is_empty() {
            "-".to_string()
        } else {
            group.depends_on.join(", ")
        };
        println!(
            "  • {} [{}] {}ms (after: {})",
            group.id, group.execution_mode, group.estimated_duration_ms, deps
        );
        for action in &group.actions {
            println!(
                "      {} (order {}, priority {}, {}ms)",
                action.display_name(),
                action.execution_order,
                action.priority,
                action.estimated_duration_ms
            );
        }
    }

    println!();
    println!("⏱️  Estimated total: {}ms", plan.total_estimated_duration_ms);
    Ok(())
}

fn simulated_services(rules: Vec<BusinessRule>) -> (EngineServices, Arc<InMemoryAgentRegistry>) {
    let execution = Arc::new(SimulatedExecutionService::new());
    let agents = Arc::new(InMemoryAgentRegistry::new());
    let services = EngineServices {
        execution: execution.clone(),
        agents: agents.clone(),
        validation: Arc::new(RuleSetValidator::new(rules)),
        context_access: Some(execution as Arc<dyn NodeContextAccessService>),
    };
    (services, agents)
}

fn default_rules() -> Vec<BusinessRule> {
    vec![
        BusinessRule::RequireAgent,
        BusinessRule::UniqueExecutionOrder,
        BusinessRule::WarnWithoutRetry,
    ]
}

async fn run_actions(
    file: PathBuf,
    config: Option<PathBuf>,
    continue_on_error: bool,
) -> Result<()> {
    println!("🚀 Loading actions from: {}", file.display());
    let set = ActionSetFile::load(&file)
        .with_context(|| format!("failed to load action set {}", file.display()))?;

    let mut config = match config {
        Some(path) => EngineConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if continue_on_error {
        config.failure_handling = FailureHandling::Continue;
    }

    let (services, _) = simulated_services(default_rules());
    let engine = OrchestrationEngine::with_config(services, config);
    let plan = engine.create_execution_plan(&set.container_id, set.actions)?;

    println!("📋 Container: {}", plan.container_id);
    println!("   Actions: {}", plan.total_actions());
    println!("   Groups: {}", plan.groups.len());
    println!();

    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestrationEvent::RunStarted { run_id, .. } => {
                    println!("▶️  Run {} started", run_id);
                }
                OrchestrationEvent::RunPaused { .. } => println!("⏸️  Paused"),
                OrchestrationEvent::RunResumed { .. } => println!("⏯️  Resumed"),
                OrchestrationEvent::GroupStarted {
                    group_id,
                    execution_mode,
                    actions,
                    ..
                } => {
                    println!("  📦 {} ({}, {} actions)", group_id, execution_mode, actions);
                }
                OrchestrationEvent::GroupCompleted {
                    group_id,
                    success,
                    duration_ms,
                    ..
                } => {
                    let mark = if success { "✅" } else { "❌" };
                    println!("  {} {} finished in {}ms", mark, group_id, duration_ms);
                }
                OrchestrationEvent::ActionStarted { action_id, .. } => {
                    println!("    ⚡ {}", action_id);
                }
                OrchestrationEvent::ActionCompleted {
                    action_id,
                    attempts,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "    ✅ {} completed in {}ms ({} attempt(s))",
                        action_id, duration_ms, attempts
                    );
                }
                OrchestrationEvent::ActionFailed {
                    action_id, error, ..
                } => {
                    println!("    ❌ {} failed: {}", action_id, error);
                }
                OrchestrationEvent::ActionSkipped { action_id, .. } => {
                    println!("    ⏭️  {} skipped", action_id);
                }
                OrchestrationEvent::Action {
                    action_id, event, ..
                } => match event {
                    ActionEvent::Info { message } => println!("       ℹ️  [{}] {}", action_id, message),
                    ActionEvent::Warning { message } => {
                        println!("       ⚠️  [{}] {}", action_id, message)
                    }
                    ActionEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("       📊 [{}] {}% - {}", action_id, percent, msg),
                        None => println!("       📊 [{}] {}%", action_id, percent),
                    },
                },
                OrchestrationEvent::RecoveryDecision {
                    operation_id,
                    action_taken,
                    cascade,
                    ..
                } => {
                    let kind = if cascade { "cascade" } else { "decision" };
                    println!("    🔁 {} {}: {}", kind, operation_id, action_taken);
                }
                OrchestrationEvent::RunCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let run_id = engine.start_execution_with_variables(plan, set.variables).await?;
    let report = engine.wait_for_completion(run_id).await?;
    let progress = engine.monitor_progress(run_id).await?;
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", run_id);
    println!("   Phase: {}", progress.current_phase);
    println!(
        "   Completed: {}/{} actions ({}%)",
        progress.completed_actions, progress.total_actions, progress.overall_progress
    );
    println!("   Failed: {}", progress.failed_actions);

    let outputs: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| r.output.as_ref().map(|o| (&r.action_id, o)))
        .collect();
    if !outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (action_id, output) in outputs {
            println!("   {}: {}", action_id, output);
        }
    }

    if !report.succeeded() {
        anyhow::bail!("run {} finished {}", run_id, report.phase);
    }
    Ok(())
}

async fn recover(request: PathBuf, rules: Option<PathBuf>) -> Result<()> {
    let request: ErrorHandlingRequest = load_request(&request)
        .with_context(|| format!("failed to load request {}", request.display()))?;
    let rules = match rules {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read rules {}", path.display()))?;
            serde_json::from_str(&raw)?
        }
        None => default_rules(),
    };

    let (services, agents) = simulated_services(rules);
    if let ErrorHandlingRequest::AgentFailure(req) = &request {
        agents.register(req.agent_id.clone()).await;
    }

    let engine = OrchestrationEngine::new(services);
    tracing::info!(operation_type = ?request.operation_type(), "handling recovery request");
    let results = engine.execute_error_handling_and_recovery(&request).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn example_actions(container_id: &str) -> Result<Vec<ActionNode>> {
    let retry = RetryPolicy::exponential(200, 2_000, 2.0, 3)?;
    Ok(vec![
        ActionNode::new("seqA", container_id, ExecutionMode::Sequential)
            .with_name("Provision workspace")
            .with_order(1)
            .with_duration_ms(60_000)
            .with_agent("agent-provisioner")
            .with_parameter("delay_ms", 300),
        ActionNode::new("seqB", container_id, ExecutionMode::Sequential)
            .with_name("Load model")
            .with_order(2)
            .with_duration_ms(90_000)
            .with_agent("agent-loader")
            .with_retry_policy(retry)
            .with_parameter("delay_ms", 300)
            .with_parameter("fail_attempts", 1)
            .with_parameter("error", "model store timeout"),
        ActionNode::new("parC", container_id, ExecutionMode::Parallel)
            .with_name("Score batch 1")
            .with_order(3)
            .with_duration_ms(45_000)
            .with_agent("agent-scorer-1")
            .with_context_from("seqB")
            .with_parameter("delay_ms", 200),
        ActionNode::new("parD", container_id, ExecutionMode::Parallel)
            .with_name("Score batch 2")
            .with_order(4)
            .with_duration_ms(30_000)
            .with_agent("agent-scorer-2")
            .with_parameter("delay_ms", 150),
        ActionNode::new("condE", container_id, ExecutionMode::Conditional)
            .with_name("Publish results")
            .with_order(5)
            .with_duration_ms(120_000)
            .with_agent("agent-publisher")
            .with_condition(Condition::All {
                conditions: vec![
                    Condition::equals("env", "prod"),
                    Condition::succeeded("parC"),
                ],
            })
            .with_parameter("delay_ms", 100),
    ])
}

fn create_example(output: PathBuf) -> Result<()> {
    let container_id = "container-1";
    let set = ActionSetFile {
        container_id: container_id.to_string(),
        actions: example_actions(container_id)?,
        variables: HashMap::from([("env".to_string(), serde_json::json!("prod"))]),
    };
    set.save(&output)?;

    println!("✨ Created example action set: {}", output.display());
    println!();
    println!("Inspect the plan with:");
    println!("  orch plan --file {}", output.display());
    println!("Run it with:");
    println!("  orch run --file {}", output.display());

    Ok(())
}
