//! Lifecycle of orchestration runs.
//!
//! Each run is driven by one spawned task that owns the [`OrchestrationRun`].
//! Callers only ever touch the run's [`watch`] channel: they flip the phase
//! for pause/resume and read progress counters from it.

use crate::config::FailureHandling;
use crate::executor::{executor_for, ActionRunner, RuntimeContext};
use crate::planner::GroupGraph;
use chrono::{DateTime, Utc};
use orchcore::{
    ActionResult, EngineError, EventBus, ExecutionContext, ExecutionPlan, GroupId,
    OrchestrationEvent, RunError, RunId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Executing,
    Paused,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Executing => "executing",
            RunPhase::Paused => "paused",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationProgress {
    pub run_id: RunId,
    pub total_actions: usize,
    pub completed_actions: usize,
    pub failed_actions: usize,
    pub in_progress_actions: usize,
    pub current_phase: RunPhase,
    /// 0-100
    pub overall_progress: u8,
}

/// Runtime state of one run; owned by its driver task until it terminates.
#[derive(Debug, Clone)]
pub struct OrchestrationRun {
    pub run_id: RunId,
    pub plan: Arc<ExecutionPlan>,
    pub phase: RunPhase,
    pub completed_groups: Vec<GroupId>,
    pub failed_groups: Vec<GroupId>,
    /// Results in plan order
    pub results: Vec<ActionResult>,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrchestrationRun {
    pub fn result(&self, action_id: &str) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.action_id == action_id)
    }

    pub fn succeeded(&self) -> bool {
        self.phase == RunPhase::Completed
    }
}

pub type RunReport = OrchestrationRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunStatus {
    phase: RunPhase,
    completed: usize,
    failed: usize,
    in_progress: usize,
}

struct RunHandle {
    plan: Arc<ExecutionPlan>,
    status: watch::Sender<RunStatus>,
    driver: tokio::sync::Mutex<Option<JoinHandle<OrchestrationRun>>>,
    report: Mutex<Option<Arc<OrchestrationRun>>>,
}

/// Owns every run started through it
pub struct OrchestrationStateMachine {
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    runner: Arc<ActionRunner>,
    events: EventBus,
    failure_handling: FailureHandling,
    max_parallel: usize,
}

impl OrchestrationStateMachine {
    pub fn new(
        runner: Arc<ActionRunner>,
        events: EventBus,
        failure_handling: FailureHandling,
        max_parallel: usize,
    ) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            runner,
            events,
            failure_handling,
            max_parallel,
        }
    }

    pub async fn start_execution(&self, plan: ExecutionPlan) -> Result<RunId, EngineError> {
        self.start_execution_with(plan, HashMap::new()).await
    }

    /// Start a run whose conditions and actions see `variables`.
    pub async fn start_execution_with(
        &self,
        plan: ExecutionPlan,
        variables: HashMap<String, Value>,
    ) -> Result<RunId, EngineError> {
        let graph = GroupGraph::build(&plan.groups)?;
        let order = graph.execution_order().to_vec();
        let run_id = Uuid::new_v4();
        let plan = Arc::new(plan);

        let (status, _) = watch::channel(RunStatus {
            phase: RunPhase::Idle,
            completed: 0,
            failed: 0,
            in_progress: 0,
        });
        let handle = Arc::new(RunHandle {
            plan: Arc::clone(&plan),
            status,
            driver: tokio::sync::Mutex::new(None),
            report: Mutex::new(None),
        });

        handle.status.send_modify(|s| s.phase = RunPhase::Executing);
        info!(%run_id, container_id = %plan.container_id, groups = order.len(), "starting run");

        let sink_handle = Arc::clone(&handle);
        let mut ctx = RuntimeContext::new(run_id, Arc::clone(&self.runner), self.max_parallel)
            .with_progress(Arc::new(move |result: &ActionResult| {
                let completed = result.counts_as_completed();
                let failed = result.is_failure();
                sink_handle.status.send_modify(|s| {
                    s.completed += usize::from(completed);
                    s.failed += usize::from(failed);
                    s.in_progress = s.in_progress.saturating_sub(1);
                });
            }));
        ctx.state = ExecutionContext::new(variables);
        let driver = RunDriver {
            run_id,
            plan,
            order,
            status: Arc::clone(&handle),
            events: self.events.clone(),
            failure_handling: self.failure_handling,
        };

        // Hold the driver slot so a waiter cannot observe it empty before spawn.
        let mut slot = handle.driver.lock().await;
        self.runs.write().await.insert(run_id, Arc::clone(&handle));
        *slot = Some(tokio::spawn(driver.drive(ctx)));
        drop(slot);

        Ok(run_id)
    }

    pub async fn pause_execution(&self, run_id: RunId) -> Result<(), EngineError> {
        self.transition(run_id, "pause", RunPhase::Executing, RunPhase::Paused)
            .await?;
        info!(%run_id, "run paused");
        self.events.emit(OrchestrationEvent::RunPaused {
            run_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn resume_execution(&self, run_id: RunId) -> Result<(), EngineError> {
        self.transition(run_id, "resume", RunPhase::Paused, RunPhase::Executing)
            .await?;
        info!(%run_id, "run resumed");
        self.events.emit(OrchestrationEvent::RunResumed {
            run_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn monitor_progress(&self, run_id: RunId) -> Result<OrchestrationProgress, EngineError> {
        let handle = self.handle(run_id).await?;
        let status = *handle.status.borrow();
        let total = handle.plan.total_actions();
        let overall = if total == 0 {
            0
        } else {
            (100.0 * status.completed as f64 / total as f64).round() as u8
        };

        Ok(OrchestrationProgress {
            run_id,
            total_actions: total,
            completed_actions: status.completed,
            failed_actions: status.failed,
            in_progress_actions: if status.phase.is_terminal() {
                0
            } else {
                status.in_progress
            },
            current_phase: status.phase,
            overall_progress: overall,
        })
    }

    /// Wait for the run to terminate and return its final state.
    pub async fn wait_for_completion(&self, run_id: RunId) -> Result<Arc<RunReport>, EngineError> {
        let handle = self.handle(run_id).await?;
        let mut driver = handle.driver.lock().await;

        if let Some(join) = driver.take() {
            let run = join.await.map_err(|e| {
                error!(%run_id, error = %e, "run driver panicked");
                handle.status.send_modify(|s| {
                    s.phase = RunPhase::Failed;
                    s.in_progress = 0;
                });
                RunError::DriverFailed(run_id)
            })?;
            let report = Arc::new(run);
            if let Ok(mut stored) = handle.report.lock() {
                *stored = Some(Arc::clone(&report));
            }
            return Ok(report);
        }

        handle
            .report
            .lock()
            .ok()
            .and_then(|stored| stored.clone())
            .ok_or_else(|| RunError::DriverFailed(run_id).into())
    }

    /// Wait for the run, then forget it.
    pub async fn archive_run(&self, run_id: RunId) -> Result<Arc<RunReport>, EngineError> {
        let report = self.wait_for_completion(run_id).await?;
        self.runs.write().await.remove(&run_id);
        debug!(%run_id, "run archived");
        Ok(report)
    }

    pub async fn list_runs(&self) -> Vec<RunId> {
        self.runs.read().await.keys().copied().collect()
    }

    async fn handle(&self, run_id: RunId) -> Result<Arc<RunHandle>, RunError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(RunError::NotFound(run_id))
    }

    async fn transition(
        &self,
        run_id: RunId,
        operation: &'static str,
        from: RunPhase,
        to: RunPhase,
    ) -> Result<(), RunError> {
        let handle = self.handle(run_id).await?;
        let mut current = from;
        let applied = handle.status.send_if_modified(|s| {
            current = s.phase;
            if s.phase == from {
                s.phase = to;
                true
            } else {
                false
            }
        });

        if applied {
            Ok(())
        } else {
            Err(RunError::InvalidTransition {
                run_id,
                operation,
                phase: current.to_string(),
            })
        }
    }
}

struct RunDriver {
    run_id: RunId,
    plan: Arc<ExecutionPlan>,
    order: Vec<GroupId>,
    status: Arc<RunHandle>,
    events: EventBus,
    failure_handling: FailureHandling,
}

impl RunDriver {
    async fn drive(self, mut ctx: RuntimeContext) -> OrchestrationRun {
        let started = Instant::now();
        let mut run = OrchestrationRun {
            run_id: self.run_id,
            plan: Arc::clone(&self.plan),
            phase: RunPhase::Executing,
            completed_groups: Vec::new(),
            failed_groups: Vec::new(),
            results: Vec::with_capacity(self.plan.total_actions()),
            context: ExecutionContext::default(),
            started_at: Utc::now(),
            finished_at: None,
        };

        self.events.emit(OrchestrationEvent::RunStarted {
            run_id: self.run_id,
            plan_id: self.plan.id,
            container_id: self.plan.container_id.clone(),
            total_actions: self.plan.total_actions(),
            timestamp: Utc::now(),
        });

        let mut aborted_by: Option<GroupId> = None;

        for group_id in &self.order {
            let Some(group) = self.plan.find_group(group_id) else {
                continue;
            };

            if let Some(failed) = &aborted_by {
                let reason = format!("run aborted after group '{failed}' failed");
                run.results.extend(
                    group
                        .action_ids()
                        .map(|id| ActionResult::not_started(id.clone(), reason.clone())),
                );
                continue;
            }

            self.wait_while_paused().await;

            let blocked_by = group.depends_on.iter().find(|dep| {
                !(run.completed_groups.contains(dep)
                    || (self.failure_handling == FailureHandling::Continue
                        && run.failed_groups.contains(dep)))
            });
            if let Some(dep) = blocked_by {
                error!(run_id = %self.run_id, group_id = %group.id, dependency = %dep, "dependency not satisfied");
                let reason = format!("dependency group '{dep}' did not complete");
                run.results.extend(
                    group
                        .action_ids()
                        .map(|id| ActionResult::not_started(id.clone(), reason.clone())),
                );
                run.failed_groups.push(group.id.clone());
                continue;
            }

            info!(
                run_id = %self.run_id,
                group_id = %group.id,
                mode = %group.execution_mode,
                actions = group.len(),
                "starting group"
            );
            self.status.status.send_modify(|s| s.in_progress = group.len());
            self.events.emit(OrchestrationEvent::GroupStarted {
                run_id: self.run_id,
                group_id: group.id.clone(),
                execution_mode: group.execution_mode,
                actions: group.len(),
                timestamp: Utc::now(),
            });

            let group_start = Instant::now();
            // Members are counted as they finish; see the progress sink.
            let results = match executor_for(group.execution_mode)
                .execute_group(group, &mut ctx)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    error!(run_id = %self.run_id, group_id = %group.id, error = %e, "group executor failed");
                    let failed = group.len();
                    self.status.status.send_modify(|s| s.failed += failed);
                    group
                        .action_ids()
                        .map(|id| ActionResult::failed(id.clone(), e.to_string()))
                        .collect()
                }
            };

            let group_failed = results.iter().any(|r| r.is_failure());
            self.status.status.send_modify(|s| s.in_progress = 0);
            run.results.extend(results);

            if group_failed {
                run.failed_groups.push(group.id.clone());
            } else {
                run.completed_groups.push(group.id.clone());
            }

            self.events.emit(OrchestrationEvent::GroupCompleted {
                run_id: self.run_id,
                group_id: group.id.clone(),
                success: !group_failed,
                duration_ms: group_start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });

            if group_failed && self.failure_handling == FailureHandling::Abort {
                error!(run_id = %self.run_id, group_id = %group.id, "group failed, aborting run");
                ctx.cancellation.cancel();
                aborted_by = Some(group.id.clone());
            }
        }

        if aborted_by.is_none() {
            self.wait_while_paused().await;
        }

        run.phase = if run.failed_groups.is_empty() {
            RunPhase::Completed
        } else {
            RunPhase::Failed
        };
        run.context = ctx.state;
        run.finished_at = Some(Utc::now());
        let phase = run.phase;
        self.status.status.send_modify(|s| s.phase = phase);

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(run_id = %self.run_id, %phase, duration_ms, "run finished");
        self.events.emit(OrchestrationEvent::RunCompleted {
            run_id: self.run_id,
            success: phase == RunPhase::Completed,
            duration_ms,
            timestamp: Utc::now(),
        });

        run
    }

    async fn wait_while_paused(&self) {
        let mut rx = self.status.status.subscribe();
        if rx.borrow().phase != RunPhase::Paused {
            return;
        }
        debug!(run_id = %self.run_id, "waiting for resume");
        // The sender lives in `self.status`, so the channel cannot close here.
        let _ = rx.wait_for(|s| s.phase != RunPhase::Paused).await;
    }
}
