//! Pipeline driver.
//!
//! [`PipelineController::execute`] walks an [`ExecutionPlan`] in order, runs
//! each step inside its workspace and aggregates a [`RunResult`]. A failing
//! abort-immediately step stops the run; a failing record-and-continue step is
//! recorded and the run goes on. Failing to enter a workspace always stops the
//! run.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::plan::{ExecutionPlan, FailurePolicy, Step, Tier, Tool};
use crate::runner::{StepRunner, StepStatus};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::workspace::{WorkspaceContext, active_workspace};

/// What an interrupted tool does to the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPolicy {
    /// Any interrupted step stops the run, whatever its own policy.
    #[default]
    Abort,
    /// Interrupted steps count as failures under their own policy.
    FollowStep,
}

impl InterruptPolicy {
    /// Parse with loose casing.
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "abort" | "always-abort" => Some(Self::Abort),
            "follow-step" | "step" | "follow" => Some(Self::FollowStep),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::FollowStep => "follow-step",
        }
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub step_id: String,
    pub tier: Tier,
    pub tool: Tool,
    pub workspace: String,
    pub features: String,
    pub policy: FailurePolicy,
    /// Command line(s) that reproduce the step from its workspace.
    pub command: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}

impl StepRecord {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.status.is_success()
    }
}

/// Why a run stopped before the end of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// An abort-immediately step failed.
    StepFailed,
    /// A tool was interrupted.
    Interrupted { signal: i32 },
    /// The step's workspace could not be entered.
    WorkspaceUnavailable { message: String },
    /// `execute` was called while a workspace was already held.
    Reentrant { held: String },
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Termination {
    /// Every plan entry was executed.
    Completed,
    /// The run stopped at `step_index`.
    Aborted {
        step_index: usize,
        step_id: Option<String>,
        #[serde(flatten)]
        reason: AbortReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

/// Aggregate outcome of a run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub plan_fingerprint: String,
    /// Number of steps in the plan.
    pub planned: usize,
    pub records: Vec<StepRecord>,
    pub termination: Termination,
}

impl RunResult {
    /// Passed only if every plan entry ran and passed.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        let completed = matches!(self.termination, Termination::Completed);
        if completed && self.records.iter().all(StepRecord::passed) {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.verdict() == Verdict::Passed
    }

    /// Process exit code for this result.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.succeeded() { 0 } else { 1 }
    }

    /// Failed steps, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|record| !record.passed())
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.records.iter().filter(|record| record.passed()).count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.records.len() - self.passed_count()
    }

    /// Plan entries that never ran because the run stopped early.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.planned.saturating_sub(self.records.len())
    }
}

/// Drives a plan through a [`StepRunner`].
pub struct PipelineController<R> {
    runner: R,
    context: WorkspaceContext,
    interrupt_policy: InterruptPolicy,
    log: LogEmitter,
    progress: bool,
}

impl<R: StepRunner> PipelineController<R> {
    /// Controller with no structured log, silent progress and the default
    /// interrupt policy.
    #[must_use]
    pub fn new(runner: R, context: WorkspaceContext) -> Self {
        Self {
            runner,
            context,
            interrupt_policy: InterruptPolicy::default(),
            log: LogEmitter::sink("unset"),
            progress: false,
        }
    }

    #[must_use]
    pub fn with_interrupt_policy(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt_policy = policy;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogEmitter) -> Self {
        self.log = log;
        self
    }

    /// Print one progress line per step to stderr.
    #[must_use]
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    #[must_use]
    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Execute `plan` in order and aggregate the outcome.
    pub fn execute(&mut self, plan: &ExecutionPlan) -> RunResult {
        let mut result = RunResult {
            run_id: plan.run_id(),
            plan_fingerprint: plan.fingerprint(),
            planned: plan.len(),
            records: Vec::new(),
            termination: Termination::Completed,
        };

        if let Some(held) = active_workspace() {
            self.emit(
                self.log
                    .entry(LogLevel::Error, "pipeline_reentered")
                    .with_details(serde_json::json!({ "held_workspace": held })),
            );
            result.termination = Termination::Aborted {
                step_index: 0,
                step_id: None,
                reason: AbortReason::Reentrant { held },
            };
            return result;
        }

        self.emit(
            self.log
                .entry(LogLevel::Info, "pipeline_start")
                .with_details(serde_json::json!({
                    "planned": plan.len(),
                    "plan_fingerprint": &result.plan_fingerprint,
                    "interrupt_policy": self.interrupt_policy.as_str(),
                })),
        );

        let total = plan.len();
        for (index, step) in plan.steps().iter().enumerate() {
            let command = step.render_commands(self.runner.program());
            if self.progress {
                eprintln!("[{}/{total}] {} :: {command}", index + 1, step.id());
            }
            self.emit(
                self.log
                    .entry(LogLevel::Info, "step_start")
                    .with_step(index, step)
                    .with_command(&command),
            );

            let started = Instant::now();
            let runner = &mut self.runner;
            let status = match self.context.with_workspace(&step.workspace, || runner.run(step)) {
                Ok(status) => status,
                Err(err) => {
                    let message = err.to_string();
                    if self.progress {
                        eprintln!("[{}/{total}] workspace error: {message}", index + 1);
                    }
                    self.emit(
                        self.log
                            .entry(LogLevel::Error, "workspace_unavailable")
                            .with_step(index, step)
                            .with_details(serde_json::json!({ "error": &message })),
                    );
                    result.termination = Termination::Aborted {
                        step_index: index,
                        step_id: Some(step.id()),
                        reason: AbortReason::WorkspaceUnavailable { message },
                    };
                    break;
                }
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let level = if status.is_success() {
                LogLevel::Info
            } else {
                LogLevel::Error
            };
            self.emit(
                self.log
                    .entry(level, "step_result")
                    .with_step(index, step)
                    .with_command(&command)
                    .with_status(&status)
                    .with_duration_ms(duration_ms),
            );
            if self.progress && !status.is_success() {
                eprintln!(
                    "[{}/{total}] {} {} ({})",
                    index + 1,
                    step.id(),
                    status.label(),
                    step.policy.as_str()
                );
            }

            let abort = self.abort_reason(step, &status);
            result.records.push(StepRecord {
                index,
                step_id: step.id(),
                tier: step.tier,
                tool: step.tool,
                workspace: step.workspace.name.clone(),
                features: step.features.label(),
                policy: step.policy,
                command,
                status,
                duration_ms,
            });

            if let Some(reason) = abort {
                result.termination = Termination::Aborted {
                    step_index: index,
                    step_id: Some(step.id()),
                    reason,
                };
                break;
            }
        }

        // Records are contiguous from the first step, so the rest never ran.
        for (index, step) in plan.steps().iter().enumerate().skip(result.records.len()) {
            self.emit(
                self.log
                    .entry(LogLevel::Warn, "step_skipped")
                    .with_step(index, step)
                    .with_outcome(Outcome::Skip),
            );
        }

        let (level, event) = match result.termination {
            Termination::Completed => (LogLevel::Info, "pipeline_complete"),
            Termination::Aborted { .. } => (LogLevel::Error, "pipeline_aborted"),
        };
        self.emit(
            self.log
                .entry(level, event)
                .with_exit_code(i32::from(result.exit_code()))
                .with_details(serde_json::json!({
                    "executed": result.records.len(),
                    "passed": result.passed_count(),
                    "failed": result.failed_count(),
                    "skipped": result.skipped_count(),
                })),
        );
        if let Err(err) = self.log.flush() {
            eprintln!("warning: failed to flush structured log: {err}");
        }

        result
    }

    fn abort_reason(&self, step: &Step, status: &StepStatus) -> Option<AbortReason> {
        match status {
            StepStatus::Passed => None,
            StepStatus::Interrupted { signal }
                if self.interrupt_policy == InterruptPolicy::Abort || step.policy.aborts() =>
            {
                Some(AbortReason::Interrupted { signal: *signal })
            }
            _ if step.policy.aborts() => Some(AbortReason::StepFailed),
            _ => None,
        }
    }

    /// Structured log failures never fail the run; the first one is reported
    /// and logging stops.
    fn emit(&mut self, entry: LogEntry) {
        if let Err(err) = self.log.emit_entry(entry) {
            eprintln!("warning: structured log disabled after write failure: {err}");
            let run_id = self.log.run_id().to_string();
            self.log = LogEmitter::sink(&run_id);
        }
    }
}
