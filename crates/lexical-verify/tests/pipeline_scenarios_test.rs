//! Integration tests: end-to-end pipeline scenarios with a scripted runner.
//!
//! Validates:
//! 1. Empty environment runs every default tier in order and passes.
//! 2. Skipping both memory tools removes every valgrind and miri step.
//! 3. A lint failure halts the run before the feature matrix and docs.
//! 4. The structured log of a run validates line by line.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use lexical_verify::config::{SKIP_MIRI, SKIP_VALGRIND};
use lexical_verify::controller::Termination;
use lexical_verify::structured_log::{LogEmitter, validate_log_file};
use lexical_verify::{
    ExecutionPlan, ExecutionPlanBuilder, FeatureCatalog, PipelineController, Step, StepRunner,
    StepStatus, Tier, Tool, VerifyConfig, WorkspaceContext, WorkspaceSet,
};
use parking_lot::{Mutex, const_mutex};

/// Tests in this binary share the process working directory.
static CWD: Mutex<()> = const_mutex(());

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn lexical_root(prefix: &str) -> PathBuf {
    let root = unique_tmp_dir(prefix);
    for ws in WorkspaceSet::lexical().auxiliary() {
        std::fs::create_dir_all(root.join(&ws.path)).expect("create workspace dir");
    }
    root
}

fn plan_for(vars: &[(&str, &str)]) -> ExecutionPlan {
    let config = VerifyConfig::from_lookup(|name| {
        vars.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| (*value).to_string())
    });
    ExecutionPlanBuilder::new(&config, &FeatureCatalog::lexical(), &WorkspaceSet::lexical()).build()
}

/// Passes every step except those whose tier is listed in `fail_tiers`.
#[derive(Default)]
struct TierFailingRunner {
    fail_tiers: Vec<Tier>,
    executed: Vec<(Tier, Tool)>,
}

impl StepRunner for TierFailingRunner {
    fn run(&mut self, step: &Step) -> StepStatus {
        self.executed.push((step.tier, step.tool));
        if self.fail_tiers.contains(&step.tier) {
            StepStatus::Failed {
                code: Some(101),
                signal: None,
            }
        } else {
            StepStatus::Passed
        }
    }
}

fn tier_order(executed: &[(Tier, Tool)]) -> Vec<Tier> {
    let mut tiers: Vec<Tier> = Vec::new();
    for (tier, _) in executed {
        if tiers.last() != Some(tier) {
            tiers.push(*tier);
        }
    }
    tiers
}

#[test]
fn empty_environment_runs_default_tiers_and_passes() {
    let _cwd = CWD.lock();
    let root = lexical_root("scenario-empty-env");
    let plan = plan_for(&[]);
    let catalog_len = FeatureCatalog::lexical().len();
    assert_eq!(plan.len(), 12 + catalog_len);

    let context = WorkspaceContext::new(&root).expect("context");
    let mut controller = PipelineController::new(TierFailingRunner::default(), context);
    let result = controller.execute(&plan);

    assert!(result.succeeded(), "all-pass run should succeed: {result:?}");
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.records.len(), plan.len());

    let runner = controller.into_runner();
    assert_eq!(
        tier_order(&runner.executed),
        [
            Tier::Baseline,
            Tier::LintAndFormat,
            Tier::MemorySafetyBaseline,
            Tier::FeatureMatrix,
            Tier::DocsStrict,
        ]
    );
    let memory: Vec<Tool> = runner
        .executed
        .iter()
        .filter(|(tier, _)| *tier == Tier::MemorySafetyBaseline)
        .map(|(_, tool)| *tool)
        .collect();
    assert_eq!(memory, [Tool::Valgrind, Tool::Valgrind, Tool::Miri, Tool::Miri]);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn skipping_both_memory_tools_removes_their_steps() {
    let _cwd = CWD.lock();
    let root = lexical_root("scenario-skip-memory");
    let plan = plan_for(&[(SKIP_VALGRIND, "1"), (SKIP_MIRI, "1")]);
    assert_eq!(plan.count_tool(Tool::Valgrind), 0);
    assert_eq!(plan.count_tool(Tool::Miri), 0);
    assert_eq!(plan.count_tier(Tier::MemorySafetyBaseline), 0);

    let context = WorkspaceContext::new(&root).expect("context");
    let mut controller = PipelineController::new(TierFailingRunner::default(), context);
    let result = controller.execute(&plan);

    assert!(result.succeeded());
    assert_eq!(
        tier_order(&controller.runner().executed),
        [
            Tier::Baseline,
            Tier::LintAndFormat,
            Tier::FeatureMatrix,
            Tier::DocsStrict,
        ]
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn lint_failure_halts_before_feature_matrix_and_docs() {
    let _cwd = CWD.lock();
    let root = lexical_root("scenario-lint-failure");
    let plan = plan_for(&[]);

    let context = WorkspaceContext::new(&root).expect("context");
    let runner = TierFailingRunner {
        fail_tiers: vec![Tier::LintAndFormat],
        ..TierFailingRunner::default()
    };
    let mut controller = PipelineController::new(runner, context);
    let result = controller.execute(&plan);

    assert!(!result.succeeded());
    assert_eq!(result.exit_code(), 1);
    // Baseline (2 steps) then the first lint step.
    assert_eq!(result.records.len(), 3);
    assert_eq!(result.failed_count(), 1);
    assert!(matches!(
        result.termination,
        Termination::Aborted { step_index: 2, .. }
    ));
    assert!(
        controller
            .runner()
            .executed
            .iter()
            .all(|(tier, _)| matches!(tier, Tier::Baseline | Tier::LintAndFormat))
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn baseline_failure_is_recorded_and_run_continues() {
    let _cwd = CWD.lock();
    let root = lexical_root("scenario-baseline-failure");
    let plan = plan_for(&[]);

    let context = WorkspaceContext::new(&root).expect("context");
    let runner = TierFailingRunner {
        fail_tiers: vec![Tier::Baseline],
        ..TierFailingRunner::default()
    };
    let mut controller = PipelineController::new(runner, context);
    let result = controller.execute(&plan);

    assert_eq!(result.records.len(), plan.len());
    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(result.failed_count(), 2);
    assert_eq!(result.exit_code(), 1);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn run_log_validates_against_schema() {
    let _cwd = CWD.lock();
    let root = lexical_root("scenario-log");
    let log_path = root.join("artifacts").join("run.jsonl");
    let plan = plan_for(&[(SKIP_VALGRIND, "1"), (SKIP_MIRI, "1")]);

    let log = LogEmitter::to_file(&log_path, &plan.run_id()).expect("open log");
    let context = WorkspaceContext::new(&root).expect("context");
    let runner = TierFailingRunner {
        fail_tiers: vec![Tier::FeatureMatrix],
        ..TierFailingRunner::default()
    };
    let mut controller = PipelineController::new(runner, context).with_log(log);
    let result = controller.execute(&plan);
    drop(controller);

    let check = validate_log_file(&log_path).expect("read log");
    assert!(check.is_valid(), "log should validate: {:?}", check.errors);
    // pipeline_start + start/result per step + pipeline_complete
    assert_eq!(check.lines, 2 + 2 * result.records.len());

    let text = std::fs::read_to_string(&log_path).expect("read log text");
    let last: serde_json::Value =
        serde_json::from_str(text.lines().last().expect("last line")).expect("json");
    assert_eq!(last["event"], "pipeline_complete");
    assert_eq!(last["run_id"], plan.run_id());
    assert_eq!(last["exit_code"], 1);

    let _ = std::fs::remove_dir_all(root);
}
