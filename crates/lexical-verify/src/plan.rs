//! Execution plan construction.
//!
//! [`ExecutionPlanBuilder`] turns a [`VerifyConfig`], the [`FeatureCatalog`]
//! and the [`WorkspaceSet`] into an ordered list of [`Step`]s. Building is a
//! pure data transformation: it never fails and never touches the filesystem.
//! Misconfiguration such as an unknown feature name surfaces later as a tool
//! failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::VerifyConfig;
use crate::features::{FeatureCatalog, FeatureSelection};
use crate::workspace::{Workspace, WorkspaceSet};

/// Category of verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Baseline,
    FeatureMatrix,
    MemorySafetyBaseline,
    MemorySafetyMatrix,
    LintAndFormat,
    DocsStrict,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::FeatureMatrix => "feature_matrix",
            Self::MemorySafetyBaseline => "memory_safety_baseline",
            Self::MemorySafetyMatrix => "memory_safety_matrix",
            Self::LintAndFormat => "lint_and_format",
            Self::DocsStrict => "docs_strict",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External collaborator a step drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// `cargo test`.
    Test,
    /// `cargo valgrind test`.
    Valgrind,
    /// `cargo +nightly miri test`.
    Miri,
    /// `cargo fmt -- --check` followed by `cargo clippy`.
    LintAndFormat,
    /// `cargo doc --no-deps`.
    Docs,
}

impl Tool {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Valgrind => "valgrind",
            Self::Miri => "miri",
            Self::LintAndFormat => "lint",
            Self::Docs => "doc",
        }
    }

    /// Cargo invocations for this tool with the given feature selection.
    ///
    /// Most tools map to a single command; lint/format checks formatting first
    /// and lints second.
    #[must_use]
    pub fn commands(self, features: &FeatureSelection) -> Vec<ToolCommand> {
        let feature_args = features.cargo_args();
        match self {
            Self::Test => vec![ToolCommand::cargo(["test"]).with_args(feature_args)],
            Self::Valgrind => {
                vec![ToolCommand::cargo(["valgrind", "test", "--release"]).with_args(feature_args)]
            }
            Self::Miri => {
                vec![ToolCommand::cargo(["+nightly", "miri", "test"]).with_args(feature_args)]
            }
            Self::LintAndFormat => vec![
                ToolCommand::cargo(["fmt", "--", "--check"]),
                ToolCommand::cargo(["clippy"])
                    .with_args(feature_args)
                    .with_args(["--", "--deny", "warnings"]),
            ],
            Self::Docs => vec![ToolCommand::cargo(["doc", "--no-deps"]).with_args(feature_args)],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failing step does to the rest of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the pipeline on failure.
    AbortImmediately,
    /// Record the failure and keep going.
    RecordAndContinue,
}

impl FailurePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AbortImmediately => "abort_immediately",
            Self::RecordAndContinue => "record_and_continue",
        }
    }

    #[must_use]
    pub const fn aborts(self) -> bool {
        matches!(self, Self::AbortImmediately)
    }
}

/// Cargo arguments for one external invocation. The program itself is chosen
/// by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCommand {
    pub args: Vec<String>,
}

impl ToolCommand {
    #[must_use]
    pub fn cargo<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-style rendering for logs and re-run hints.
    #[must_use]
    pub fn render(&self, program: &str) -> String {
        let mut out = String::from(program);
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// One scheduled tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub tier: Tier,
    pub tool: Tool,
    pub workspace: Workspace,
    pub features: FeatureSelection,
    pub policy: FailurePolicy,
}

impl Step {
    /// Stable identity, e.g. `feature_matrix/test@lexical[format,radix]`.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}/{}@{}[{}]",
            self.tier,
            self.tool,
            self.workspace.name,
            self.features.label()
        )
    }

    #[must_use]
    pub fn commands(&self) -> Vec<ToolCommand> {
        self.tool.commands(&self.features)
    }

    /// Every command rendered with `program`, joined with ` && `.
    #[must_use]
    pub fn render_commands(&self, program: &str) -> String {
        self.commands()
            .iter()
            .map(|cmd| cmd.render(program))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Ordered steps for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    steps: Vec<Step>,
}

impl ExecutionPlan {
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps in `tier`.
    #[must_use]
    pub fn count_tier(&self, tier: Tier) -> usize {
        self.steps.iter().filter(|step| step.tier == tier).count()
    }

    /// Number of steps driving `tool`.
    #[must_use]
    pub fn count_tool(&self, tool: Tool) -> usize {
        self.steps.iter().filter(|step| step.tool == tool).count()
    }

    /// SHA-256 over step ids, policies and rendered commands, as lowercase hex.
    ///
    /// Two plans with the same fingerprint run the same invocations in the
    /// same order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.id().as_bytes());
            hasher.update([0u8]);
            hasher.update(step.policy.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(step.workspace.path.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(step.render_commands("cargo").as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Run id derived from the fingerprint, e.g. `run-3f2a9c01b7de`.
    #[must_use]
    pub fn run_id(&self) -> String {
        let fingerprint = self.fingerprint();
        format!("run-{}", &fingerprint[..12])
    }
}

/// Builds the ordered step list for a run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPlanBuilder<'a> {
    config: &'a VerifyConfig,
    catalog: &'a FeatureCatalog,
    workspaces: &'a WorkspaceSet,
}

impl<'a> ExecutionPlanBuilder<'a> {
    #[must_use]
    pub fn new(
        config: &'a VerifyConfig,
        catalog: &'a FeatureCatalog,
        workspaces: &'a WorkspaceSet,
    ) -> Self {
        Self {
            config,
            catalog,
            workspaces,
        }
    }

    /// Assemble the plan. Tiers appear in a fixed order: baseline, lint and
    /// format, memory-safety baseline, feature matrix, memory-safety matrices,
    /// strict docs. Disabled tiers are omitted entirely.
    #[must_use]
    pub fn build(&self) -> ExecutionPlan {
        let mut steps = Vec::new();
        let primary = self.workspaces.primary();

        for features in baseline_selections() {
            steps.push(self.step(Tier::Baseline, Tool::Test, primary, features));
        }

        if self.config.check_enabled() {
            for workspace in self.workspaces.iter() {
                steps.push(Step {
                    tier: Tier::LintAndFormat,
                    tool: Tool::LintAndFormat,
                    workspace: workspace.clone(),
                    features: FeatureSelection::Features(workspace.lint_features.clone()),
                    policy: FailurePolicy::AbortImmediately,
                });
            }
        }

        for (tool, enabled) in [
            (Tool::Valgrind, self.config.valgrind_enabled()),
            (Tool::Miri, self.config.miri_enabled()),
        ] {
            if enabled {
                for features in baseline_selections() {
                    steps.push(self.step(Tier::MemorySafetyBaseline, tool, primary, features));
                }
            }
        }

        if self.config.features_enabled() {
            steps.extend(self.matrix(Tier::FeatureMatrix, Tool::Test));
        }

        if self.config.valgrind_matrix_enabled() {
            steps.extend(self.matrix(Tier::MemorySafetyMatrix, Tool::Valgrind));
        }

        if self.config.miri_matrix_enabled() {
            steps.extend(self.matrix(Tier::MemorySafetyMatrix, Tool::Miri));
        }

        if self.config.docs_enabled() {
            for features in [
                FeatureSelection::NoDefault(Default::default()),
                FeatureSelection::Features(self.catalog.docs_features().clone()),
            ] {
                steps.push(Step {
                    tier: Tier::DocsStrict,
                    tool: Tool::Docs,
                    workspace: primary.clone(),
                    features,
                    policy: FailurePolicy::AbortImmediately,
                });
            }
        }

        ExecutionPlan::new(steps)
    }

    fn step(&self, tier: Tier, tool: Tool, workspace: &Workspace, features: FeatureSelection) -> Step {
        Step {
            tier,
            tool,
            workspace: workspace.clone(),
            features,
            policy: FailurePolicy::RecordAndContinue,
        }
    }

    fn matrix(&self, tier: Tier, tool: Tool) -> impl Iterator<Item = Step> + '_ {
        let primary = self.workspaces.primary();
        self.catalog.combinations().iter().map(move |set| {
            self.step(tier, tool, primary, FeatureSelection::Features(set.clone()))
        })
    }
}

fn baseline_selections() -> [FeatureSelection; 2] {
    [FeatureSelection::Default, FeatureSelection::AllFeatures]
}
