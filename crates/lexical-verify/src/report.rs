//! Report generation for verification runs.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, VerifyConfig};
use crate::controller::{AbortReason, InterruptPolicy, RunResult, Termination, Verdict};

/// Counts derived from a [`RunResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub planned: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub verdict: Verdict,
}

impl RunSummary {
    #[must_use]
    pub fn from_result(result: &RunResult) -> Self {
        Self {
            planned: result.planned,
            executed: result.records.len(),
            passed: result.passed_count(),
            failed: result.failed_count(),
            skipped: result.skipped_count(),
            verdict: result.verdict(),
        }
    }
}

/// A run report combining configuration, summary and per-step outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Report title.
    pub title: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    /// Program used for tool invocations.
    pub program: String,
    pub config: VerifyConfig,
    pub interrupt_policy: InterruptPolicy,
    /// Configuration warnings, e.g. overridden exhaustive flags.
    pub warnings: Vec<String>,
    pub summary: RunSummary,
    pub result: RunResult,
}

impl RunReport {
    #[must_use]
    pub fn new(
        result: RunResult,
        config: VerifyConfig,
        interrupt_policy: InterruptPolicy,
        program: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            title: String::from("lexical verification report"),
            timestamp: timestamp.into(),
            program: program.into(),
            config,
            interrupt_policy,
            warnings: config
                .inconsistencies()
                .iter()
                .map(ToString::to_string)
                .collect(),
            summary: RunSummary::from_result(&result),
            result,
        }
    }

    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let verdict = match self.summary.verdict {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
        };
        let _ = writeln!(out, "# {}\n", self.title);
        let _ = writeln!(out, "- Run: {}", self.result.run_id);
        let _ = writeln!(out, "- Plan fingerprint: {}", self.result.plan_fingerprint);
        let _ = writeln!(out, "- Timestamp: {}", self.timestamp);
        let _ = writeln!(out, "- Program: {}", self.program);
        let _ = writeln!(out, "- Interrupt policy: {}", self.interrupt_policy.as_str());
        let _ = writeln!(out, "- Verdict: {verdict}");
        let _ = writeln!(out, "- Planned: {}", self.summary.planned);
        let _ = writeln!(out, "- Passed: {}", self.summary.passed);
        let _ = writeln!(out, "- Failed: {}", self.summary.failed);
        let _ = writeln!(out, "- Skipped: {}\n", self.summary.skipped);

        if !self.warnings.is_empty() {
            out.push_str("## Warnings\n\n");
            for warning in &self.warnings {
                let _ = writeln!(out, "- {warning}");
            }
            out.push('\n');
        }

        out.push_str("| # | Tier | Tool | Features | Workspace | Policy | Status | ms |\n");
        out.push_str("|---|------|------|----------|-----------|--------|--------|----|\n");
        for r in &self.result.records {
            let status = if r.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                r.index + 1,
                r.tier,
                r.tool,
                r.features,
                r.workspace,
                r.policy.as_str(),
                status,
                r.duration_ms
            );
        }

        if let Some(line) = termination_line(&self.result) {
            let _ = writeln!(out, "\n{line}");
        }

        let mut failures = self.result.failures().peekable();
        if failures.peek().is_some() {
            out.push_str("\n## Failures\n\n");
            for r in failures {
                let _ = writeln!(
                    out,
                    "- `{}` ({}): in `{}` run `{}`",
                    r.step_id,
                    r.status.label(),
                    r.workspace,
                    r.command
                );
            }
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    /// Write the markdown report to `path` and the JSON rendering next to
    /// it. Returns the JSON path.
    pub fn write(&self, path: &Path) -> Result<PathBuf, ConfigError> {
        let json_path = json_sibling(path);
        let write = |target: &Path, contents: String| -> std::io::Result<()> {
            if let Some(parent) = target.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)
        };
        write(path, self.to_markdown()).map_err(|source| ConfigError::ReportFile {
            path: path.to_path_buf(),
            source,
        })?;
        write(&json_path, self.to_json()).map_err(|source| ConfigError::ReportFile {
            path: json_path.clone(),
            source,
        })?;
        Ok(json_path)
    }
}

/// `report.md` -> `report.json`; `report` -> `report.json`.
#[must_use]
pub fn json_sibling(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "json") {
        let mut name = path.as_os_str().to_owned();
        name.push(".json");
        return PathBuf::from(name);
    }
    path.with_extension("json")
}

/// Plain-text summary for stderr: verdict line, each failed step with the
/// command that reproduces it, and why the run stopped early.
#[must_use]
pub fn failure_summary(result: &RunResult) -> String {
    let mut out = String::new();
    let summary = RunSummary::from_result(result);
    match summary.verdict {
        Verdict::Passed => {
            let _ = writeln!(
                out,
                "lexical-verify: PASSED ({} of {} steps)",
                summary.passed, summary.planned
            );
            return out;
        }
        Verdict::Failed => {
            let _ = writeln!(
                out,
                "lexical-verify: FAILED ({} passed, {} failed, {} skipped of {} planned)",
                summary.passed, summary.failed, summary.skipped, summary.planned
            );
        }
    }

    for r in result.failures() {
        let _ = writeln!(out, "  {} [{}]", r.step_id, r.status.label());
        let _ = writeln!(
            out,
            "    tier: {}  tool: {}  features: {}  workspace: {}",
            r.tier, r.tool, r.features, r.workspace
        );
        let _ = writeln!(out, "    re-run (in {}): {}", r.workspace, r.command);
    }
    if let Some(line) = termination_line(result) {
        let _ = writeln!(out, "  {line}");
    }
    out
}

fn termination_line(result: &RunResult) -> Option<String> {
    let Termination::Aborted {
        step_index,
        step_id,
        reason,
    } = &result.termination
    else {
        return None;
    };
    let at = step_id.as_deref().map_or_else(
        || format!("step {}", step_index + 1),
        |id| format!("step {} ({id})", step_index + 1),
    );
    let why = match reason {
        AbortReason::StepFailed => String::from("abort-immediately step failed"),
        AbortReason::Interrupted { signal } => format!("interrupted by signal {signal}"),
        AbortReason::WorkspaceUnavailable { message } => message.clone(),
        AbortReason::Reentrant { held } => {
            format!("pipeline already running inside workspace '{held}'")
        }
    };
    Some(format!("Run stopped at {at}: {why}"))
}
