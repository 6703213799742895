//! Step execution engine.
//!
//! A [`StepRunner`] executes one [`Step`] and reports its [`StepStatus`]. The
//! process runner spawns cargo in the current working directory (the
//! controller switches into the step's workspace first), inherits the standard
//! streams unmodified and blocks until the child exits. Only the exit status is
//! inspected.
//!
//! Termination signals reach the whole foreground process group, the driver
//! included. [`InterruptFlag`] records them instead of letting them end the
//! driver, so an interrupted step is reported and the run is wound down by the
//! controller.

use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::plan::Step;

/// Flag appended to `RUSTFLAGS` and `RUSTDOCFLAGS` for strict runs.
pub const DENY_WARNINGS: &str = "-D warnings";

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    /// Non-zero exit, or termination by a signal other than an interrupt.
    Failed {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The tool was interrupted from outside (SIGINT, SIGTERM, SIGHUP).
    Interrupted { signal: i32 },
    /// The tool could not be spawned at all.
    LaunchFailed { message: String },
}

impl StepStatus {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Exit code when the tool exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Passed => Some(0),
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }

    /// Terminating signal, if any.
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        match self {
            Self::Failed { signal, .. } => *signal,
            Self::Interrupted { signal } => Some(*signal),
            _ => None,
        }
    }

    /// Short label for logs and summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passed => "pass",
            Self::Failed { .. } => "fail",
            Self::Interrupted { .. } => "interrupted",
            Self::LaunchFailed { .. } => "error",
        }
    }
}

/// Executes steps. Implementations block until the step finishes.
pub trait StepRunner {
    /// Run `step` in the current working directory.
    fn run(&mut self, step: &Step) -> StepStatus;

    /// Program name used when rendering re-run hints.
    fn program(&self) -> &str {
        "cargo"
    }
}

/// Termination signal received by this process while it was installed.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    pending: Arc<AtomicUsize>,
}

impl InterruptFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record SIGINT, SIGTERM and SIGHUP in this flag instead of taking their
    /// default action. Handlers stay installed for the life of the process.
    #[cfg(unix)]
    pub fn install(&self) -> std::io::Result<()> {
        for signal in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
            let value = usize::try_from(signal).map_err(std::io::Error::other)?;
            signal_hook::flag::register_usize(signal, Arc::clone(&self.pending), value)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// The signal received since the last call, clearing it.
    pub fn take(&self) -> Option<i32> {
        match self.pending.swap(0, Ordering::SeqCst) {
            0 => None,
            signal => i32::try_from(signal).ok(),
        }
    }
}

/// Runs steps as child processes of a cargo-compatible program.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    interrupts: Option<InterruptFlag>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new("cargo")
    }
}

impl ProcessRunner {
    /// Runner invoking `program` with warnings denied.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            interrupts: None,
        }
    }

    /// Report a step as interrupted whenever `flag` caught a signal while it
    /// ran, whatever the child's own exit status.
    #[must_use]
    pub fn with_interrupts(mut self, flag: InterruptFlag) -> Self {
        self.interrupts = Some(flag);
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        for var in ["RUSTFLAGS", "RUSTDOCFLAGS"] {
            cmd.env(var, merged_flags(std::env::var(var).ok()));
        }
        cmd
    }

    fn caught_interrupt(&self) -> Option<i32> {
        self.interrupts.as_ref().and_then(InterruptFlag::take)
    }
}

impl StepRunner for ProcessRunner {
    fn run(&mut self, step: &Step) -> StepStatus {
        // Interrupted between steps: do not start another tool.
        if let Some(signal) = self.caught_interrupt() {
            return StepStatus::Interrupted { signal };
        }
        for tool_cmd in step.commands() {
            let status = match self.command(&tool_cmd.args).status() {
                Ok(status) => classify(status),
                Err(err) => StepStatus::LaunchFailed {
                    message: format!("failed to run `{}`: {err}", tool_cmd.render(&self.program)),
                },
            };
            if let Some(signal) = self.caught_interrupt()
                && !status.is_interrupted()
            {
                return StepStatus::Interrupted { signal };
            }
            if !status.is_success() {
                return status;
            }
        }
        StepStatus::Passed
    }

    fn program(&self) -> &str {
        &self.program
    }
}

/// Append [`DENY_WARNINGS`] to an inherited flag string.
#[must_use]
pub fn merged_flags(existing: Option<String>) -> String {
    match existing {
        Some(flags) if flags.contains(DENY_WARNINGS) => flags,
        Some(flags) if !flags.trim().is_empty() => format!("{} {DENY_WARNINGS}", flags.trim()),
        _ => String::from(DENY_WARNINGS),
    }
}

/// Map a child exit status onto a [`StepStatus`].
#[must_use]
pub fn classify(status: ExitStatus) -> StepStatus {
    if status.success() {
        return StepStatus::Passed;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            if is_interrupt_signal(signal) {
                return StepStatus::Interrupted { signal };
            }
            return StepStatus::Failed {
                code: None,
                signal: Some(signal),
            };
        }
        // Shells and cargo report a forwarded interrupt as 128 + signal.
        if let Some(code) = status.code()
            && code > 128
            && is_interrupt_signal(code - 128)
        {
            return StepStatus::Interrupted {
                signal: code - 128,
            };
        }
    }

    StepStatus::Failed {
        code: status.code(),
        signal: None,
    }
}

#[cfg(unix)]
fn is_interrupt_signal(signal: i32) -> bool {
    matches!(signal, libc::SIGINT | libc::SIGTERM | libc::SIGHUP)
}
