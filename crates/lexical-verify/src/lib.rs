//! Verification pipeline driver for the lexical workspaces.
//!
//! This crate provides:
//! - Feature catalog: the literal list of feature combinations worth testing
//! - Configuration: environment gates for the optional tiers and tools
//! - Plan building: an ordered, fingerprinted list of cargo invocations
//! - Workspace context: scoped working-directory switches with restoration
//! - Pipeline control: sequential execution with per-step failure policies
//! - Structured logging and run reports (markdown + JSON)

#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod features;
pub mod plan;
pub mod report;
pub mod runner;
pub mod structured_log;
pub mod workspace;

pub use config::{ConfigError, VerifyConfig};
pub use controller::{InterruptPolicy, PipelineController, RunResult, Verdict};
pub use features::{FeatureCatalog, FeatureSelection, FeatureSet};
pub use plan::{ExecutionPlan, ExecutionPlanBuilder, FailurePolicy, Step, Tier, Tool};
pub use report::RunReport;
pub use runner::{InterruptFlag, ProcessRunner, StepRunner, StepStatus};
pub use workspace::{Workspace, WorkspaceContext, WorkspaceError, WorkspaceSet};
