//! CLI entrypoint for the lexical verification pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lexical_verify::config::ConfigError;
use lexical_verify::report::failure_summary;
use lexical_verify::structured_log::{LogEmitter, LogLevel, now_utc};
use lexical_verify::{
    ExecutionPlanBuilder, FeatureCatalog, InterruptFlag, InterruptPolicy, PipelineController,
    ProcessRunner, RunReport, VerifyConfig, WorkspaceContext, WorkspaceSet,
};

/// Runs tests, lints, memory-safety checks and strict docs across the lexical
/// workspaces. Optional tiers are gated by SKIP_VALGRIND, SKIP_MIRI,
/// SKIP_FEATURES, SKIP_CHECK, SKIP_DOCS, VALGRIND_EXHAUSTIVE and
/// MIRI_EXHAUSTIVE.
#[derive(Debug, Parser)]
#[command(name = "lexical-verify")]
#[command(about = "Verification pipeline for the lexical workspaces")]
struct Cli {
    /// Project root containing the lexical workspaces.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Program invoked for every tool step.
    #[arg(long, default_value = "cargo")]
    cargo: String,
    /// Print the execution plan as JSON and exit without running it.
    #[arg(long)]
    dry_run: bool,
    /// Structured JSONL log output path.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Markdown report path; a JSON rendering is written next to it.
    #[arg(long)]
    report: Option<PathBuf>,
    /// What an interrupted tool does to the run (abort or follow-step).
    #[arg(long, default_value = "abort", value_parser = parse_interrupt_policy)]
    on_interrupt: InterruptPolicy,
}

fn parse_interrupt_policy(raw: &str) -> Result<InterruptPolicy, ConfigError> {
    InterruptPolicy::from_str_loose(raw)
        .ok_or_else(|| ConfigError::UnknownInterruptPolicy(raw.to_string()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("lexical-verify: error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<u8, Box<dyn std::error::Error>> {
    let config = VerifyConfig::from_env();
    let catalog = FeatureCatalog::lexical();
    let workspaces = WorkspaceSet::lexical();
    let plan = ExecutionPlanBuilder::new(&config, &catalog, &workspaces).build();

    let inconsistencies = config.inconsistencies();
    for inconsistency in &inconsistencies {
        eprintln!("warning: {inconsistency}");
    }

    if cli.dry_run {
        let out = serde_json::json!({
            "run_id": plan.run_id(),
            "plan_fingerprint": plan.fingerprint(),
            "catalog_version": lexical_verify::features::CATALOG_VERSION,
            "config": config,
            "steps": plan.steps().iter().map(|step| serde_json::json!({
                "id": step.id(),
                "tier": step.tier,
                "tool": step.tool,
                "workspace": step.workspace.name,
                "features": step.features.label(),
                "policy": step.policy,
                "command": step.render_commands(&cli.cargo),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    let context = WorkspaceContext::new(&cli.root)?;
    let run_id = plan.run_id();
    let mut log = match &cli.log {
        Some(path) => LogEmitter::to_file(path, &run_id).map_err(|source| ConfigError::LogFile {
            path: path.clone(),
            source,
        })?,
        None => LogEmitter::sink(&run_id),
    };
    for inconsistency in &inconsistencies {
        let entry = log
            .entry(LogLevel::Warn, "config_inconsistency")
            .with_details(serde_json::json!({
                "skip_flag": inconsistency.skip_flag,
                "exhaustive_flag": inconsistency.exhaustive_flag,
            }));
        log.emit_entry(entry)?;
    }

    eprintln!(
        "lexical-verify: {} steps planned ({run_id}) in {}",
        plan.len(),
        context.root().display()
    );
    let interrupts = InterruptFlag::new();
    interrupts.install()?;
    let runner = ProcessRunner::new(&cli.cargo).with_interrupts(interrupts);
    let mut controller = PipelineController::new(runner, context)
        .with_interrupt_policy(cli.on_interrupt)
        .with_log(log)
        .with_progress(true);
    let result = controller.execute(&plan);

    eprint!("{}", failure_summary(&result));

    if let Some(path) = &cli.report {
        let code = result.exit_code();
        let report = RunReport::new(result, config, cli.on_interrupt, &cli.cargo, now_utc());
        let json_path = report.write(path)?;
        eprintln!(
            "Report written to {} and {}",
            path.display(),
            json_path.display()
        );
        return Ok(code);
    }
    Ok(result.exit_code())
}
