//! Structured logging contract for verification runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or any writer.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks for emitted logs.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::Step;
use crate::runner::StepStatus;

/// Prefix of every trace id emitted by this crate.
pub const TRACE_PREFIX: &str = "lexical-verify";

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Step outcome as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    /// Never started because the run stopped earlier.
    Skip,
    Error,
    Interrupted,
}

impl From<&StepStatus> for Outcome {
    fn from(status: &StepStatus) -> Self {
        match status {
            StepStatus::Passed => Self::Pass,
            StepStatus::Failed { .. } => Self::Fail,
            StepStatus::Interrupted { .. } => Self::Interrupted,
            StepStatus::LaunchFailed { .. } => Self::Error,
        }
    }
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
/// Optional fields carry step context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Position of the step in the plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Rendered command line(s) for the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Exit code for external processes when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Wall-clock duration of the step (milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            step_index: None,
            step_id: None,
            tier: None,
            tool: None,
            workspace: None,
            features: None,
            policy: None,
            command: None,
            outcome: None,
            exit_code: None,
            signal: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Attach the identity and context of a plan step.
    #[must_use]
    pub fn with_step(mut self, index: usize, step: &Step) -> Self {
        self.step_index = Some(index);
        self.step_id = Some(step.id());
        self.tier = Some(step.tier.as_str().to_string());
        self.tool = Some(step.tool.as_str().to_string());
        self.workspace = Some(step.workspace.name.clone());
        self.features = Some(step.features.label());
        self.policy = Some(step.policy.as_str().to_string());
        self
    }

    /// Set the rendered command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Set outcome, exit code and signal from a step status.
    #[must_use]
    pub fn with_status(mut self, status: &StepStatus) -> Self {
        self.outcome = Some(Outcome::from(status));
        self.exit_code = status.exit_code();
        self.signal = status.signal();
        if let StepStatus::LaunchFailed { message } = status {
            self.details = Some(serde_json::json!({ "launch_error": message }));
        }
        self
    }

    /// Set exit code.
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Set duration in milliseconds.
    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file. Each line is flushed as soon
    /// as it is complete.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(
            Box::new(std::io::LineWriter::new(file)),
            run_id,
        ))
    }

    /// Create an emitter that discards everything.
    #[must_use]
    pub fn sink(run_id: &str) -> Self {
        Self::to_writer(Box::new(std::io::sink()), run_id)
    }

    /// Create an emitter over any writer (tests pass a shared buffer).
    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Start an entry with an empty trace id; [`Self::emit_entry`] fills it.
    #[must_use]
    pub fn entry(&self, level: LogLevel, event: &str) -> LogEntry {
        LogEntry::new(String::new(), level, event)
    }

    /// Write `entry`, assigning the next `prefix::run::seq` trace id and the
    /// emitter's run id where the entry leaves them empty.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            self.seq += 1;
            entry.trace_id = format!("{TRACE_PREFIX}::{}::{:03}", self.run_id, self.seq);
        }
        entry.run_id.get_or_insert_with(|| self.run_id.clone());
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const REQUIRED_FIELDS: &[&str] = &["timestamp", "trace_id", "level", "event"];

/// Closed vocabularies of the string-valued enum fields.
const ENUM_FIELDS: &[(&str, &[&str])] = &[
    ("level", &["info", "warn", "error"]),
    ("outcome", &["pass", "fail", "skip", "error", "interrupted"]),
    (
        "tier",
        &[
            "baseline",
            "feature_matrix",
            "memory_safety_baseline",
            "memory_safety_matrix",
            "lint_and_format",
            "docs_strict",
        ],
    ),
    ("policy", &["abort_immediately", "record_and_continue"]),
];

/// One schema violation in a JSONL log.
#[derive(Debug, Error)]
pub enum LogSchemaError {
    #[error("line {line}: not valid JSON: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}: expected a JSON object")]
    NotAnObject { line: usize },
    #[error("line {line}: required field '{field}' is missing")]
    MissingField { line: usize, field: &'static str },
    #[error("line {line}: '{value}' is not a valid {field}")]
    InvalidValue {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: entries with an outcome must carry step_id")]
    OutcomeWithoutStep { line: usize },
    #[error("line {line}: trace_id '{trace_id}' is not <prefix>::<run_id>::<seq>")]
    TraceId { line: usize, trace_id: String },
}

impl LogSchemaError {
    /// Field the violation concerns, `None` for whole-line problems.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Json { .. } | Self::NotAnObject { .. } => None,
            Self::MissingField { field, .. } | Self::InvalidValue { field, .. } => Some(*field),
            Self::OutcomeWithoutStep { .. } => Some("step_id"),
            Self::TraceId { .. } => Some("trace_id"),
        }
    }

    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::Json { line, .. }
            | Self::NotAnObject { line }
            | Self::MissingField { line, .. }
            | Self::InvalidValue { line, .. }
            | Self::OutcomeWithoutStep { line }
            | Self::TraceId { line, .. } => *line,
        }
    }
}

/// Check one JSONL line; returns every violation found on it.
pub fn validate_log_line(text: &str, line: usize) -> Result<LogEntry, Vec<LogSchemaError>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|source| vec![LogSchemaError::Json { line, source }])?;
    let Some(obj) = value.as_object() else {
        return Err(vec![LogSchemaError::NotAnObject { line }]);
    };

    let mut errors: Vec<LogSchemaError> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !obj.contains_key(**field))
        .map(|&field| LogSchemaError::MissingField { line, field })
        .collect();

    for &(field, allowed) in ENUM_FIELDS {
        if let Some(raw) = obj.get(field).and_then(serde_json::Value::as_str)
            && !allowed.contains(&raw)
        {
            errors.push(LogSchemaError::InvalidValue {
                line,
                field,
                value: raw.to_string(),
            });
        }
    }

    if obj.contains_key("outcome") && !obj.get("step_id").is_some_and(serde_json::Value::is_string)
    {
        errors.push(LogSchemaError::OutcomeWithoutStep { line });
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(serde_json::Value::as_str)
        && trace_id.split("::").count() != 3
    {
        errors.push(LogSchemaError::TraceId {
            line,
            trace_id: trace_id.to_string(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(value).map_err(|source| vec![LogSchemaError::Json { line, source }])
}

/// Result of checking a whole log file.
#[derive(Debug, Default)]
pub struct LogCheck {
    /// Non-blank lines seen.
    pub lines: usize,
    pub errors: Vec<LogSchemaError>,
}

impl LogCheck {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check every non-blank line of a JSONL file.
pub fn validate_log_file(path: &Path) -> std::io::Result<LogCheck> {
    let content = std::fs::read_to_string(path)?;
    let mut check = LogCheck::default();
    for (idx, text) in content.lines().enumerate() {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        check.lines += 1;
        if let Err(errors) = validate_log_line(text, idx + 1) {
            check.errors.extend(errors);
        }
    }
    Ok(check)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

// Howard Hinnant's days-to-civil conversion, for days since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Shared in-memory writer so tests can read back emitted lines.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn fields(errors: &[LogSchemaError]) -> Vec<Option<&'static str>> {
        errors.iter().map(LogSchemaError::field).collect()
    }

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("lexical-verify::run-1::001", LogLevel::Info, "plan_built");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "lexical-verify::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "plan_built");
        // Optional fields should be absent
        assert!(parsed.get("run_id").is_none());
        assert!(parsed.get("tier").is_none());
        assert!(parsed.get("outcome").is_none());
    }

    #[test]
    fn status_maps_to_outcome_and_codes() {
        let entry = LogEntry::new("a::b::001", LogLevel::Error, "step_result").with_status(
            &StepStatus::Failed {
                code: Some(101),
                signal: None,
            },
        );
        assert_eq!(entry.outcome, Some(Outcome::Fail));
        assert_eq!(entry.exit_code, Some(101));
        assert_eq!(entry.signal, None);

        let launch = LogEntry::new("a::b::002", LogLevel::Error, "step_result").with_status(
            &StepStatus::LaunchFailed {
                message: String::from("no cargo"),
            },
        );
        assert_eq!(launch.outcome, Some(Outcome::Error));
        assert_eq!(launch.details.unwrap()["launch_error"], "no cargo");
    }

    #[test]
    fn validate_valid_line() {
        let entry = LogEntry::new("lexical-verify::run-1::001", LogLevel::Info, "plan_built");
        let json = entry.to_jsonl().unwrap();
        let result = validate_log_line(&json, 1);
        assert!(result.is_ok(), "Valid line should pass: {result:?}");
    }

    #[test]
    fn validate_missing_required_field() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"info","event":"x"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert_eq!(fields(&errors), [Some("trace_id")]);
    }

    #[test]
    fn validate_invalid_enums() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::c","level":"debug","event":"x","tier":"fuzz","policy":"maybe"}"#;
        let errors = validate_log_line(json, 3).unwrap_err();
        assert_eq!(fields(&errors), [Some("level"), Some("tier"), Some("policy")]);
        assert!(errors.iter().all(|e| e.line() == 3));
        assert_eq!(errors[1].to_string(), "line 3: 'fuzz' is not a valid tier");
    }

    #[test]
    fn validate_outcome_requires_step_id() {
        let json =
            r#"{"timestamp":"t","trace_id":"a::b::c","level":"info","event":"x","outcome":"skip"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(matches!(errors[..], [LogSchemaError::OutcomeWithoutStep { line: 1 }]));
    }

    #[test]
    fn validate_invalid_json_and_trace_id() {
        let errors = validate_log_line("not json at all", 1).unwrap_err();
        assert!(matches!(errors[..], [LogSchemaError::Json { .. }]));

        let errors = validate_log_line("[1, 2]", 2).unwrap_err();
        assert!(matches!(errors[..], [LogSchemaError::NotAnObject { line: 2 }]));

        let json = r#"{"timestamp":"t","trace_id":"no-separator","level":"info","event":"x"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert_eq!(fields(&errors), [Some("trace_id")]);
    }

    #[test]
    fn emitter_generates_sequential_trace_ids() {
        let buf = SharedBuf::default();
        let mut emitter = LogEmitter::to_writer(Box::new(buf.clone()), "run-42");
        for event in ["start", "end"] {
            let entry = emitter.entry(LogLevel::Info, event);
            emitter.emit_entry(entry).unwrap();
        }
        let mut skipped = emitter
            .entry(LogLevel::Warn, "step_skipped")
            .with_outcome(Outcome::Skip);
        skipped.step_id = Some(String::from("docs_strict/doc@lexical[no-default]"));
        emitter.emit_entry(skipped).unwrap();

        let text = buf.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let parsed = validate_log_line(line, i + 1).expect("emitted line validates");
            assert_eq!(parsed.run_id.as_deref(), Some("run-42"));
            assert_eq!(
                parsed.trace_id,
                format!("lexical-verify::run-42::{:03}", i + 1)
            );
        }
        assert!(lines[2].contains(r#""outcome":"skip""#));
    }

    #[test]
    fn file_emitter_writes_each_line_without_explicit_flush() {
        let dir = crate::workspace::test_support::unique_tmp_dir("log-line-buffered");
        let path = dir.join("logs").join("run.jsonl");
        let mut emitter = LogEmitter::to_file(&path, "run-7").unwrap();
        let entry = emitter.entry(LogLevel::Info, "pipeline_start");
        emitter.emit_entry(entry).unwrap();

        // Read while the emitter is still alive and unflushed.
        let check = validate_log_file(&path).unwrap();
        assert_eq!(check.lines, 1);
        assert!(check.is_valid(), "{:?}", check.errors);
        drop(emitter);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn utc_formatting_is_calendar_correct() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2000-02-29T12:34:56Z
        assert_eq!(format_utc(951_827_696, 7), "2000-02-29T12:34:56.007Z");
        // 2026-10-16T00:00:00Z
        assert_eq!(format_utc(1_792_108_800, 0), "2026-10-16T00:00:00.000Z");
    }
}
