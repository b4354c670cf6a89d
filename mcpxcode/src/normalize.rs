//! Shaping process output into the result returned to callers.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::{
    catalog::{OutputFormat, ToolDescriptor},
    error::{ErrorReport, ToolError},
    invoke::{ProcessOutcome, Termination},
};

static NM_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9A-Fa-f]{8,16})?\s+([A-Za-z])\s+\S").unwrap());
static DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):(?P<column>\d+): ",
        r"(?P<severity>error|warning): (?P<message>.+)$",
    ))
    .unwrap()
});

#[derive(Debug, Clone)]
pub struct NormalizeLimits {
    /// Lines kept by the `binary-summary` format.
    pub summary_lines: usize,
    /// Bytes of stderr quoted in a `NonZeroExit` error.
    pub excerpt_bytes: usize,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self {
            summary_lines: 200,
            excerpt_bytes: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// Raw process output kept for diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawOutput {
    /// Present whenever the invocation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub tool: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub payload: Map<String, Value>,
    pub raw: RawOutput,
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<ToolError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub duration_ms: u64,
}

fn serialize_error<S: Serializer>(
    error: &Option<ToolError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    error.as_ref().map(ErrorReport::from).serialize(serializer)
}

impl InvocationResult {
    /// Result for a request refused before any process was spawned.
    pub fn rejected(tool: &str, error: ToolError) -> Self {
        Self {
            tool: tool.to_string(),
            status: Status::Failure,
            exit_code: None,
            payload: Map::new(),
            raw: RawOutput::default(),
            error: Some(error),
            started_at: None,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Exit code for the `tool` subcommand.
    pub fn process_exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, ToolError::exit_code)
    }
}

/// Turn a finished process into an [`InvocationResult`] according to the
/// descriptor's output format.
///
/// The payload is built even when the process failed, so partial output of
/// a timed-out or failing tool is still structured. Raw stdout is attached
/// on every failure.
pub fn normalize(
    descriptor: &ToolDescriptor,
    outcome: ProcessOutcome,
    limits: &NormalizeLimits,
) -> InvocationResult {
    let stdout = outcome.stdout.text().into_owned();
    let stderr = outcome.stderr.text().into_owned();

    let (exit_code, mut error) = match outcome.termination {
        Termination::TimedOut(limit) => (None, Some(ToolError::Timeout { limit })),
        Termination::Cancelled => (None, Some(ToolError::Cancelled)),
        Termination::Exited(Some(code)) if descriptor.accepted_exit_codes.contains(&code) => {
            (Some(code), None)
        }
        Termination::Exited(code) => {
            let source = if stderr.trim().is_empty() { &stdout } else { &stderr };
            let excerpt = tail(source, limits.excerpt_bytes).to_string();
            (code, Some(ToolError::NonZeroExit { code, excerpt }))
        }
    };

    let mut payload = match shape(descriptor, &stdout, &stderr, limits) {
        Ok(payload) => payload,
        Err(reason) => {
            log::debug!("{}: {reason}", descriptor.name);
            if error.is_none() {
                error = Some(ToolError::OutputParseFailure { reason });
            }
            Map::new()
        }
    };

    if descriptor.format == OutputFormat::BinarySummary {
        payload.insert("total_bytes".into(), json!(outcome.stdout.total_bytes));
    }
    if !outcome.stdout.is_utf8() {
        payload.insert("lossy_utf8".into(), Value::Bool(true));
    }

    let raw_stdout = error.as_ref().map(|_| match descriptor.format {
        OutputFormat::BinarySummary => head_lines(&stdout, limits.summary_lines),
        _ => stdout.clone(),
    });

    InvocationResult {
        tool: descriptor.name.clone(),
        status: if error.is_none() {
            Status::Success
        } else {
            Status::Failure
        },
        exit_code,
        payload,
        raw: RawOutput {
            stdout: raw_stdout,
            stderr,
            truncated: outcome.stdout.truncated || outcome.stderr.truncated,
        },
        error,
        started_at: None,
        duration_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

fn shape(
    descriptor: &ToolDescriptor,
    stdout: &str,
    stderr: &str,
    limits: &NormalizeLimits,
) -> Result<Map<String, Value>, String> {
    match descriptor.format {
        OutputFormat::Text => Ok(text_payload(stdout)),
        OutputFormat::BuildLog => Ok(build_log_payload(stdout, stderr)),
        OutputFormat::Table => table_payload(stdout, descriptor.table_preamble),
        OutputFormat::Json => json_payload(stdout, &descriptor.json_select),
        OutputFormat::BinarySummary => Ok(binary_summary_payload(stdout, limits.summary_lines)),
    }
}

fn text_payload(stdout: &str) -> Map<String, Value> {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut payload = Map::new();
    payload.insert("lines".into(), json!(lines));
    payload
}

fn build_log_payload(stdout: &str, stderr: &str) -> Map<String, Value> {
    let mut diagnostics: Vec<Value> = Vec::new();
    for line in stdout.lines().chain(stderr.lines()) {
        let Some(caps) = DIAGNOSTIC.captures(line) else {
            continue;
        };
        let diagnostic = json!({
            "file": &caps["file"],
            "line": caps["line"].parse::<u64>().unwrap_or_default(),
            "column": caps["column"].parse::<u64>().unwrap_or_default(),
            "severity": &caps["severity"],
            "message": &caps["message"],
        });
        // xcodebuild repeats diagnostics in its summary
        if !diagnostics.contains(&diagnostic) {
            diagnostics.push(diagnostic);
        }
    }

    let count = |severity: &str| {
        diagnostics
            .iter()
            .filter(|d| d["severity"] == severity)
            .count()
    };
    let error_count = count("error");
    let warning_count = count("warning");

    let mut payload = text_payload(stdout);
    if stdout.contains("** BUILD SUCCEEDED **") {
        payload.insert("outcome".into(), json!("succeeded"));
    } else if stdout.contains("** BUILD FAILED **") {
        payload.insert("outcome".into(), json!("failed"));
    }
    payload.insert("error_count".into(), json!(error_count));
    payload.insert("warning_count".into(), json!(warning_count));
    payload.insert("diagnostics".into(), Value::Array(diagnostics));
    payload
}

fn table_payload(stdout: &str, preamble: usize) -> Result<Map<String, Value>, String> {
    let mut payload = Map::new();
    let preamble_lines: Vec<&str> = stdout.lines().take(preamble).collect();
    let mut lines = stdout
        .lines()
        .skip(preamble)
        .filter(|line| !line.trim().is_empty());

    let columns: Vec<&str> = match lines.next() {
        Some(header) => header.split_whitespace().collect(),
        None if stdout.trim().is_empty() => Vec::new(),
        None => return Err("no table header found".to_string()),
    };
    let rows: Vec<Value> = lines.map(|line| Value::Object(table_row(&columns, line))).collect();

    if !preamble_lines.is_empty() {
        payload.insert("preamble".into(), json!(preamble_lines));
    }
    payload.insert("columns".into(), json!(columns));
    payload.insert("rows".into(), Value::Array(rows));
    Ok(payload)
}

/// Split `line` into one cell per column. The last column takes the rest of
/// the line; columns without a cell are `null`.
fn table_row(columns: &[&str], line: &str) -> Map<String, Value> {
    let mut record = Map::new();
    let mut rest = line.trim();
    for (index, column) in columns.iter().enumerate() {
        let cell = if rest.is_empty() {
            Value::Null
        } else if index + 1 == columns.len() {
            Value::String(std::mem::take(&mut rest).to_string())
        } else {
            let (cell, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            rest = tail.trim_start();
            Value::String(cell.to_string())
        };
        record.insert(column.to_string(), cell);
    }
    record
}

fn json_payload(stdout: &str, select: &[&str]) -> Result<Map<String, Value>, String> {
    let document: Value =
        serde_json::from_str(stdout.trim()).map_err(|e| format!("invalid JSON: {e}"))?;

    let mut payload = Map::new();
    match select
        .iter()
        .find_map(|pointer| document.pointer(pointer).map(|value| (*pointer, value)))
    {
        Some((pointer, value)) => {
            payload.insert("selected".into(), json!(pointer));
            payload.insert("data".into(), value.clone());
        }
        None => {
            payload.insert("data".into(), document);
        }
    }
    Ok(payload)
}

fn binary_summary_payload(stdout: &str, max_lines: usize) -> Map<String, Value> {
    let lines: Vec<&str> = stdout.lines().collect();
    let shown = lines.len().min(max_lines);

    let mut symbol_types: BTreeMap<&str, u64> = BTreeMap::new();
    for line in &lines {
        if let Some(caps) = NM_ROW.captures(line) {
            if let Some(kind) = caps.get(1) {
                *symbol_types.entry(kind.as_str()).or_default() += 1;
            }
        }
    }

    let mut payload = Map::new();
    payload.insert("total_lines".into(), json!(lines.len()));
    payload.insert("shown_lines".into(), json!(shown));
    payload.insert("omitted_lines".into(), json!(lines.len() - shown));
    payload.insert("truncated".into(), json!(shown < lines.len()));
    if !symbol_types.is_empty() {
        payload.insert("symbol_types".into(), json!(symbol_types));
    }
    payload.insert("lines".into(), json!(&lines[..shown]));
    payload
}

fn head_lines(text: &str, max_lines: usize) -> String {
    text.lines().take(max_lines).collect::<Vec<_>>().join("\n")
}

/// Last `max_bytes` of `text`, starting on a character boundary.
fn tail(text: &str, max_bytes: usize) -> &str {
    let start = text.len().saturating_sub(max_bytes);
    let start = (start..=text.len())
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(text.len());
    text[start..].trim()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        catalog::{Family, Registry},
        invoke::Capture,
    };

    fn capture(text: &str) -> Capture {
        Capture {
            bytes: text.as_bytes().to_vec(),
            total_bytes: text.len(),
            truncated: false,
        }
    }

    fn outcome(termination: Termination, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            termination,
            stdout: capture(stdout),
            stderr: capture(stderr),
            elapsed: Duration::from_millis(12),
        }
    }

    fn tool(format: OutputFormat) -> ToolDescriptor {
        ToolDescriptor::new(Family::Xcrun, "test", "test tool").format(format)
    }

    #[test]
    fn table_rows_become_records() {
        let result = normalize(
            &tool(OutputFormat::Table),
            outcome(Termination::Exited(Some(0)), "NAME STATUS\nfoo OK\n", ""),
            &NormalizeLimits::default(),
        );

        assert!(result.is_success());
        assert_eq!(result.payload["rows"], json!([{ "NAME": "foo", "STATUS": "OK" }]));
        assert_eq!(result.payload["columns"], json!(["NAME", "STATUS"]));
        assert_eq!(result.raw.stdout, None);
        assert_eq!(result.duration_ms, 12);
    }

    #[test]
    fn table_last_column_absorbs_rest_and_short_rows_are_null() {
        let text = "NAME STATE   DETAIL\nsim1 Booted  iPhone 15 Pro\nsim2\n";
        let result = normalize(
            &tool(OutputFormat::Table),
            outcome(Termination::Exited(Some(0)), text, ""),
            &NormalizeLimits::default(),
        );
        assert_eq!(
            result.payload["rows"],
            json!([
                { "NAME": "sim1", "STATE": "Booted", "DETAIL": "iPhone 15 Pro" },
                { "NAME": "sim2", "STATE": null, "DETAIL": null },
            ])
        );
    }

    #[test]
    fn otool_header_table_skips_preamble() {
        let registry = Registry::builtin();
        let otool = registry.lookup("xcrun_otool_headers").unwrap();
        let text = "\
/tmp/a.out:
Mach header
      magic  cputype cpusubtype  caps    filetype ncmds sizeofcmds      flags
 0xfeedfacf 16777228          0  0x00           2    17       1056 0x00200085
";
        let result = normalize(
            otool,
            outcome(Termination::Exited(Some(0)), text, ""),
            &NormalizeLimits::default(),
        );

        assert_eq!(result.payload["preamble"], json!(["/tmp/a.out:", "Mach header"]));
        assert_eq!(result.payload["rows"][0]["magic"], json!("0xfeedfacf"));
        assert_eq!(result.payload["rows"][0]["filetype"], json!("2"));
        assert_eq!(result.payload["rows"][0]["flags"], json!("0x00200085"));
    }

    #[test]
    fn json_selection_and_parse_failure() {
        let registry = Registry::builtin();
        let schemes = registry.lookup("xcrun_list_schemes").unwrap();

        let result = normalize(
            schemes,
            outcome(
                Termination::Exited(Some(0)),
                r#"{"workspace": {"name": "App", "schemes": ["App", "AppTests"]}}"#,
                "",
            ),
            &NormalizeLimits::default(),
        );
        assert_eq!(result.payload["data"], json!(["App", "AppTests"]));
        assert_eq!(result.payload["selected"], json!("/workspace/schemes"));

        let result = normalize(
            schemes,
            outcome(Termination::Exited(Some(0)), "xcodebuild: warning: not json", ""),
            &NormalizeLimits::default(),
        );
        assert_eq!(result.status, Status::Failure);
        assert_eq!(result.error.as_ref().unwrap().kind(), "OutputParseFailure");
        assert_eq!(
            result.raw.stdout.as_deref(),
            Some("xcodebuild: warning: not json")
        );
    }

    #[test]
    fn non_zero_exit_quotes_stderr() {
        let result = normalize(
            &tool(OutputFormat::Text),
            outcome(
                Termination::Exited(Some(1)),
                "partial\n",
                "*** Error: App validation failed\n",
            ),
            &NormalizeLimits::default(),
        );

        assert_eq!(result.exit_code, Some(1));
        assert_eq!(
            result.error,
            Some(ToolError::NonZeroExit {
                code: Some(1),
                excerpt: "*** Error: App validation failed".into(),
            })
        );
        assert_eq!(result.payload["lines"], json!(["partial"]));
        assert_eq!(result.raw.stdout.as_deref(), Some("partial\n"));
        assert_eq!(result.process_exit_code(), 1);
    }

    #[test]
    fn non_zero_exit_wins_over_parse_failure() {
        let result = normalize(
            &tool(OutputFormat::Json),
            outcome(Termination::Exited(Some(70)), "", "xcodebuild: error: no project"),
            &NormalizeLimits::default(),
        );
        assert_eq!(result.error.as_ref().unwrap().kind(), "NonZeroExit");
    }

    #[test]
    fn timeout_keeps_partial_output() {
        let result = normalize(
            &tool(OutputFormat::Text),
            outcome(
                Termination::TimedOut(Duration::from_secs(5)),
                "Starting recording\n",
                "",
            ),
            &NormalizeLimits::default(),
        );
        assert_eq!(
            result.error,
            Some(ToolError::Timeout {
                limit: Duration::from_secs(5)
            })
        );
        assert_eq!(result.exit_code, None);
        assert_eq!(result.payload["lines"], json!(["Starting recording"]));
        assert_eq!(result.process_exit_code(), 124);
    }

    #[test]
    fn binary_summary_truncates_and_annotates() {
        let mut text = String::new();
        for i in 0..5 {
            text.push_str(&format!("00000001000{i:05x} T _func{i}\n"));
        }
        text.push_str("                 U _printf\n");

        let result = normalize(
            &tool(OutputFormat::BinarySummary),
            outcome(Termination::Exited(Some(0)), &text, ""),
            &NormalizeLimits {
                summary_lines: 2,
                ..NormalizeLimits::default()
            },
        );

        assert_eq!(result.payload["total_lines"], json!(6));
        assert_eq!(result.payload["shown_lines"], json!(2));
        assert_eq!(result.payload["omitted_lines"], json!(4));
        assert_eq!(result.payload["truncated"], json!(true));
        assert_eq!(result.payload["symbol_types"], json!({ "T": 5, "U": 1 }));
        assert_eq!(result.payload["total_bytes"], json!(text.len()));
        assert_eq!(result.payload["lines"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn binary_summary_failure_keeps_bounded_raw_output() {
        let text = "a\nb\nc\nd\n";
        let result = normalize(
            &tool(OutputFormat::BinarySummary),
            outcome(Termination::Exited(Some(1)), text, "nm: error"),
            &NormalizeLimits {
                summary_lines: 2,
                ..NormalizeLimits::default()
            },
        );
        assert_eq!(result.raw.stdout.as_deref(), Some("a\nb"));
    }

    #[test]
    fn build_log_extracts_diagnostics() {
        let log = "\
CompileSwift normal arm64 /src/App/ContentView.swift
/src/App/ContentView.swift:12:5: error: cannot find 'foo' in scope
/src/App/Model.swift:3:9: warning: variable 'x' was never used
/src/App/ContentView.swift:12:5: error: cannot find 'foo' in scope
** BUILD FAILED **
";
        let result = normalize(
            &tool(OutputFormat::BuildLog),
            outcome(Termination::Exited(Some(65)), log, ""),
            &NormalizeLimits::default(),
        );

        assert_eq!(result.payload["outcome"], json!("failed"));
        assert_eq!(result.payload["error_count"], json!(1));
        assert_eq!(result.payload["warning_count"], json!(1));
        assert_eq!(
            result.payload["diagnostics"][0],
            json!({
                "file": "/src/App/ContentView.swift",
                "line": 12,
                "column": 5,
                "severity": "error",
                "message": "cannot find 'foo' in scope",
            })
        );
        assert_eq!(result.error.as_ref().unwrap().kind(), "NonZeroExit");
    }

    #[test]
    fn invalid_utf8_is_flagged() {
        let result = normalize(
            &tool(OutputFormat::Text),
            ProcessOutcome {
                termination: Termination::Exited(Some(0)),
                stdout: Capture {
                    bytes: vec![b'o', b'k', 0xff, b'\n'],
                    total_bytes: 4,
                    truncated: false,
                },
                stderr: Capture::default(),
                elapsed: Duration::ZERO,
            },
            &NormalizeLimits::default(),
        );
        assert!(result.is_success());
        assert_eq!(result.payload["lossy_utf8"], json!(true));
    }

    #[test]
    fn serialized_result_shape() {
        let result = InvocationResult::rejected(
            "xcrun_build",
            ToolError::MissingArgument {
                field: "scheme".into(),
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            json!({
                "tool": "xcrun_build",
                "status": "failure",
                "payload": {},
                "raw": {},
                "error": {
                    "kind": "MissingArgument",
                    "message": "missing required argument `scheme`",
                    "field": "scheme",
                },
                "duration_ms": 0,
            })
        );
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(tail("  abc  ", 100), "abc");
    }
}
