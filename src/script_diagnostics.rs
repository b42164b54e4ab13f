//! Structured script diagnostics.
//!
//! Rhai reports parse and runtime errors with positions relative to the full
//! source it was given, which includes the LED API prelude. These helpers
//! map them back onto the user's program and classify them so the CLI (or
//! an editor) can point at the offending block.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Bad arguments to an LED function: malformed color, unknown strip, negative wait.
    HostApiMisuse,
    /// Sandbox limit hit (operation budget, nesting, sizes).
    LimitExceeded,
    /// Internal/host error (worker thread lost, stopped mid-call).
    HostError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Run,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the user script (not the injected prelude).
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Raw engine error string.
    #[serde(default)]
    pub raw: Option<String>,
}

impl ScriptDiagnostic {
    pub fn host(message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::HostError,
            phase: ScriptPhase::Run,
            message: message.into(),
            location: None,
            raw: None,
        }
    }
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} (line {}, column {})", self.message, loc.line, loc.column),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptDiagnostic {}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many operations")
        || lower.contains("too deep")
        || lower.contains("exceeds maximum")
        || lower.contains("stack overflow")
    {
        return ScriptDiagnosticKind::LimitExceeded;
    }

    if lower.contains("interpreter stopped") {
        return ScriptDiagnosticKind::HostError;
    }

    if lower.contains("malformed color")
        || lower.contains("out of range")
        || lower.contains("strip id")
        || lower.contains("wait duration")
        || lower.contains("function not found")
        || lower.contains("mismatched types")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

/// Remove the `(line N, position M)` suffixes Rhai adds to error text.
/// They count from the top of the prelude; `location` carries the user position.
fn strip_engine_positions(message: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r" ?\(line \d+, position \d+\)").unwrap());
    pattern.replace_all(message, "").trim_end().to_string()
}

fn map_position_to_user(line: u32, column: u32, user_line_offset: usize) -> Option<ScriptLocation> {
    let offset = user_line_offset as u32;
    if line == 0 || line <= offset {
        return None;
    }
    Some(ScriptLocation {
        line: line - offset,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError, user_line_offset: usize) -> ScriptDiagnostic {
    let raw = err.to_string();
    let pos = err.position();
    let location = map_position_to_user(
        pos.line().unwrap_or(0) as u32,
        pos.position().unwrap_or(0) as u32,
        user_line_offset,
    );

    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: strip_engine_positions(&raw),
        location,
        raw: Some(raw),
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult, user_line_offset: usize) -> ScriptDiagnostic {
    let raw = err.to_string();
    let kind = classify_message(&raw);
    let pos = err.position();
    let location = map_position_to_user(
        pos.line().unwrap_or(0) as u32,
        pos.position().unwrap_or(0) as u32,
        user_line_offset,
    );

    ScriptDiagnostic {
        kind,
        phase,
        message: strip_engine_positions(&raw),
        location,
        raw: Some(raw),
    }
}
