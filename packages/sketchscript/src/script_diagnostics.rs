//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. They are
//! wrapped into a stable, JSON-serializable diagnostic that the console prints
//! and the history records.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script attempted to use the host API incorrectly (missing members, wrong types, etc).
    HostApiMisuse,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Execute,
    /// Inside the per-tick frame callback.
    Frame,
    /// Inside the object factory or an animator's `update`.
    Object,
}

impl ScriptPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ScriptPhase::Compile => "compile",
            ScriptPhase::Execute => "execute",
            ScriptPhase::Frame => "frame callback",
            ScriptPhase::Object => "object callback",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number within the fragment.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// File the fragment came from, when executed from a file.
    pub source: Option<String>,
    /// Raw engine error string (useful for bug reports).
    #[serde(default)]
    pub raw: Option<String>,
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, &self.location) {
            (Some(src), Some(loc)) => write!(f, "{}:{}:{}: ", src, loc.line, loc.column)?,
            (Some(src), None) => write!(f, "{}: ", src)?,
            (None, Some(loc)) => write!(f, "line {}, column {}: ", loc.line, loc.column)?,
            (None, None) => {}
        }
        write!(f, "{} error: {}", self.phase.label(), self.message)
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("property not found")
        || lower.contains("function not found")
        || lower.contains("mismatched types")
        || lower.contains("no longer on the canvas")
        || lower.contains("expected a number")
        || lower.contains("invalid colour")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    if line == 0 {
        return None;
    }
    let column = pos.position().unwrap_or(0) as u32;
    Some(ScriptLocation {
        line,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError, source: Option<&str>) -> ScriptDiagnostic {
    let raw = err.to_string();

    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: err.err_type().to_string(),
        location: location_of(err.position()),
        source: source.map(str::to_string),
        raw: Some(raw),
    }
}

pub fn from_eval_error(
    phase: ScriptPhase,
    err: &rhai::EvalAltResult,
    source: Option<&str>,
) -> ScriptDiagnostic {
    let raw = err.to_string();
    let kind = classify_message(&raw);

    ScriptDiagnostic {
        kind,
        phase,
        message: raw.clone(),
        location: location_of(err.position()),
        source: source.map(str::to_string),
        raw: Some(raw),
    }
}
