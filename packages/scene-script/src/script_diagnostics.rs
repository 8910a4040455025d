//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. These are
//! wrapped into a stable, JSON-serializable diagnostic format that a host UI or
//! the CLI can surface without access to Rust logs.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script attempted to use the host API incorrectly (missing members, wrong arity, etc).
    HostApiMisuse,
    /// Internal/host error (e.g. the script worker could not be started).
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
    /// 1-based line number in the script.
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
    /// Raw engine error string (useful for bug reports).
    #[serde(default)]
    pub raw: Option<String>,
}

impl ScriptDiagnostic {
    pub fn host_error(phase: ScriptPhase, message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::HostError,
            phase,
            message: message.into(),
            location: None,
            raw: None,
        }
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this avoids depending on its enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("property not found")
        || lower.contains("function not found")
        || lower.contains("mismatched types")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(0) as u32;
    Some(ScriptLocation {
        line,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    let raw = err.to_string();

    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: raw.clone(),
        location: location_of(err.position()),
        raw: Some(raw),
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    let raw = err.to_string();

    ScriptDiagnostic {
        kind: classify_message(&raw),
        phase,
        message: raw.clone(),
        location: location_of(err.position()),
        raw: Some(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_has_location() {
        let engine = rhai::Engine::new();
        let err = engine.compile("let a = 1;\nlet b = ;\n").unwrap_err();
        let diag = from_parse_error(&err);

        assert_eq!(diag.kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diag.phase, ScriptPhase::Compile);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_unknown_function_is_api_misuse() {
        let engine = rhai::Engine::new();
        let err = engine.run("no_such_function(1);").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Run, &err);

        assert_eq!(diag.kind, ScriptDiagnosticKind::HostApiMisuse);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(1));
    }

    #[test]
    fn test_serializes_snake_case() {
        let diag = ScriptDiagnostic::host_error(ScriptPhase::Run, "worker failed");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains(r#""kind":"host_error""#));
        assert!(json.contains(r#""phase":"run""#));
    }
}
