//! Error taxonomy shared by every harness component.
//!
//! Every failure carries a stable [`ErrorCode`], a human message and an
//! optional JSON context with the diagnostic details (expected/actual text,
//! cursor position, output tail). The CLI maps codes to process exit codes.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result alias used across the crate.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Stable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The executable could not be launched.
    #[serde(rename = "E_SPAWN")]
    Spawn,
    /// A transport never became reachable.
    #[serde(rename = "E_CONNECT_TIMEOUT")]
    ConnectTimeout,
    /// The script references a name with no binding.
    #[serde(rename = "E_UNKNOWN_PLACEHOLDER")]
    UnknownPlaceholder,
    /// A binding exists but could not produce a value of the right kind.
    #[serde(rename = "E_UNRESOLVED_PLACEHOLDER")]
    UnresolvedPlaceholder,
    /// The raw script is malformed.
    #[serde(rename = "E_TEMPLATE_SYNTAX")]
    TemplateSyntax,
    /// Live output diverged from the script.
    #[serde(rename = "E_EXPECTATION_MISMATCH")]
    ExpectationMismatch,
    /// A step waited past its budget.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// Output ended before the script completed.
    #[serde(rename = "E_STREAM_CLOSED")]
    StreamClosed,
    /// The process did not exit in time and was killed.
    #[serde(rename = "E_STUCK_PROCESS")]
    StuckProcess,
    /// The process exited, but not the way the scenario expected.
    #[serde(rename = "E_EXIT_MISMATCH")]
    ExitMismatch,
    /// Malformed JSON-RPC traffic or console command.
    #[serde(rename = "E_PROTOCOL")]
    Protocol,
    /// Invalid scenario, endpoint or binding configuration.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// Operating system I/O failure.
    #[serde(rename = "E_IO")]
    Io,
    /// Broken internal invariant (poisoned lock and the like).
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// All codes, in exit-code order.
    pub const ALL: [ErrorCode; 14] = [
        ErrorCode::Internal,
        ErrorCode::Spawn,
        ErrorCode::ConnectTimeout,
        ErrorCode::UnknownPlaceholder,
        ErrorCode::UnresolvedPlaceholder,
        ErrorCode::TemplateSyntax,
        ErrorCode::ExpectationMismatch,
        ErrorCode::Timeout,
        ErrorCode::StreamClosed,
        ErrorCode::StuckProcess,
        ErrorCode::ExitMismatch,
        ErrorCode::Protocol,
        ErrorCode::Config,
        ErrorCode::Io,
    ];

    /// The wire representation, e.g. `E_TIMEOUT`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "E_SPAWN",
            Self::ConnectTimeout => "E_CONNECT_TIMEOUT",
            Self::UnknownPlaceholder => "E_UNKNOWN_PLACEHOLDER",
            Self::UnresolvedPlaceholder => "E_UNRESOLVED_PLACEHOLDER",
            Self::TemplateSyntax => "E_TEMPLATE_SYNTAX",
            Self::ExpectationMismatch => "E_EXPECTATION_MISMATCH",
            Self::Timeout => "E_TIMEOUT",
            Self::StreamClosed => "E_STREAM_CLOSED",
            Self::StuckProcess => "E_STUCK_PROCESS",
            Self::ExitMismatch => "E_EXIT_MISMATCH",
            Self::Protocol => "E_PROTOCOL",
            Self::Config => "E_CONFIG",
            Self::Io => "E_IO",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Parse the wire representation.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Process exit code the CLI uses for this error.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Spawn => 2,
            Self::ConnectTimeout => 3,
            Self::UnknownPlaceholder => 4,
            Self::UnresolvedPlaceholder => 5,
            Self::TemplateSyntax => 6,
            Self::ExpectationMismatch => 7,
            Self::Timeout => 8,
            Self::StreamClosed => 9,
            Self::StuckProcess => 10,
            Self::ExitMismatch => 11,
            Self::Protocol => 12,
            Self::Config => 13,
            Self::Io => 14,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type of the harness.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HarnessError {
    /// Classification.
    pub code: ErrorCode,
    /// Human readable summary.
    pub message: String,
    /// Structured diagnostics.
    pub context: Option<Value>,
}

impl HarnessError {
    /// Build an error from its parts.
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn spawn(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Spawn,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn connect_timeout(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::ConnectTimeout, message, context)
    }

    pub fn timeout(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Timeout, message, context)
    }

    pub fn template(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::TemplateSyntax, message, context)
    }

    pub fn protocol(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Protocol, message, context)
    }

    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Config, message, context)
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    /// Attach (or merge into) the JSON context.
    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = match self.context.take() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("details".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        map.insert(key.to_string(), value.into());
        self.context = Some(Value::Object(map));
        self
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    /// Serializable form for run results.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code,
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for HarnessError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let hint = match self.code {
            ErrorCode::ConnectTimeout => "check that the node was started with the flag exposing this transport",
            ErrorCode::UnknownPlaceholder => "bind the name in the scenario `bindings`/`conditions` or in code",
            ErrorCode::ExpectationMismatch => "compare `expected` and `actual` in the error context",
            ErrorCode::StuckProcess => "the node ignored the shutdown request; see `output_tail`",
            _ => return None,
        };
        Some(Box::new(hint))
    }
}

/// Serializable error record embedded in run results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl From<ErrorInfo> for HarnessError {
    fn from(info: ErrorInfo) -> Self {
        Self::new(info.code, info.message, info.context)
    }
}

/// Render bytes for diagnostics without failing on invalid UTF-8.
pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_strings() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("E_NOPE"), None);
    }

    #[test]
    fn exit_codes_are_unique() {
        let mut seen: Vec<i32> = ErrorCode::ALL.iter().map(|c| c.exit_code()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn with_context_merges_keys() {
        let err = HarnessError::timeout("late", serde_json::json!({"node_index": 3}))
            .with_context("cursor", 10);
        let context = err.context.unwrap_or_default();
        assert_eq!(context["node_index"], 3);
        assert_eq!(context["cursor"], 10);
    }
}
