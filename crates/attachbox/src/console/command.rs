use crate::error::{HarnessError, HarnessResult};
use serde_json::{json, Value};

/// One line typed at the console.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Blank line; the console just prints a new prompt.
    Empty,
    /// `exit` ends the console.
    Exit,
    /// `module.method(args…)` or `module.property`, issued as `module_method`.
    Call { method: String, params: Vec<Value> },
}

impl Command {
    /// Parse a console line.
    ///
    /// Arguments are read as a JSON array body, so `eth.getBlockByNumber("0x0", false)`
    /// becomes `eth_getBlockByNumber` with `["0x0", false]`.
    ///
    /// # Errors
    /// `E_PROTOCOL` when the line is not a recognizable call.
    pub fn parse(line: &str) -> HarnessResult<Self> {
        let line = line.trim().trim_end_matches(';').trim_end();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        if line == "exit" || line == "exit()" {
            return Ok(Self::Exit);
        }
        let (target, args) = match line.find('(') {
            Some(open) => {
                let inner = line
                    .get(open + 1..)
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| invalid(line, "missing closing ')'"))?;
                (line.get(..open).unwrap_or_default().trim(), Some(inner.trim()))
            }
            None => (line, None),
        };
        let (module, member) = target
            .split_once('.')
            .ok_or_else(|| invalid(line, "expected module.method"))?;
        if !is_identifier(module) || !is_identifier(member) {
            return Err(invalid(line, "expected module.method"));
        }
        let params = match args {
            None | Some("") => Vec::new(),
            Some(args) => match serde_json::from_str::<Value>(&format!("[{args}]")) {
                Ok(Value::Array(values)) => values,
                _ => return Err(invalid(line, "arguments must be JSON values")),
            },
        };
        Ok(Self::Call {
            method: format!("{module}_{member}"),
            params,
        })
    }
}

fn is_identifier(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(line: &str, reason: &str) -> HarnessError {
    HarnessError::protocol(
        format!("invalid console command: {reason}"),
        json!({ "line": line }),
    )
}

/// Render a call result the way the console prints it.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

/// Render a failed call.
pub fn render_error(message: &str) -> String {
    format!("Error: {message}")
}
