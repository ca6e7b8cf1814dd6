use serde_json::Value;
use thiserror::Error;

use crate::config::SearchSettings;
use crate::diagnostics::DiagnosticLog;
use crate::http::{DiagnosticClient, RequestError};
use crate::sandbox::Sandbox;

pub use self::proxy_call::{PROXY_CALL, proxy_call};
pub use self::run_code::{RUN_CODE, run_code, timeout_ms};
pub use self::web_search::{WEB_SEARCH, clamp_num, web_search};

mod proxy_call;
mod run_code;
mod web_search;

/// Everything a tool implementation may touch. Tools share no mutable state;
/// the only shared piece is the append-only diagnostics buffer.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub http: DiagnosticClient,
    pub search: SearchSettings,
    pub proxy_endpoint: String,
    pub sandbox: Sandbox,
}

impl ToolContext {
    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.http.diagnostics()
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0}")]
    MissingConfig(&'static str),

    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("{message}")]
    Execution { message: String },
}

/// Non-empty string argument, trimmed.
pub(crate) fn required_str<'a>(args: &'a Value, name: &'static str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ToolError::MissingArgument(name))
}

/// Integer argument the way a lenient caller would read it: numbers are
/// truncated, numeric strings are parsed, anything else falls back.
pub(crate) fn integer_arg(args: &Value, name: &str) -> Option<i64> {
    match args.get(name)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}
