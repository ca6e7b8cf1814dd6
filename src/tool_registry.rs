use std::sync::LazyLock;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticEntry, DiagnosticKind, DiagnosticLog};
use crate::tools::{self, PROXY_CALL, RUN_CODE, ToolContext, ToolError, WEB_SEARCH};

// Single source of truth for the "tools" schema the LLM sees
static SCHEMAS: LazyLock<Value> = LazyLock::new(|| {
    json!([
        {
            "type": "function",
            "function": {
                "name": WEB_SEARCH,
                "description": "Search the web with Google Custom Search",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query"
                        },
                        "num": {
                            "type": "integer",
                            "description": "Number of results",
                            "default": 5,
                            "minimum": 1,
                            "maximum": 10
                        }
                    },
                    "required": ["query"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": PROXY_CALL,
                "description": "Call the configured proxy endpoint with a flow name and JSON payload",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "flow": {
                            "type": "string",
                            "description": "Flow to run on the proxy"
                        },
                        "payload": {
                            "type": "object",
                            "description": "JSON payload for the flow"
                        },
                        "endpoint": {
                            "type": "string",
                            "description": "Override the configured proxy endpoint URL"
                        }
                    },
                    "required": ["flow", "payload"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": RUN_CODE,
                "description": "Run JavaScript in a sandboxed process. The code is the body of an async function; use return for the result and console.log for logs.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "JavaScript source to execute"
                        },
                        "timeout_ms": {
                            "type": "integer",
                            "description": "Soft timeout in milliseconds",
                            "default": 2000,
                            "minimum": 100,
                            "maximum": 2147483647
                        }
                    },
                    "required": ["code"]
                }
            }
        }
    ])
});

/// Outcome of one dispatch. Either branch renders to text for a `tool` message.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success { payload: Value },
    Failure { message: String },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// JSON view shown to the user and sent to the model.
    pub fn to_value(&self) -> Value {
        match self {
            ToolResult::Success { payload } => payload.clone(),
            ToolResult::Failure { message } => json!({ "ok": false, "error": message }),
        }
    }

    pub fn to_content(&self) -> String {
        self.to_value().to_string()
    }
}

/// Tool arguments as sent by the model. Anything that is not a JSON object
/// (including malformed text) becomes an empty object.
pub fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    ctx: ToolContext,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    pub fn schemas(&self) -> &'static Value {
        &SCHEMAS
    }

    pub fn names(&self) -> Vec<&'static str> {
        vec![WEB_SEARCH, PROXY_CALL, RUN_CODE]
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        self.ctx.diagnostics()
    }

    /// Run one tool call. Never fails: unknown names, bad arguments, missing
    /// configuration and backend errors all come back as `Failure`.
    pub async fn dispatch(&self, name: &str, arguments_raw: &str) -> ToolResult {
        let args = parse_arguments(arguments_raw);
        let started = Instant::now();
        debug!(tool = name, "dispatching tool");

        let outcome = match name {
            WEB_SEARCH => tools::web_search(&self.ctx, &args).await,
            PROXY_CALL => tools::proxy_call(&self.ctx, &args).await,
            RUN_CODE => tools::run_code(&self.ctx, &args).await,
            _ => Err(ToolError::UnknownTool(name.to_string())),
        };

        match outcome {
            Ok(payload) => ToolResult::Success { payload },
            Err(err) => {
                let message = err.to_string();
                warn!(tool = name, error = %message, "tool failed");
                self.diagnostics().record(
                    DiagnosticEntry::new(DiagnosticKind::ToolFailed, json!({ "tool": name }))
                        .with_duration_ms(started.elapsed().as_millis() as u64)
                        .with_error(message.clone()),
                );
                ToolResult::Failure { message }
            }
        }
    }
}
