use serde_json::Value;

use super::{ToolContext, ToolError, integer_arg, required_str};
use crate::sandbox::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};

pub const RUN_CODE: &str = "run_code";

pub fn timeout_ms(args: &Value) -> u64 {
    integer_arg(args, "timeout_ms")
        .unwrap_or(DEFAULT_TIMEOUT_MS as i64)
        .clamp(MIN_TIMEOUT_MS as i64, MAX_TIMEOUT_MS as i64) as u64
}

/// Run JavaScript in the sandbox. A report with `ok: false` (thrown error,
/// soft timeout, hard abort) becomes a tool failure carrying any captured logs.
pub async fn run_code(ctx: &ToolContext, args: &Value) -> Result<Value, ToolError> {
    let code = required_str(args, "code")?;
    let report = ctx.sandbox.execute(code, timeout_ms(args)).await;

    if report.ok {
        return serde_json::to_value(&report).map_err(|e| ToolError::Execution {
            message: format!("Failed to encode sandbox report: {}", e),
        });
    }

    let mut message = report
        .error
        .unwrap_or_else(|| "Sandbox execution failed".to_string());
    if !report.logs.is_empty() {
        message.push_str("\nlogs:\n");
        message.push_str(&report.logs.join("\n"));
    }
    Err(ToolError::Execution { message })
}
