use serde_json::{Value, json};

use super::{ToolContext, ToolError, required_str};
use crate::http::RequestSpec;

pub const PROXY_CALL: &str = "proxy_call";

/// POST `{flow, payload}` to the proxy endpoint and hand back whatever it
/// answers. A per-call `endpoint` argument overrides the configured one.
pub async fn proxy_call(ctx: &ToolContext, args: &Value) -> Result<Value, ToolError> {
    let endpoint = args
        .get("endpoint")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| ctx.proxy_endpoint.trim());
    if endpoint.is_empty() {
        return Err(ToolError::MissingConfig(
            "Missing proxy endpoint URL (set proxy_endpoint or pass endpoint).",
        ));
    }
    let flow = required_str(args, "flow")?;
    let payload = args
        .get("payload")
        .filter(|p| !p.is_null())
        .cloned()
        .ok_or(ToolError::MissingArgument("payload"))?;

    let spec = RequestSpec::post(endpoint)
        .header("Content-Type", "application/json")
        .json(json!({ "flow": flow, "payload": payload }));
    let context = json!({ "tool": PROXY_CALL, "endpoint": endpoint, "flow": flow });

    let body = ctx.http.perform(spec, context).await?;
    Ok(body.into_value())
}
