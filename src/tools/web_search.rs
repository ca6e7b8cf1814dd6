use serde_json::{Value, json};

use super::{ToolContext, ToolError, integer_arg, required_str};
use crate::http::RequestSpec;

pub const WEB_SEARCH: &str = "web_search";

pub const DEFAULT_NUM: i64 = 5;
pub const MIN_NUM: i64 = 1;
pub const MAX_NUM: i64 = 10;

/// Result count clamped into `[MIN_NUM, MAX_NUM]`; out-of-range values are
/// pulled in rather than rejected.
pub fn clamp_num(args: &Value) -> i64 {
    integer_arg(args, "num")
        .unwrap_or(DEFAULT_NUM)
        .clamp(MIN_NUM, MAX_NUM)
}

/// Google Custom Search. The backend's JSON is returned verbatim.
pub async fn web_search(ctx: &ToolContext, args: &Value) -> Result<Value, ToolError> {
    let key = ctx.search.api_key.trim();
    let cx = ctx.search.cx.trim();
    if key.is_empty() || cx.is_empty() {
        return Err(ToolError::MissingConfig(
            "Missing Google Search API Key or CSE CX (set search_api_key and search_cx).",
        ));
    }
    let query = required_str(args, "query")?;
    let num = clamp_num(args);

    let spec = RequestSpec::get(ctx.search.endpoint.as_str())
        .query("key", key)
        .query("cx", cx)
        .query("q", query)
        .query("num", num.to_string());
    let context = json!({ "tool": WEB_SEARCH, "query": query, "num": num });

    let body = ctx.http.perform(spec, context).await?;
    Ok(body.into_value())
}
