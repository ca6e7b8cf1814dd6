use serde_json::{Value, json};
use tracing::debug;

use crate::config::ClientConfig;
use crate::http::{DiagnosticClient, RequestError, RequestSpec, ResponseBody};
use crate::types::Message;

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    chat_path: String,
    api_key: String,
    model: String,
    http: DiagnosticClient,
}

impl LlmClient {
    pub fn new(config: ClientConfig, http: DiagnosticClient) -> Self {
        Self {
            base_url: config.base_url,
            chat_path: config.chat_path,
            api_key: config.api_key,
            model: config.model,
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request body. `tools` is only attached when it is a
    /// non-empty array, together with an automatic tool-choice directive.
    pub fn request_body(&self, messages: &[Message], tools: &Value) -> Value {
        let mut req = json!({
            "model": self.model,
            "messages": messages,
        });
        if tools.as_array().is_some_and(|t| !t.is_empty()) {
            req["tools"] = tools.clone();
            req["tool_choice"] = json!("auto");
        }
        req
    }

    /// One non-streaming completion call. The body is returned as-is; the
    /// agent decides what an error object or a missing choice means.
    pub async fn chat_once(
        &self,
        messages: &[Message],
        tools: &Value,
    ) -> Result<ResponseBody, RequestError> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let req = self.request_body(messages, tools);
        let with_tools = req.get("tools").is_some();
        debug!(model = %self.model, messages = messages.len(), with_tools, "chat completion");

        let spec = RequestSpec::post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .bearer(&self.api_key)
            .json(req);
        let context = json!({
            "kind": "chat",
            "path": self.chat_path,
            "model": self.model,
            "tools": with_tools,
        });
        self.http.perform(spec, context).await
    }
}
