use crate::agent::LlmClientTrait;
use crate::http::{RequestError, ResponseBody, TRANSPORT_HINT};
use crate::types::Message;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted model endpoint. Replies are served in the order they were added;
/// clones share the script and the call history.
#[derive(Clone, Default)]
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<Result<ResponseBody, RequestError>>>>,
    call_history: Arc<Mutex<Vec<(Vec<Message>, Value)>>>,
    next_id: Arc<Mutex<usize>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, reply: Result<ResponseBody, RequestError>) {
        self.responses.lock().unwrap().push_back(reply);
    }

    fn next_call_id(&self) -> String {
        let mut n = self.next_id.lock().unwrap();
        *n += 1;
        format!("call_{}", n)
    }

    pub fn add_text_response(&mut self, content: &str) {
        self.add_raw_response(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }));
    }

    pub fn add_tool_call_response(&mut self, tool_name: &str, args: &str) {
        self.add_tool_calls_response(&[(tool_name, args)]);
    }

    pub fn add_tool_calls_response(&mut self, calls: &[(&str, &str)]) {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(name, args)| {
                json!({
                    "id": self.next_call_id(),
                    "type": "function",
                    "function": { "name": name, "arguments": args }
                })
            })
            .collect();
        self.add_raw_response(json!({
            "choices": [{
                "message": { "role": "assistant", "content": null, "tool_calls": tool_calls }
            }]
        }));
    }

    pub fn add_error_response(&mut self, error_msg: &str) {
        self.add_raw_response(json!({ "error": { "message": error_msg } }));
    }

    pub fn add_raw_response(&mut self, body: Value) {
        self.push(Ok(ResponseBody::Json(body)));
    }

    pub fn add_text_body(&mut self, body: &str) {
        self.push(Ok(ResponseBody::Text(body.to_string())));
    }

    pub fn add_transport_failure(&mut self) {
        self.push(Err(RequestError::Transport {
            url: "http://mock.invalid/v1/chat/completions".to_string(),
            message: "connection refused".to_string(),
            hint: TRANSPORT_HINT,
        }));
    }

    pub fn add_http_failure(&mut self, status: u16, body: &str) {
        self.push(Err(RequestError::Http {
            url: "http://mock.invalid/v1/chat/completions".to_string(),
            status,
            status_text: String::new(),
            hint: crate::http::hint_for_status(status),
            body_excerpt: body.to_string(),
        }));
    }

    pub fn get_call_history(&self) -> Vec<(Vec<Message>, Value)> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    fn pop_response(&self) -> Result<ResponseBody, RequestError> {
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ResponseBody::Json(json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "No more mock responses configured" }
                }]
            })))
        })
    }
}

#[async_trait]
impl LlmClientTrait for MockLlmClient {
    async fn chat_once(
        &self,
        messages: &[Message],
        tools: &Value,
    ) -> Result<ResponseBody, RequestError> {
        // Store the call for verification
        self.call_history
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.clone()));
        self.pop_response()
    }
}
