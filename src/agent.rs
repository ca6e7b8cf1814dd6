use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticEntry, DiagnosticKind};
use crate::error::AgentError;
use crate::http::{RequestError, ResponseBody};
use crate::llm_client::LlmClient;
use crate::session::Session;
use crate::tool_registry::{ToolRegistry, ToolResult, parse_arguments};
use crate::types::{Message, ToolCall};
use crate::utils::clip;

static NO_TOOLS: Value = Value::Null;

/// Receives what the user should see while a turn runs. All methods default
/// to doing nothing.
pub trait AgentEventHandler: Send {
    fn on_assistant_text(&mut self, _text: &str) {}
    fn on_tool_call(&mut self, _name: &str, _args: &Value) {}
    fn on_tool_result(&mut self, _name: &str, _result: &ToolResult) {}
}

/// Handler that discards every event.
pub struct SilentHandler;

impl AgentEventHandler for SilentHandler {}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClientTrait: Send + Sync {
    /// `tools` is the schema array, or `Value::Null` when tools are off.
    async fn chat_once(&self, messages: &[Message], tools: &Value)
    -> Result<ResponseBody, RequestError>;
}

// Implement trait for real LlmClient
#[async_trait]
impl LlmClientTrait for LlmClient {
    async fn chat_once(
        &self,
        messages: &[Message],
        tools: &Value,
    ) -> Result<ResponseBody, RequestError> {
        LlmClient::chat_once(self, messages, tools).await
    }
}

#[derive(Clone, Debug)]
pub struct AgentOptions {
    /// Maximum model calls per turn (at least 1).
    pub max_loops: usize,
    /// Provider accepts tool declarations. When false, tool calls in
    /// replies are ignored.
    pub tools_enabled: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_loops: crate::config::DEFAULT_MAX_LOOPS,
            tools_enabled: true,
        }
    }
}

/// What a normally finished turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Text of the final assistant message, if it had any.
    pub reply: Option<String>,
    pub model_calls: usize,
    pub tool_calls: usize,
}

/// The assistant part of a completion, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

struct LoopState {
    iteration: usize,
    max_iterations: usize,
}

impl LoopState {
    fn new(max_iterations: usize) -> Self {
        Self {
            iteration: 0,
            max_iterations: max_iterations.max(1),
        }
    }

    fn exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

pub struct Agent {
    llm: Box<dyn LlmClientTrait>,
    tools: ToolRegistry,
    opts: AgentOptions,
}

impl Agent {
    pub fn new(llm: Box<dyn LlmClientTrait>, tools: ToolRegistry, opts: AgentOptions) -> Self {
        Self { llm, tools, opts }
    }

    pub fn max_loops(&self) -> usize {
        self.opts.max_loops
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Append the user's text and run a turn.
    pub async fn send(
        &self,
        session: &mut Session,
        text: &str,
        handler: &mut dyn AgentEventHandler,
    ) -> Result<TurnOutcome, AgentError> {
        session.push_user(text)?;
        self.run_turn(session, handler).await
    }

    /// Drive model calls and tool dispatch until the model stops asking for
    /// tools or the loop budget runs out. The transcript is only appended to.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        handler: &mut dyn AgentEventHandler,
    ) -> Result<TurnOutcome, AgentError> {
        let mut state = LoopState::new(self.opts.max_loops);
        let mut tool_calls_made = 0;

        loop {
            if state.exhausted() {
                let err = AgentError::BudgetExceeded {
                    limit: state.max_iterations,
                };
                self.record_failure(DiagnosticKind::LoopLimit, &err, state.iteration);
                info!(model_calls = state.iteration, "turn stopped at loop limit");
                return Err(err);
            }
            state.iteration += 1;
            debug!(iteration = state.iteration, messages = session.len(), "calling model");

            let tools = if self.opts.tools_enabled {
                self.tools.schemas()
            } else {
                &NO_TOOLS
            };
            // Transport and HTTP failures were already recorded by the wrapper.
            let body = self.llm.chat_once(session.messages(), tools).await?;

            let reply = match interpret_completion(body, self.opts.tools_enabled, state.iteration) {
                Ok(reply) => reply,
                Err(err) => {
                    let kind = match &err {
                        AgentError::Application(_) => DiagnosticKind::ApiError,
                        _ => DiagnosticKind::ProtocolError,
                    };
                    self.record_failure(kind, &err, state.iteration);
                    return Err(err);
                }
            };

            if let Some(text) = reply.content.as_deref().filter(|t| !t.trim().is_empty()) {
                handler.on_assistant_text(text);
            }

            // Record assistant step before any of its tool results
            let calls = reply.tool_calls.clone();
            session.add_message(Message::assistant(reply.content.clone(), reply.tool_calls))?;

            if calls.is_empty() {
                info!(model_calls = state.iteration, tool_calls = tool_calls_made, "turn finished");
                return Ok(TurnOutcome {
                    reply: reply.content,
                    model_calls: state.iteration,
                    tool_calls: tool_calls_made,
                });
            }

            let results = self.dispatch_all(&calls, handler).await;
            for (call, result) in calls.iter().zip(results) {
                session.add_message(Message::tool(call.id.clone(), result.to_content()))?;
            }
            tool_calls_made += calls.len();
        }
    }

    /// Dispatch every call concurrently and wait for all of them. Results come
    /// back in request order so transcript appends stay deterministic.
    async fn dispatch_all(
        &self,
        calls: &[ToolCall],
        handler: &mut dyn AgentEventHandler,
    ) -> Vec<ToolResult> {
        for call in calls {
            handler.on_tool_call(&call.function.name, &parse_arguments(&call.function.arguments));
        }

        let jobs = calls
            .iter()
            .map(|call| self.tools.dispatch(&call.function.name, &call.function.arguments));
        let results = join_all(jobs).await;

        for (call, result) in calls.iter().zip(&results) {
            handler.on_tool_result(&call.function.name, result);
        }
        results
    }

    fn record_failure(&self, kind: DiagnosticKind, err: &AgentError, iteration: usize) {
        warn!(iteration, error = %err, "turn ended early");
        self.tools.diagnostics().record(
            DiagnosticEntry::new(kind, json!({ "kind": "chat", "iteration": iteration }))
                .with_error(err.to_string()),
        );
    }
}

/// Interpret a completion body, in order: explicit error object, missing
/// choice, then the assistant message itself. With tools disabled any
/// `tool_calls` field is dropped.
pub fn interpret_completion(
    body: ResponseBody,
    tools_enabled: bool,
    iteration: usize,
) -> Result<AssistantReply, AgentError> {
    let value = match body {
        ResponseBody::Json(value) => value,
        ResponseBody::Text(text) => {
            return Err(AgentError::Protocol(format!(
                "Model endpoint returned a non-JSON body: {}",
                clip(&text, 200)
            )));
        }
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AgentError::Application(message));
    }

    let message = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .filter(|m| m.is_object())
        .ok_or_else(|| AgentError::Protocol("No choices in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);
    let tool_calls = if tools_enabled {
        parse_tool_calls(message.get("tool_calls"), iteration)
    } else {
        Vec::new()
    };

    Ok(AssistantReply {
        content,
        tool_calls,
    })
}

/// Lenient tool-call extraction. Missing or repeated ids are replaced so
/// every result can be correlated; object-valued arguments are re-serialized.
fn parse_tool_calls(raw: Option<&Value>, iteration: usize) -> Vec<ToolCall> {
    let Some(entries) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut calls = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let function = &entry["function"];
        let name = function["name"].as_str().unwrap_or("").to_string();
        let arguments = match &function["arguments"] {
            Value::String(s) => s.clone(),
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        };
        let mut id = entry["id"].as_str().unwrap_or("").to_string();
        if id.is_empty() || seen.contains(&id) {
            id = format!("call_{}_{}", iteration, index);
            let mut suffix = 1;
            // the model may already have used the generated form
            while seen.contains(&id) {
                id = format!("call_{}_{}_{}", iteration, index, suffix);
                suffix += 1;
            }
        }
        seen.insert(id.clone());
        calls.push(ToolCall::new(id, name, arguments));
    }
    calls
}
