use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Message, Role, ToolCall};

/// Violations of the transcript ordering rules. These are rejected at the
/// append boundary so the transcript sent to the model is always well formed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool result '{0}' does not answer a pending tool call")]
    UncorrelatedToolResult(String),

    #[error("tool call '{0}' was already answered")]
    DuplicateToolResult(String),

    #[error("{role} message appended while {pending} tool call(s) are unanswered")]
    UnansweredToolCalls { role: Role, pending: usize },

    #[error("assistant message repeats tool call id '{0}'")]
    DuplicateToolCallId(String),

    #[error("assistant message carries a tool call with an empty id")]
    EmptyToolCallId,
}

/// The conversation transcript: an ordered, append-only message log owned by
/// the caller and lent to the agent for the duration of a turn.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Session {
    pub id: String,
    messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: Option<String>,
    pub model: Option<String>,
}

impl Session {
    pub fn new(title: Option<&str>, model: Option<&str>) -> Session {
        Session {
            id: Uuid::new_v4().to_string(),
            messages: Vec::<Message>::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            title: title.map(|s| s.to_string()),
            model: model.map(|s| s.to_string()),
        }
    }

    pub fn with_system_prompt(prompt: &str, model: Option<&str>) -> Session {
        let mut session = Session::new(None, model);
        session.messages.push(Message::system(prompt));
        session
    }

    /// A fresh session seeded with this session's system prompt, if any.
    /// The current transcript is left untouched.
    pub fn restart(&self) -> Session {
        let mut session = Session::new(self.title.as_deref(), self.model.as_deref());
        if let Some(system @ Message::System { .. }) = self.messages.first() {
            session.messages.push(system.clone());
        }
        session
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    // Append one message
    pub fn add_message(&mut self, msg: Message) -> Result<(), TranscriptError> {
        let pending = self.pending_tool_calls();

        match &msg {
            Message::Tool { tool_call_id, .. } => {
                if !pending.iter().any(|tc| &tc.id == tool_call_id) {
                    return Err(if self.answered_in_open_batch(tool_call_id) {
                        TranscriptError::DuplicateToolResult(tool_call_id.clone())
                    } else {
                        TranscriptError::UncorrelatedToolResult(tool_call_id.clone())
                    });
                }
            }
            other => {
                if !pending.is_empty() {
                    return Err(TranscriptError::UnansweredToolCalls {
                        role: other.role(),
                        pending: pending.len(),
                    });
                }
                let mut seen = HashSet::new();
                for tc in other.tool_calls() {
                    if tc.id.is_empty() {
                        return Err(TranscriptError::EmptyToolCallId);
                    }
                    if !seen.insert(tc.id.as_str()) {
                        return Err(TranscriptError::DuplicateToolCallId(tc.id.clone()));
                    }
                }
            }
        }

        self.messages.push(msg);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_user(&mut self, text: &str) -> Result<(), TranscriptError> {
        self.add_message(Message::user(text))
    }

    /// Tool calls of the most recent assistant message that have no tool
    /// result yet. Only the trailing assistant/tool block is considered.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCall> {
        let (Some(assistant), answered) = self.open_batch() else {
            return Vec::new();
        };
        assistant
            .tool_calls()
            .iter()
            .filter(|tc| !answered.contains(tc.id.as_str()))
            .collect()
    }

    fn answered_in_open_batch(&self, id: &str) -> bool {
        self.open_batch().1.contains(id)
    }

    // Walks back over trailing tool results to the assistant message that
    // requested them.
    fn open_batch(&self) -> (Option<&Message>, HashSet<&str>) {
        let mut answered = HashSet::new();
        for msg in self.messages.iter().rev() {
            match msg {
                Message::Tool { tool_call_id, .. } => {
                    answered.insert(tool_call_id.as_str());
                }
                Message::Assistant { .. } => return (Some(msg), answered),
                _ => break,
            }
        }
        (None, answered)
    }

    pub fn set_title(&mut self, title: Option<&str>) {
        self.title = title.map(|s| s.to_string());
        self.updated_at = Utc::now();
    }

    pub fn set_model(&mut self, model: Option<&str>) {
        self.model = model.map(|s| s.to_string());
        self.updated_at = Utc::now();
    }
}
