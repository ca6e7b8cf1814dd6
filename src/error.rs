use thiserror::Error;

use crate::http::RequestError;
use crate::session::TranscriptError;

/// Reasons a turn stops early. Every variant ends the current turn only;
/// the transcript stays valid for the next user message. Tool failures are
/// not here: they are folded into the transcript as tool results.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No response was obtained from the model endpoint.
    #[error("{0}")]
    Transport(RequestError),

    #[error("{0}")]
    Http(RequestError),

    /// The endpoint answered with an explicit `error` object.
    #[error("API error: {0}")]
    Application(String),

    /// The response had no usable choice.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stopped: reached max tool loops ({limit})")]
    BudgetExceeded { limit: usize },

    #[error("Transcript rejected message: {0}")]
    Transcript(#[from] TranscriptError),
}

impl From<RequestError> for AgentError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Transport { .. } => AgentError::Transport(err),
            RequestError::Http { .. } => AgentError::Http(err),
        }
    }
}

impl AgentError {
    /// The safety valve is a notice, not a failure of the endpoint or the model.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, AgentError::BudgetExceeded { .. })
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            AgentError::Transport(e) | AgentError::Http(e) => Some(e.hint()),
            _ => None,
        }
    }
}
