//! Error taxonomy for the orchestration core
//!
//! Model failures are normally recovered by the fallback generator and
//! directive failures by the agent executor, so only the remaining kinds
//! usually reach a caller.

use crate::conversation::TransitionError;
use crate::llm::LlmError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Model failure: {0}")]
    ModelFailure(#[from] LlmError),
    #[error("Directive {tool} failed: {message}")]
    ToolExecutionFailure { tool: String, message: String },
    #[error("Operation cancelled")]
    Aborted,
}

impl ForgeError {
    pub fn conversation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Conversation",
            id: id.into(),
        }
    }

    pub fn app_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "App",
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::ModelFailure(_) => "model_failure",
            Self::ToolExecutionFailure { .. } => "tool_execution_failure",
            Self::Aborted => "aborted",
        }
    }

    /// Optional hint on how the user can recover
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => Some("Check the id or start a new conversation"),
            Self::Validation(_) => {
                Some("Answer the remaining questions or adjust the design, then try again")
            }
            Self::Storage(_) => Some("Retry in a moment; your last saved state is intact"),
            Self::ModelFailure(_) => Some("Retry, or continue without the model"),
            Self::ToolExecutionFailure { .. } => None,
            Self::Aborted => Some("Start the action again when you are ready"),
        }
    }
}

impl From<TransitionError> for ForgeError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::UnknownProposal(id) => Self::NotFound {
                kind: "Proposal",
                id,
            },
            other => Self::Validation(other.to_string()),
        }
    }
}

pub type ForgeResult<T> = Result<T, ForgeError>;
