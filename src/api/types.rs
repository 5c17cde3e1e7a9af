//! API request and response types

use crate::conversation::Answer;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to start a conversation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub initial_message: String,
    /// Temporary event channel the client subscribed to before it had an id
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Request to answer a clarification question
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question_id: String,
    pub answer: Answer,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Request to regenerate an app
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub issue_description: String,
}

/// Decision on a pending consent request
#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub allow: bool,
}

/// Response for cancel action
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    /// Technical details are only included outside production
    pub fn from_error(err: &ForgeError, production: bool) -> Self {
        let details = (!production).then(|| {
            serde_json::json!({
                "error": format!("{err:?}"),
            })
        });
        Self {
            code: err.code(),
            message: err.to_string(),
            suggestion: err.suggestion(),
            details,
        }
    }
}
