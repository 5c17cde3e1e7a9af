//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AnswerRequest, CancelResponse, ChatRequest, ConsentRequest, ErrorResponse, RegenerateRequest,
    StartRequest, SuccessResponse,
};
use super::AppState;
use crate::conversation::ConversationState;
use crate::error::ForgeError;
use crate::generation::GeneratedAppRecord;
use crate::runtime::{BuildResult, ConversationView};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversation lifecycle
        .route("/api/conversations", post(start_conversation))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/answer", post(answer_question))
        .route("/api/conversations/:id/chat", post(send_chat))
        .route("/api/conversations/:id/finalize", post(finalize))
        .route("/api/conversations/:id/undo", post(undo))
        .route(
            "/api/conversations/:id/proposals/:proposal_id/select",
            post(select_proposal),
        )
        .route("/api/conversations/:id/cancel", post(cancel_conversation))
        // Status stream
        .route("/api/conversations/:id/events", get(stream_events))
        // Generated apps
        .route("/api/apps/:id", get(get_app))
        .route("/api/apps/:id/regenerate", post(regenerate))
        // Agent consent
        .route("/api/consent/:request_id", post(resolve_consent))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversation Actions
// ============================================================

async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let orchestrator = &state.orchestrator;
    let result = match req.channel_id.as_deref() {
        Some(channel) => {
            orchestrator
                .start_on_channel(channel, &req.initial_message)
                .await
        }
        None => orchestrator.start(&req.initial_message).await,
    };
    let view = result.map_err(|e| state.fail(e))?;
    Ok(Json(view))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationState>, AppError> {
    let conversation = state
        .orchestrator
        .get_conversation(&id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(conversation))
}

async fn answer_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .orchestrator
        .answer(&id, &req.question_id, req.answer)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(view))
}

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .orchestrator
        .chat(&id, &req.message)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(view))
}

async fn finalize(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BuildResult>, AppError> {
    let built = state
        .orchestrator
        .finalize(&id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(built))
}

async fn undo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .orchestrator
        .undo(&id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(view))
}

async fn select_proposal(
    State(state): State<AppState>,
    Path((id, proposal_id)): Path<(String, String)>,
) -> Result<Json<ConversationView>, AppError> {
    let view = state
        .orchestrator
        .select_proposal(&id, &proposal_id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(view))
}

async fn cancel_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.orchestrator.cancel(&id),
    })
}

// ============================================================
// Status Stream
// ============================================================

async fn stream_events(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    // Builds may publish before the conversation is visible, so unknown ids
    // still get a channel
    let subscription = state.orchestrator.bus().subscribe(&id);
    sse_stream(subscription, state.keep_alive)
}

// ============================================================
// Apps
// ============================================================

async fn get_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GeneratedAppRecord>, AppError> {
    let app = state
        .orchestrator
        .get_app(&id)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(app))
}

async fn regenerate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<BuildResult>, AppError> {
    let built = state
        .orchestrator
        .regenerate(&id, &req.issue_description)
        .await
        .map_err(|e| state.fail(e))?;
    Ok(Json(built))
}

async fn resolve_consent(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(req): Json<ConsentRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .orchestrator
        .resolve_consent(&request_id, req.allow)
        .map_err(|e| state.fail(e))?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error Handling
// ============================================================

struct AppError {
    error: ForgeError,
    production: bool,
}

impl AppState {
    fn fail(&self, error: ForgeError) -> AppError {
        AppError {
            error,
            production: self.environment.is_production(),
        }
    }
}

fn status_for(error: &ForgeError) -> StatusCode {
    match error {
        ForgeError::NotFound { .. } => StatusCode::NOT_FOUND,
        ForgeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ForgeError::ModelFailure(_) => StatusCode::BAD_GATEWAY,
        // Client closed request
        ForgeError::Aborted => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        ForgeError::Storage(_) | ForgeError::ToolExecutionFailure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if status.is_server_error() {
            tracing::error!(error = %self.error, code = self.error.code(), "Request failed");
        }
        let body = Json(ErrorResponse::from_error(&self.error, self.production));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::runtime::testing::orchestrator;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(environment: Environment) -> Router {
        create_router(AppState::new(Arc::new(orchestrator(None)), environment))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_start_then_get() {
        let router = app(Environment::Development);
        let (status, started) = call(
            &router,
            "POST",
            "/api/conversations",
            Some(json!({"initialMessage": "track my coffee shop orders"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = started["conversationId"].as_str().unwrap();
        assert!(!started["messages"].as_array().unwrap().is_empty());
        assert_eq!(started["state"]["phase"], "clarification");

        let (status, fetched) = call(&router, "GET", &format!("/api/conversations/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], id);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_404_with_code() {
        let router = app(Environment::Development);
        let (status, body) = call(&router, "GET", "/api/conversations/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
        assert!(body["suggestion"].is_string());
        assert!(body.get("details").is_some());
    }

    #[tokio::test]
    async fn test_validation_is_422_without_details_in_production() {
        let router = app(Environment::Production);
        let (status, body) = call(
            &router,
            "POST",
            "/api/conversations",
            Some(json!({"initialMessage": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "validation");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_finalize_before_answers_is_rejected() {
        let router = app(Environment::Development);
        let (_, started) = call(
            &router,
            "POST",
            "/api/conversations",
            Some(json!({"initialMessage": "track orders"})),
        )
        .await;
        let id = started["conversationId"].as_str().unwrap();
        let (status, body) = call(&router, "POST", &format!("/api/conversations/{id}/finalize"), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_cancel_and_consent_for_unknown_ids() {
        let router = app(Environment::Development);
        let (status, body) = call(&router, "POST", "/api/conversations/nope/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], false);

        let (status, body) = call(&router, "POST", "/api/consent/nope", Some(json!({"allow": true}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_events_stream_opens_with_connected_ack() {
        let orch = Arc::new(orchestrator(None));
        let id = orch.start("track orders").await.unwrap().conversation_id;
        let router = create_router(AppState::new(Arc::clone(&orch), Environment::Development));

        let request = Request::builder()
            .uri(format!("/api/conversations/{id}/events"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let first = String::from_utf8_lossy(&first);
        assert!(first.contains("event: connected"), "{first}");
        assert!(first.contains("\"bufferedCount\":"), "{first}");

        let second = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&second).contains("event: status"));
        assert!(orch.bus().is_connected(&id));
    }

    #[tokio::test]
    async fn test_start_hands_over_temporary_channel() {
        let orch = Arc::new(orchestrator(None));
        let router = create_router(AppState::new(Arc::clone(&orch), Environment::Development));
        let (status, started) = call(
            &router,
            "POST",
            "/api/conversations",
            Some(json!({"initialMessage": "track orders", "channelId": "tmp-api"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = started["conversationId"].as_str().unwrap();
        assert_eq!(orch.bus().buffered_len("tmp-api"), 0);
        assert!(orch.bus().buffered_len(id) >= 2);
    }

    #[test]
    fn test_aborted_maps_to_client_closed() {
        assert_eq!(status_for(&ForgeError::Aborted).as_u16(), 499);
    }

    #[tokio::test]
    async fn test_version() {
        let router = app(Environment::Development);
        let request = Request::builder().uri("/version").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
