//! Model completion collaborator
//!
//! The core only sees `LlmService`; without an API key the runtime runs
//! model-free and every generation goes through the fallback generator.

mod anthropic;
mod error;
mod json;
mod types;

pub use anthropic::AnthropicService;
pub use error::{LlmError, LlmErrorKind};
pub use json::{complete_json, parse_lenient, strip_fences};
pub use types::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Ordered text fragments of one streamed completion
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Start a streamed completion
    async fn stream_complete(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    end_turn = response.end_turn,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream_complete(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let start = std::time::Instant::now();
        match self.inner.stream_complete(request).await {
            Ok(stream) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    "LLM stream opened"
                );
                let model = self.model_id.clone();
                Ok(stream
                    .inspect(move |item| {
                        if let Err(e) = item {
                            tracing::error!(model = %model, error = %e.message, "LLM stream failed");
                        }
                    })
                    .boxed())
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "LLM stream request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Configuration for the model collaborator
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    /// Gateway URL; when set the gateway handles authentication
    pub gateway: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            model: std::env::var("FORGE_MODEL").ok(),
        }
    }
}

/// Build the configured service, or `None` for model-free mode
pub fn connect(config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
    let api_key = if config.gateway.is_some() {
        "implicit".to_string()
    } else {
        config
            .anthropic_api_key
            .clone()
            .filter(|k| !k.is_empty())?
    };
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    match AnthropicService::new(api_key, model, config.gateway.as_deref()) {
        Ok(service) => Some(Arc::new(LoggingService::new(Arc::new(service)))),
        Err(e) => {
            tracing::warn!(error = %e, "Could not create model client, running model-free");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_key_without_gateway() {
        assert!(connect(&LlmConfig::default()).is_none());
        let empty = LlmConfig {
            anthropic_api_key: Some(String::new()),
            ..LlmConfig::default()
        };
        assert!(connect(&empty).is_none());
    }

    #[test]
    fn test_connect_with_gateway_uses_default_model() {
        let config = LlmConfig {
            gateway: Some("http://localhost:9/".to_string()),
            ..LlmConfig::default()
        };
        let service = connect(&config).unwrap();
        assert_eq!(service.model_id(), DEFAULT_MODEL);
    }
}
