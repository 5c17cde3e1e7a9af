//! Mock collaborators for testing
//!
//! These mocks enable orchestration tests without real I/O.

use super::Orchestrator;
use crate::config::{AgentConfig, BusConfig};
use crate::conversation::{Answer, ConversationState, QuestionType};
use crate::event_bus::EventBus;
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, TextStream};
use crate::store::{RecordKind, RecordStore, StoreError, StoreResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::de::Error as _;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ScriptedStream = Result<Vec<Result<String, LlmError>>, LlmError>;

// ============================================================================
// Mock LLM
// ============================================================================

/// Model double that replays queued results in order
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful `complete` result
    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::from_text(text)));
    }

    /// Queue a failing `complete` result
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Queue the fragments of one streamed completion
    pub fn queue_stream(&self, items: Vec<Result<String, LlmError>>) {
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a stream that fails to open
    pub fn queue_stream_error(&self, error: LlmError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    /// Every request seen so far, `complete` and `stream_complete` alike
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    async fn stream_complete(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock stream queued")))?;
        Ok(stream::iter(scripted).boxed())
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(RecordKind, String), Value>>,
    failing: Mutex<Option<RecordKind>>,
}

impl MemoryStore {
    /// Make every later write of `kind` fail
    pub fn fail_writes(&self, kind: RecordKind) {
        *self.failing.lock().unwrap() = Some(kind);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .cloned())
    }

    async fn put(&self, kind: RecordKind, id: &str, record: &Value) -> StoreResult<()> {
        if *self.failing.lock().unwrap() == Some(kind) {
            return Err(StoreError::Serialization(serde_json::Error::custom("disk full")));
        }
        self.records
            .lock()
            .unwrap()
            .insert((kind, id.to_string()), record.clone());
        Ok(())
    }
}

// ============================================================================
// Orchestrator fixtures
// ============================================================================

/// Orchestrator over a fresh in-memory store and bus
pub fn orchestrator(llm: Option<Arc<MockLlm>>) -> Orchestrator {
    orchestrator_with(llm, AgentConfig::default())
}

pub fn orchestrator_with(llm: Option<Arc<MockLlm>>, agent: AgentConfig) -> Orchestrator {
    orchestrator_on(
        Arc::new(MemoryStore::default()),
        llm,
        agent,
        Duration::from_millis(20),
    )
}

/// Orchestrator over a store the test keeps a handle to. Builds wait up to
/// `connect_wait` for a listener, which keeps them in flight that long.
pub fn orchestrator_on(
    store: Arc<MemoryStore>,
    llm: Option<Arc<MockLlm>>,
    agent: AgentConfig,
    connect_wait: Duration,
) -> Orchestrator {
    let llm = llm.map(|m| m as Arc<dyn LlmService>);
    Orchestrator::new(
        store,
        Arc::new(EventBus::new(BusConfig::default())),
        llm,
        agent,
        connect_wait,
    )
}

/// Answer every open question with its first option
pub async fn answer_all(orch: &Orchestrator, conversation_id: &str) -> ConversationState {
    let mut state = orch.get_conversation(conversation_id).await.unwrap();
    let open: Vec<_> = state.unanswered().cloned().collect();
    for question in open {
        let first = question.options[0].clone();
        let answer = match question.question_type {
            QuestionType::Single => Answer::Single(first),
            QuestionType::Multiple => Answer::Multiple(vec![first]),
        };
        state = orch
            .answer(conversation_id, &question.id, answer)
            .await
            .unwrap()
            .state;
    }
    state
}
