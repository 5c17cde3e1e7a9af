//! Orchestrator for the client-facing actions
//!
//! Each action loads the conversation, applies pure transitions, persists
//! the result and reports progress through the bus. Actions on one
//! conversation are serialized by a per-conversation lock; different
//! conversations never contend.

mod build;
mod chat;
mod design;

#[cfg(test)]
pub mod testing;

pub use build::{BuildResult, BUILD_PHASE};
pub use chat::StoreApplier;

use crate::agent::{AgentExecutor, AgentTurn, ConsentBroker, ToolRegistry};
use crate::config::AgentConfig;
use crate::conversation::{
    self, Answer, ConversationState, Event, Message, Notice, Phase, TransitionError,
    TransitionResult,
};
use crate::error::{ForgeError, ForgeResult};
use crate::event_bus::{EventBus, StatusEvent};
use crate::generation::{GeneratedAppRecord, GenerationPipeline};
use crate::llm::LlmService;
use crate::store::{self, RecordStore};
use serde::Serialize;
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

/// Phase label for conversation-level events
pub const CONVERSATION_PHASE: &str = "conversation";

/// A notice with its user-facing text
#[derive(Debug, Clone, Serialize)]
pub struct NoticeView {
    #[serde(flatten)]
    pub notice: Notice,
    pub message: String,
}

impl From<Notice> for NoticeView {
    fn from(notice: Notice) -> Self {
        let message = notice.message();
        Self { notice, message }
    }
}

/// Response of the conversation actions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub state: ConversationState,
    pub notices: Vec<NoticeView>,
    /// The answer was recorded against an id that is not a current question
    pub unknown_question: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentTurn>,
}

impl ConversationView {
    fn new(result: TransitionResult) -> Self {
        let unknown_question = result.unknown_question();
        let TransitionResult {
            new_state: state,
            notices,
        } = result;
        Self {
            conversation_id: state.id.clone(),
            messages: state.messages.clone(),
            state,
            notices: notices.into_iter().map(NoticeView::from).collect(),
            unknown_question,
            agent: None,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    bus: Arc<EventBus>,
    llm: Option<Arc<dyn LlmService>>,
    pipeline: GenerationPipeline,
    agent: AgentExecutor,
    consent: Arc<ConsentBroker>,
    /// Bounded wait for a listener before a build starts emitting
    connect_wait: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        bus: Arc<EventBus>,
        llm: Option<Arc<dyn LlmService>>,
        agent: AgentConfig,
        connect_wait: Duration,
    ) -> Self {
        let consent = Arc::new(ConsentBroker::new(Arc::clone(&bus)));
        let mut executor =
            AgentExecutor::new(ToolRegistry::standard(), agent.mode, Arc::clone(&bus))
                .with_applier(Arc::new(StoreApplier::new(Arc::clone(&store))));
        if agent.require_consent {
            executor = executor.with_consent(Arc::clone(&consent));
        }

        Self {
            pipeline: GenerationPipeline::new(llm.clone(), Arc::clone(&bus)),
            store,
            bus,
            llm,
            agent: executor,
            consent,
            connect_wait,
            locks: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    pub async fn start(&self, initial_message: &str) -> ForgeResult<ConversationView> {
        self.start_from(initial_message, None).await
    }

    /// Start a conversation for a client already listening on a temporary
    /// channel. The new id and any failure are announced there, and events
    /// the client has not read yet move to the conversation's own channel.
    pub async fn start_on_channel(
        &self,
        channel: &str,
        initial_message: &str,
    ) -> ForgeResult<ConversationView> {
        self.start_from(initial_message, Some(channel)).await
    }

    async fn start_from(
        &self,
        initial_message: &str,
        channel: Option<&str>,
    ) -> ForgeResult<ConversationView> {
        let id = uuid::Uuid::new_v4().to_string();
        let result = self.run_start(&id, initial_message.trim()).await;
        let Some(temporary) = channel else {
            return self.report(&id, CONVERSATION_PHASE, result);
        };
        if let Ok(view) = &result {
            self.bus.publish(
                temporary,
                StatusEvent::info(
                    CONVERSATION_PHASE,
                    "Conversation created",
                    view.state.readiness.overall(),
                )
                .with_details(json!({ "conversationId": id })),
            );
            let moved = self.bus.forward(temporary, &id);
            tracing::debug!(conv_id = %id, channel = %temporary, moved, "Temporary channel handed over");
        }
        self.report(temporary, CONVERSATION_PHASE, result)
    }

    async fn run_start(&self, id: &str, message: &str) -> ForgeResult<ConversationView> {
        if message.is_empty() {
            return Err(ForgeError::validation("Describe the app you want to build"));
        }
        let _guard = self.lock(id).await;
        let result = conversation::transition(
            &ConversationState::new(id),
            Event::Start {
                message: message.to_string(),
            },
        )?;
        tracing::info!(conv_id = %id, "Conversation started");
        self.commit(result).await
    }

    pub async fn answer(
        &self,
        conversation_id: &str,
        question_id: &str,
        answer: Answer,
    ) -> ForgeResult<ConversationView> {
        let result = self.run_answer(conversation_id, question_id, answer).await;
        self.report(conversation_id, CONVERSATION_PHASE, result)
    }

    async fn run_answer(
        &self,
        conversation_id: &str,
        question_id: &str,
        answer: Answer,
    ) -> ForgeResult<ConversationView> {
        let _guard = self.lock(conversation_id).await;
        let state = self.load(conversation_id).await?;
        self.ensure_idle(conversation_id)?;
        let mut result = checkpointed(&state, &format!("answer {question_id}"), |s| {
            conversation::transition(
                s,
                Event::Answer {
                    question_id: question_id.to_string(),
                    answer,
                },
            )
        })?;
        if state.phase != Phase::Design && result.new_state.phase == Phase::Design {
            self.propose_designs(&mut result.new_state).await;
        }
        self.commit(result).await
    }

    /// Step back to the newest checkpoint. Agent edits are reverted on the
    /// app record too.
    pub async fn undo(&self, conversation_id: &str) -> ForgeResult<ConversationView> {
        let result = self.run_undo(conversation_id).await;
        self.report(conversation_id, CONVERSATION_PHASE, result)
    }

    async fn run_undo(&self, conversation_id: &str) -> ForgeResult<ConversationView> {
        let _guard = self.lock(conversation_id).await;
        let state = self.load(conversation_id).await?;
        self.ensure_idle(conversation_id)?;
        let app_revision = state.checkpoints.last().and_then(|c| c.app_revision);
        let result = conversation::transition(&state, Event::Undo)?;
        if let (Some(revision), Some(app_id)) = (app_revision, &state.app_id) {
            self.restore_app(app_id, revision).await?;
        }
        self.commit(result).await
    }

    pub async fn select_proposal(
        &self,
        conversation_id: &str,
        proposal_id: &str,
    ) -> ForgeResult<ConversationView> {
        let result = self.run_select_proposal(conversation_id, proposal_id).await;
        self.report(conversation_id, CONVERSATION_PHASE, result)
    }

    async fn run_select_proposal(
        &self,
        conversation_id: &str,
        proposal_id: &str,
    ) -> ForgeResult<ConversationView> {
        let _guard = self.lock(conversation_id).await;
        let state = self.load(conversation_id).await?;
        self.ensure_idle(conversation_id)?;
        let result = checkpointed(&state, "select proposal", |s| {
            conversation::transition(
                s,
                Event::SelectProposal {
                    proposal_id: proposal_id.to_string(),
                },
            )
        })?;
        self.commit(result).await
    }

    /// Cancel whatever is running for the conversation.
    ///
    /// Returns whether there was anything to cancel.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned();
        let denied = self.consent.cancel_conversation(conversation_id);
        if let Some(token) = &token {
            token.cancel();
            tracing::info!(conv_id = %conversation_id, denied, "Cancellation requested");
        }
        token.is_some() || denied > 0
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> ForgeResult<ConversationState> {
        self.load(conversation_id).await
    }

    pub async fn get_app(&self, app_id: &str) -> ForgeResult<GeneratedAppRecord> {
        store::load_app(self.store.as_ref(), app_id).await
    }

    pub fn resolve_consent(&self, request_id: &str, allow: bool) -> ForgeResult<()> {
        if self.consent.resolve(request_id, allow) {
            Ok(())
        } else {
            Err(ForgeError::NotFound {
                kind: "Consent request",
                id: request_id.to_string(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn lock(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(conversation_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Register the cancellable work of a conversation; one at a time
    fn track(&self, conversation_id: &str) -> ForgeResult<CancellationToken> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(busy()),
            Entry::Vacant(slot) => Ok(slot.insert(CancellationToken::new()).clone()),
        }
    }

    fn untrack(&self, conversation_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
    }

    fn is_running(&self, conversation_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(conversation_id)
    }

    fn ensure_idle(&self, conversation_id: &str) -> ForgeResult<()> {
        if self.is_running(conversation_id) {
            return Err(busy());
        }
        Ok(())
    }

    async fn restore_app(&self, app_id: &str, revision: u32) -> ForgeResult<()> {
        let mut record = store::load_app(self.store.as_ref(), app_id).await?;
        if !record.restore_revision(revision) {
            tracing::warn!(app_id = %app_id, revision, "App revision no longer kept, files left as they are");
            return Ok(());
        }
        store::save_app(self.store.as_ref(), &record).await?;
        tracing::info!(app_id = %app_id, revision, "App edits undone");
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> ForgeResult<ConversationState> {
        store::load_conversation(self.store.as_ref(), conversation_id).await
    }

    /// Persist a transition and announce its notices
    async fn commit(&self, result: TransitionResult) -> ForgeResult<ConversationView> {
        let TransitionResult { new_state, notices } = result;
        store::save_conversation(self.store.as_ref(), &new_state).await?;
        for notice in &notices {
            self.bus.publish(
                &new_state.id,
                StatusEvent::info(
                    CONVERSATION_PHASE,
                    notice.message(),
                    new_state.readiness.overall(),
                )
                .with_details(json!({ "kind": "notice", "notice": notice })),
            );
        }
        Ok(ConversationView::new(TransitionResult { new_state, notices }))
    }

    /// Publish a terminal event carrying the same message the caller gets.
    ///
    /// Failures are errors; a cancelled action is only a warning.
    fn report<T>(&self, channel: &str, phase: &str, result: ForgeResult<T>) -> ForgeResult<T> {
        let Err(e) = &result else {
            return result;
        };
        tracing::warn!(conv_id = %channel, error = %e, "Action failed");
        let event = match e {
            // Unknown ids have no listener to tell
            ForgeError::NotFound { .. } => return result,
            ForgeError::Aborted => StatusEvent::warning(phase, e.to_string(), 100),
            _ => StatusEvent::error(phase, e.to_string()),
        };
        self.bus.publish(
            channel,
            event.with_details(json!({
                "code": e.code(),
                "suggestion": e.suggestion(),
            })),
        );
        result
    }
}

fn busy() -> ForgeError {
    ForgeError::validation("Something is still running for this conversation; cancel it or wait for it to finish")
}

/// Run `f` behind a checkpoint, dropping the checkpoint again when nothing
/// undoable changed.
fn checkpointed(
    state: &ConversationState,
    label: &str,
    f: impl FnOnce(&ConversationState) -> Result<TransitionResult, TransitionError>,
) -> Result<TransitionResult, TransitionError> {
    let mut result = conversation::transition(
        state,
        Event::Checkpoint {
            label: label.to_string(),
        },
    )?
    .then(f)?;
    if result.new_state.snapshot() == state.snapshot() {
        result.new_state.checkpoints.pop();
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::testing::{answer_all, orchestrator, orchestrator_on, MemoryStore};
    use super::*;
    use crate::event_bus::{BusMessage, Severity, Subscription};
    use crate::store::RecordKind;
    use futures::FutureExt;

    fn events(sub: &mut Subscription) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Some(Some(message)) = sub.recv().now_or_never() {
            if let BusMessage::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    /// Orchestrator whose builds stay in flight for a while
    fn slow_orchestrator(store: Arc<MemoryStore>) -> Arc<Orchestrator> {
        Arc::new(orchestrator_on(
            store,
            None,
            AgentConfig::default(),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_start_asks_questions_and_persists() {
        let orch = orchestrator(None);
        let view = orch.start("track my coffee shop orders").await.unwrap();
        assert_eq!(view.state.phase, Phase::Clarification);
        assert!(!view.state.questions.is_empty());
        assert_eq!(view.messages, view.state.messages);

        let loaded = orch.get_conversation(&view.conversation_id).await.unwrap();
        assert_eq!(loaded, view.state);
    }

    #[tokio::test]
    async fn test_start_rejects_blank_message() {
        let err = orch_start_err("   ").await;
        assert_eq!(err.code(), "validation");
    }

    async fn orch_start_err(message: &str) -> ForgeError {
        orchestrator(None).start(message).await.unwrap_err()
    }

    #[tokio::test]
    async fn test_unknown_question_is_flagged() {
        let orch = orchestrator(None);
        let id = orch.start("track orders").await.unwrap().conversation_id;
        let view = orch.answer(&id, "color", Answer::from("blue")).await.unwrap();
        assert!(view.unknown_question);
        assert_eq!(view.state.answers["color"], Answer::from("blue"));
        // Nothing undoable changed, so no checkpoint is kept
        assert!(view.state.checkpoints.is_empty());
    }

    #[tokio::test]
    async fn test_answering_everything_reaches_design() {
        let orch = orchestrator(None);
        let id = orch.start("track my coffee shop orders").await.unwrap().conversation_id;
        let state = answer_all(&orch, &id).await;
        assert_eq!(state.phase, Phase::Design);
        assert!(state.spec.is_some());
        assert_eq!(state.proposals.len(), 3);
    }

    #[tokio::test]
    async fn test_select_proposal_then_undo() {
        let orch = orchestrator(None);
        let id = orch.start("track my coffee shop orders").await.unwrap().conversation_id;
        let designed = answer_all(&orch, &id).await;

        let selected = orch.select_proposal(&id, "rich").await.unwrap();
        assert_eq!(selected.state.phase, Phase::Planning);

        let undone = orch.undo(&id).await.unwrap();
        assert_eq!(undone.state.snapshot(), designed.snapshot());
        assert_eq!(undone.state.messages, selected.state.messages);
    }

    #[tokio::test]
    async fn test_undo_on_fresh_conversation_is_notice() {
        let orch = orchestrator(None);
        let id = orch.start("a todo list").await.unwrap().conversation_id;
        let view = orch.undo(&id).await.unwrap();
        assert_eq!(view.notices.len(), 1);
        assert_eq!(view.notices[0].notice, Notice::NothingToUndo);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let orch = orchestrator(None);
        assert_eq!(orch.get_conversation("nope").await.unwrap_err().code(), "not_found");
        assert_eq!(orch.get_app("nope").await.unwrap_err().code(), "not_found");
        assert_eq!(orch.resolve_consent("nope", true).unwrap_err().code(), "not_found");
        assert!(!orch.cancel("nope"));
    }

    #[tokio::test]
    async fn test_actions_are_refused_while_a_build_runs() {
        let orch = slow_orchestrator(Arc::new(MemoryStore::default()));
        let id = orch.start("track my coffee shop orders").await.unwrap().conversation_id;
        answer_all(&orch, &id).await;

        let first = tokio::spawn({
            let orch = Arc::clone(&orch);
            let id = id.clone();
            async move { orch.finalize(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(orch.get_conversation(&id).await.unwrap().phase, Phase::Build);

        assert_eq!(orch.undo(&id).await.unwrap_err().code(), "validation");
        assert_eq!(orch.finalize(&id).await.unwrap_err().code(), "validation");
        assert_eq!(
            orch.select_proposal(&id, "rich").await.unwrap_err().code(),
            "validation"
        );
        let state = orch.get_conversation(&id).await.unwrap();
        assert_eq!(state.phase, Phase::Build);
        assert_eq!(state.checkpoints.last().unwrap().label, "build");

        // The first build is still the one cancel reaches
        assert!(orch.cancel(&id));
        let built = first.await.unwrap().unwrap();
        assert_eq!(built.status, crate::generation::BuildStatus::Cancelled);
        assert!(!orch.cancel(&id));

        let state = orch.get_conversation(&id).await.unwrap();
        assert_eq!(state.phase, Phase::Planning);
        assert_eq!(state.app_id.as_deref(), Some(built.app_id.as_str()));
        assert!(orch.undo(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_one_tracked_action_per_conversation() {
        let orch = orchestrator(None);
        let token = orch.track("c1").unwrap();
        assert_eq!(orch.track("c1").unwrap_err().code(), "validation");
        assert!(orch.track("c2").is_ok());

        assert!(orch.cancel("c1"));
        assert!(token.is_cancelled());
        orch.untrack("c1");
        assert!(orch.track("c1").is_ok());
    }

    #[tokio::test]
    async fn test_failed_build_of_stale_conversation_keeps_history() {
        let records = Arc::new(MemoryStore::default());
        let orch = orchestrator_on(
            Arc::clone(&records),
            None,
            AgentConfig::default(),
            Duration::from_millis(1),
        );
        let id = orch.start("track my coffee shop orders").await.unwrap().conversation_id;
        answer_all(&orch, &id).await;
        let planned = orch.select_proposal(&id, "rich").await.unwrap().state;

        // Left in build by an earlier process, with no build checkpoint
        let stale = conversation::transition(&planned, Event::BuildStarted)
            .unwrap()
            .new_state;
        store::save_conversation(records.as_ref(), &stale).await.unwrap();

        records.fail_writes(RecordKind::App);
        assert_eq!(orch.finalize(&id).await.unwrap_err().code(), "storage");

        let state = orch.get_conversation(&id).await.unwrap();
        assert_eq!(state.phase, Phase::Planning);
        assert_eq!(state.plan, planned.plan);
        assert_eq!(state.checkpoints, planned.checkpoints);
        assert_eq!(state.checkpoints.last().unwrap().label, "select proposal");
        assert!(!orch.cancel(&id));
    }

    #[tokio::test]
    async fn test_failed_build_rolls_back_its_own_checkpoint() {
        let records = Arc::new(MemoryStore::default());
        let orch = orchestrator_on(
            Arc::clone(&records),
            None,
            AgentConfig::default(),
            Duration::from_millis(1),
        );
        let id = orch.start("track my coffee shop orders").await.unwrap().conversation_id;
        let designed = answer_all(&orch, &id).await;

        records.fail_writes(RecordKind::App);
        assert!(orch.finalize(&id).await.is_err());

        let state = orch.get_conversation(&id).await.unwrap();
        assert_eq!(state.snapshot(), designed.snapshot());
        assert_eq!(state.checkpoints, designed.checkpoints);
    }

    #[tokio::test]
    async fn test_rejected_actions_publish_error_events() {
        let orch = orchestrator(None);
        let id = orch.start("track orders").await.unwrap().conversation_id;
        let mut sub = orch.bus().subscribe(&id);
        events(&mut sub);

        let err = orch.select_proposal(&id, "rich").await.unwrap_err();
        assert_eq!(err.code(), "validation");
        let last = events(&mut sub).pop().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert_eq!(last.phase, CONVERSATION_PHASE);
        assert_eq!(last.message, err.to_string());

        let _token = orch.track(&id).unwrap();
        let err = orch.undo(&id).await.unwrap_err();
        let last = events(&mut sub).pop().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert_eq!(last.message, err.to_string());
    }

    #[tokio::test]
    async fn test_cancelled_action_reports_a_warning() {
        let orch = orchestrator(None);
        let mut sub = orch.bus().subscribe("c1");
        let result: ForgeResult<()> = orch.report("c1", CONVERSATION_PHASE, Err(ForgeError::Aborted));
        assert!(result.is_err());
        let last = events(&mut sub).pop().unwrap();
        assert_eq!(last.severity, Severity::Warning);
        assert_eq!(last.technical_details.unwrap()["code"], "aborted");
    }

    #[tokio::test]
    async fn test_start_on_temporary_channel() {
        let orch = orchestrator(None);
        let mut temporary = orch.bus().subscribe("tmp-1");

        let err = orch.start_on_channel("tmp-1", "  ").await.unwrap_err();
        let failed = events(&mut temporary).pop().unwrap();
        assert_eq!(failed.severity, Severity::Error);
        assert_eq!(failed.message, err.to_string());

        let view = orch.start_on_channel("tmp-1", "track orders").await.unwrap();
        let created = events(&mut temporary).pop().unwrap();
        assert_eq!(created.severity, Severity::Info);
        assert_eq!(
            created.technical_details.unwrap()["conversationId"],
            view.conversation_id.as_str()
        );
    }

    #[tokio::test]
    async fn test_unread_start_events_move_to_the_conversation() {
        let orch = orchestrator(None);
        // Nobody is listening on the temporary channel yet
        let view = orch.start_on_channel("tmp-2", "track orders").await.unwrap();

        let mut sub = orch.bus().subscribe(&view.conversation_id);
        let received = events(&mut sub);
        assert!(received.iter().any(|e| e.message == "Conversation created"));
        assert_eq!(orch.bus().buffered_len("tmp-2"), 0);
    }

    #[tokio::test]
    async fn test_notices_are_published() {
        let orch = orchestrator(None);
        let id = orch.start("track orders").await.unwrap().conversation_id;
        let mut sub = orch.bus().subscribe(&id);
        assert!(sub.buffered_count() >= 1);
        let first = sub.recv().await.unwrap().into_event().unwrap();
        assert_eq!(first.phase, CONVERSATION_PHASE);
    }
}
