//! Chat action
//!
//! Before the build, chat shapes the design and earns readiness. While a
//! build runs, messages are queued. After the build, chat drives the agent
//! executor against the generated app's files.

use super::{checkpointed, ConversationView, Orchestrator, CONVERSATION_PHASE};
use crate::agent::{
    directive_guide, AgentChangeManifest, AgentTurn, ChangeApplier, ExecutionMode, ToolRegistry,
    Workspace,
};
use crate::conversation::{self, ConversationState, Event, Phase, Readiness, Role};
use crate::error::{ForgeError, ForgeResult};
use crate::llm::{LlmMessage, LlmRequest, LlmService, MessageRole};
use crate::store::{self, RecordStore};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REPLY_MAX_TOKENS: u32 = 1024;
const AGENT_MAX_TOKENS: u32 = 16_000;

/// Label of the checkpoint that lets undo revert an agent's edits
const AGENT_EDIT_CHECKPOINT: &str = "agent edit";

const MODEL_FREE_AGENT_REPLY: &str = "Editing the app needs a model connection. \
You can still regenerate it with a description of what should change.";

impl Orchestrator {
    pub async fn chat(&self, conversation_id: &str, text: &str) -> ForgeResult<ConversationView> {
        let result = self.run_chat(conversation_id, text.trim()).await;
        self.report(conversation_id, CONVERSATION_PHASE, result)
    }

    async fn run_chat(&self, conversation_id: &str, text: &str) -> ForgeResult<ConversationView> {
        if text.is_empty() {
            return Err(ForgeError::validation("Message is empty"));
        }
        let _guard = self.lock(conversation_id).await;
        let state = self.load(conversation_id).await?;
        match state.phase {
            Phase::Build => {
                let queued = conversation::transition(
                    &state,
                    Event::UserMessage {
                        text: text.to_string(),
                    },
                )?;
                self.commit(queued).await
            }
            Phase::Complete => self.agent_turn(&state, text).await,
            _ => self.design_turn(&state, text).await,
        }
    }

    async fn design_turn(
        &self,
        state: &ConversationState,
        text: &str,
    ) -> ForgeResult<ConversationView> {
        let recorded = checkpointed(state, "chat", |s| {
            conversation::transition(
                s,
                Event::UserMessage {
                    text: text.to_string(),
                },
            )
        })?;
        let reply = self.design_reply(&recorded.new_state).await;
        let result = recorded.then(|s| {
            conversation::transition(
                s,
                Event::AssistantMessage {
                    text: reply,
                    metadata: None,
                },
            )
        })?;
        self.commit(result).await
    }

    async fn design_reply(&self, state: &ConversationState) -> String {
        if let Some(llm) = &self.llm {
            let request = LlmRequest::new(history(state))
                .with_system(design_prompt(state))
                .with_max_tokens(REPLY_MAX_TOKENS);
            match llm.complete(&request).await {
                Ok(response) if !response.text.trim().is_empty() => {
                    return response.text.trim().to_string();
                }
                Ok(_) => {
                    tracing::warn!(conv_id = %state.id, "Model returned an empty reply, using scripted reply");
                }
                Err(e) => {
                    tracing::warn!(conv_id = %state.id, error = %e, "Model reply failed, using scripted reply");
                }
            }
        }
        scripted_reply(state)
    }

    async fn agent_turn(
        &self,
        state: &ConversationState,
        text: &str,
    ) -> ForgeResult<ConversationView> {
        let app_id = state
            .app_id
            .clone()
            .ok_or_else(|| ForgeError::validation("No app has been built yet"))?;
        let app = store::load_app(self.store.as_ref(), &app_id).await?;
        let recorded = conversation::transition(
            state,
            Event::UserMessage {
                text: text.to_string(),
            },
        )?;

        let Some(llm) = self.llm.clone() else {
            let result = recorded.then(|s| {
                conversation::transition(
                    s,
                    Event::AssistantMessage {
                        text: MODEL_FREE_AGENT_REPLY.to_string(),
                        metadata: None,
                    },
                )
            })?;
            return self.commit(result).await;
        };

        let mut workspace = Workspace {
            files: app.files,
            dependencies: app.dependencies,
            summary: app.summary,
        };
        let request = LlmRequest::new(history(&recorded.new_state))
            .with_system(agent_prompt(
                self.agent.registry(),
                self.agent.mode(),
                &workspace,
            ))
            .with_max_tokens(AGENT_MAX_TOKENS);

        let token = self.track(&state.id)?;
        let turn = self
            .run_agent(&state.id, llm.as_ref(), &request, &mut workspace, &token)
            .await;
        self.untrack(&state.id);
        let turn = match turn {
            Ok(turn) => turn,
            Err(e) => {
                // Keep the user's message even though no reply came
                self.commit(recorded).await?;
                return Err(e);
            }
        };

        tracing::info!(
            conv_id = %state.id,
            app_id = %app_id,
            errors = turn.errors.len(),
            applied = turn.applied,
            cancelled = turn.cancelled,
            "Agent turn finished"
        );

        // The applier already saved the edits, so undo must bring back the
        // revision the turn started from
        let recorded = if turn.applied {
            recorded.then(|s| {
                Ok(conversation::create_app_checkpoint(s, AGENT_EDIT_CHECKPOINT, app.revision))
            })?
        } else {
            recorded
        };

        let reply = agent_reply(&turn);
        let metadata = json!({
            "manifest": turn.manifest,
            "errors": turn.errors,
            "cancelled": turn.cancelled,
        });
        let result = recorded.then(|s| {
            conversation::transition(
                s,
                Event::AssistantMessage {
                    text: reply,
                    metadata: Some(metadata),
                },
            )
        })?;

        let mut view = self.commit(result).await?;
        view.agent = Some(turn);
        Ok(view)
    }

    /// Stream the agent's reply, or take it in one piece when streaming
    /// fails in a way a plain completion may not
    async fn run_agent(
        &self,
        conversation_id: &str,
        llm: &dyn LlmService,
        request: &LlmRequest,
        workspace: &mut Workspace,
        token: &CancellationToken,
    ) -> ForgeResult<AgentTurn> {
        let opened = tokio::select! {
            biased;

            () = token.cancelled() => return Err(ForgeError::Aborted),
            opened = llm.stream_complete(request) => opened,
        };
        match opened {
            Ok(stream) => Ok(self
                .agent
                .execute_stream(conversation_id, stream, workspace, token)
                .await),
            Err(e) if e.kind.is_retryable() => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Agent stream failed to open, retrying without streaming");
                let response = tokio::select! {
                    biased;

                    () = token.cancelled() => return Err(ForgeError::Aborted),
                    response = llm.complete(request) => response?,
                };
                Ok(self
                    .agent
                    .execute(conversation_id, &response.text, workspace, token)
                    .await)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Conversation transcript as model messages.
///
/// System messages are dropped and consecutive messages from one side are
/// merged, so roles alternate starting with the user.
fn history(state: &ConversationState) -> Vec<LlmMessage> {
    let mut out: Vec<LlmMessage> = Vec::new();
    for message in &state.messages {
        let user = match message.role {
            Role::User => true,
            Role::Assistant => false,
            Role::System => continue,
        };
        if out.is_empty() && !user {
            continue;
        }
        match out.last_mut() {
            Some(last) if (last.role == MessageRole::User) == user => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => out.push(if user {
                LlmMessage::user(message.content.clone())
            } else {
                LlmMessage::assistant(message.content.clone())
            }),
        }
    }
    out
}

fn design_prompt(state: &ConversationState) -> String {
    let mut prompt = format!(
        "You help a user shape a small web app before it is built. \
         The conversation is in the {} phase and the design is {}% ready; \
         the least settled part is {}. \
         Reply in two or three sentences and ask about whatever is still missing.",
        state.phase,
        state.readiness.overall(),
        weakest_area(state.readiness)
    );
    if let Some(spec) = &state.spec {
        if let Ok(spec_json) = serde_json::to_string(spec) {
            let _ = write!(prompt, "\n\nCurrent design:\n{spec_json}");
        }
    }
    prompt
}

/// Ties go to the data model, then the screens
fn weakest_area(readiness: Readiness) -> &'static str {
    let areas = [
        (readiness.schema(), "the data model"),
        (readiness.ui(), "the screens"),
        (readiness.workflow(), "the workflows"),
    ];
    areas
        .into_iter()
        .min_by_key(|(score, _)| *score)
        .map_or("the data model", |(_, area)| area)
}

fn scripted_reply(state: &ConversationState) -> String {
    if let Some(question) = state.unanswered().next() {
        return format!("Got it. {}", question.text);
    }
    let name = state.spec.as_ref().map_or("your app", |s| s.name.as_str());
    match state.phase {
        Phase::Design => {
            format!("Noted. Pick one of the proposed designs for {name}, or finalize when you're ready.")
        }
        Phase::Planning => format!("Noted. Finalize whenever you're ready to build {name}."),
        _ => "Noted.".to_string(),
    }
}

fn agent_prompt(registry: &ToolRegistry, mode: ExecutionMode, workspace: &Workspace) -> String {
    let mut prompt = format!(
        "You are editing a generated React + TypeScript app.\n\n{}\n",
        directive_guide(registry)
    );
    if mode == ExecutionMode::ReadOnly {
        prompt.push_str(
            "This session is read-only: read and explain the code, but do not change files.\n",
        );
    }
    prompt.push_str("Current files:\n");
    for (path, content) in &workspace.files {
        let _ = write!(prompt, "\n--- {path} ---\n{content}\n");
    }
    if !workspace.dependencies.is_empty() {
        let _ = write!(prompt, "\nDependencies: {}\n", workspace.dependencies.join(", "));
    }
    prompt
}

fn agent_reply(turn: &AgentTurn) -> String {
    if !turn.reply.is_empty() {
        return turn.reply.clone();
    }
    if turn.cancelled {
        return "Stopped.".to_string();
    }
    let changes = turn.manifest.created_files.len()
        + turn.manifest.modified_files.len()
        + turn.manifest.deleted_files.len()
        + turn.manifest.renamed_files.len()
        + turn.manifest.added_dependencies.len();
    match changes {
        0 => "I didn't change anything.".to_string(),
        1 => "Made 1 change.".to_string(),
        n => format!("Made {n} changes."),
    }
}

/// Writes an agent turn's workspace back onto the conversation's app record
pub struct StoreApplier {
    store: Arc<dyn RecordStore>,
}

impl StoreApplier {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChangeApplier for StoreApplier {
    async fn apply(
        &self,
        conversation_id: &str,
        workspace: &Workspace,
        manifest: &AgentChangeManifest,
    ) -> ForgeResult<()> {
        let state = store::load_conversation(self.store.as_ref(), conversation_id).await?;
        let app_id = state
            .app_id
            .ok_or_else(|| ForgeError::validation("The conversation has no app to update"))?;
        let mut record = store::load_app(self.store.as_ref(), &app_id).await?;

        record.remember_revision();
        record.files.clone_from(&workspace.files);
        record.dependencies.clone_from(&workspace.dependencies);
        record.summary.clone_from(&workspace.summary);
        record.revision += 1;
        record.log(format!(
            "Agent changes applied: {} created, {} modified, {} deleted, {} renamed",
            manifest.created_files.len(),
            manifest.modified_files.len(),
            manifest.deleted_files.len(),
            manifest.renamed_files.len()
        ));
        store::save_app(self.store.as_ref(), &record).await?;
        tracing::debug!(conv_id = %conversation_id, app_id = %app_id, revision = record.revision, "Agent changes saved");
        Ok(())
    }
}
