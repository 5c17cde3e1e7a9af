//! Runs the directives of one agent turn
//!
//! Directives execute strictly in the order they appear. A failing directive
//! is logged and skipped; the turn continues. The optional apply step runs
//! once at the end and can only degrade the turn to a warning.

use super::consent::ConsentBroker;
use super::directive::{Directive, DirectiveError, DirectiveParser, ParseEvent};
use super::manifest::AgentChangeManifest;
use super::tools::{Tool, ToolContext, ToolOutput, ToolRegistry, Workspace};
use super::ExecutionMode;
use crate::error::{ForgeError, ForgeResult};
use crate::event_bus::{EventBus, StatusEvent};
use crate::llm::TextStream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const AGENT_PHASE: &str = "agent";

/// Commits a finished turn's change set somewhere durable
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    async fn apply(
        &self,
        conversation_id: &str,
        workspace: &Workspace,
        manifest: &AgentChangeManifest,
    ) -> ForgeResult<()>;
}

/// A directive that could not be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveFailure {
    /// `None` when the failure is not tied to one directive
    pub index: Option<usize>,
    pub tool: Option<String>,
    pub message: String,
}

impl DirectiveFailure {
    fn parse(index: Option<usize>, err: &DirectiveError) -> Self {
        Self {
            index,
            tool: None,
            message: err.to_string(),
        }
    }
}

impl From<&DirectiveFailure> for ForgeError {
    fn from(failure: &DirectiveFailure) -> Self {
        ForgeError::ToolExecutionFailure {
            tool: failure.tool.clone().unwrap_or_else(|| "directive".to_string()),
            message: failure.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurn {
    /// Prose outside of directives
    pub reply: String,
    pub manifest: AgentChangeManifest,
    pub errors: Vec<DirectiveFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_warning: Option<String>,
    /// The change set reached the applier and was saved
    pub applied: bool,
    pub cancelled: bool,
}

pub struct AgentExecutor {
    registry: ToolRegistry,
    mode: ExecutionMode,
    consent: Option<Arc<ConsentBroker>>,
    applier: Option<Arc<dyn ChangeApplier>>,
    bus: Arc<EventBus>,
}

impl AgentExecutor {
    pub fn new(registry: ToolRegistry, mode: ExecutionMode, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            mode,
            consent: None,
            applier: None,
            bus,
        }
    }

    #[must_use]
    pub fn with_consent(mut self, broker: Arc<ConsentBroker>) -> Self {
        self.consent = Some(broker);
        self
    }

    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn ChangeApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute every directive in an already complete text, for replies
    /// that arrive in one piece
    pub async fn execute(
        &self,
        conversation_id: &str,
        text: &str,
        workspace: &mut Workspace,
        cancel: &CancellationToken,
    ) -> AgentTurn {
        let mut turn = AgentTurn::default();
        let events = DirectiveParser::parse_all(text);
        self.handle_events(conversation_id, events, workspace, cancel, &mut turn)
            .await;
        self.finish(conversation_id, workspace, turn).await
    }

    /// Execute directives as they close in a streamed completion, publishing
    /// previews of directives that are still arriving.
    pub async fn execute_stream(
        &self,
        conversation_id: &str,
        mut stream: TextStream,
        workspace: &mut Workspace,
        cancel: &CancellationToken,
    ) -> AgentTurn {
        let mut turn = AgentTurn::default();
        let mut parser = DirectiveParser::new();

        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };

            let ended = !matches!(next, Some(Some(Ok(_))));
            let events = match next {
                None => {
                    turn.cancelled = true;
                    break;
                }
                Some(Some(Ok(fragment))) => parser.feed(&fragment),
                Some(Some(Err(e))) => {
                    tracing::warn!(conv_id = %conversation_id, error = %e, "Agent stream failed");
                    turn.errors.push(DirectiveFailure {
                        index: None,
                        tool: None,
                        message: format!("Model stream failed: {}", e.message),
                    });
                    parser.finish()
                }
                Some(None) => parser.finish(),
            };

            self.handle_events(conversation_id, events, workspace, cancel, &mut turn)
                .await;
            if ended || turn.cancelled {
                break;
            }
        }

        self.finish(conversation_id, workspace, turn).await
    }

    async fn handle_events(
        &self,
        conversation_id: &str,
        events: Vec<ParseEvent>,
        workspace: &mut Workspace,
        cancel: &CancellationToken,
        turn: &mut AgentTurn,
    ) {
        for event in events {
            if cancel.is_cancelled() {
                turn.cancelled = true;
                return;
            }
            match event {
                ParseEvent::Text(text) => turn.reply.push_str(&text),
                ParseEvent::Opened { index, name, .. } => {
                    self.bus.publish(
                        conversation_id,
                        StatusEvent::info(AGENT_PHASE, format!("Planning {name}"), step_progress(index)),
                    );
                }
                ParseEvent::Progress { index, preview } => {
                    self.bus.publish(
                        conversation_id,
                        StatusEvent::info(AGENT_PHASE, "Drafting change", step_progress(index))
                            .with_details(json!({
                                "kind": "directive-preview",
                                "index": index,
                                "preview": preview,
                            })),
                    );
                }
                ParseEvent::Closed(directive) => {
                    self.run_directive(conversation_id, &directive, workspace, cancel, turn)
                        .await;
                }
                ParseEvent::Malformed(err) => {
                    tracing::warn!(conv_id = %conversation_id, error = %err, "Skipping malformed directive");
                    turn.errors.push(DirectiveFailure::parse(None, &err));
                }
            }
        }
    }

    async fn run_directive(
        &self,
        conversation_id: &str,
        directive: &Directive,
        workspace: &mut Workspace,
        cancel: &CancellationToken,
        turn: &mut AgentTurn,
    ) {
        let index = directive.index;
        let resolved = directive.tool_name().and_then(|name| {
            let tool = self
                .registry
                .get(&name)
                .ok_or(DirectiveError::UnknownDirective(name))?;
            Ok((tool, directive.arguments()?))
        });
        let (tool, args) = match resolved {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(conv_id = %conversation_id, index, error = %err, "Directive skipped");
                turn.errors.push(DirectiveFailure::parse(Some(index), &err));
                return;
            }
        };

        let output = if tool.mutates() && self.mode == ExecutionMode::ReadOnly {
            ToolOutput::error(format!("{} is not permitted in read-only mode", tool.name()))
        } else if tool.mutates() && !self.consented(conversation_id, &*tool, &args, cancel).await {
            if cancel.is_cancelled() {
                turn.cancelled = true;
                return;
            }
            ToolOutput::error(format!("{} was declined", tool.name()))
        } else {
            tool.run(
                args.clone(),
                ToolContext {
                    conversation_id,
                    workspace: &mut *workspace,
                },
            )
            .await
        };

        if output.success {
            tracing::debug!(conv_id = %conversation_id, index, tool = tool.name(), "Directive executed");
        } else {
            tracing::warn!(
                conv_id = %conversation_id,
                index,
                tool = tool.name(),
                result = %output.output,
                "Directive failed"
            );
            turn.errors.push(DirectiveFailure {
                index: Some(index),
                tool: Some(tool.name().to_string()),
                message: output.output.clone(),
            });
        }

        self.bus.publish(
            conversation_id,
            StatusEvent::info(AGENT_PHASE, output.output.clone(), step_progress(index + 1)),
        );
        turn.manifest.record(tool.name(), args, &output, workspace);
    }

    async fn consented(
        &self,
        conversation_id: &str,
        tool: &dyn Tool,
        args: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> bool {
        match &self.consent {
            Some(broker) => {
                broker
                    .request(conversation_id, tool.name(), &tool.preview(args), cancel)
                    .await
            }
            None => true,
        }
    }

    async fn finish(
        &self,
        conversation_id: &str,
        workspace: &Workspace,
        mut turn: AgentTurn,
    ) -> AgentTurn {
        turn.reply = turn.reply.trim().to_string();

        let should_apply = self.mode == ExecutionMode::ReadWrite
            && !turn.cancelled
            && !turn.manifest.is_empty();
        if let (true, Some(applier)) = (should_apply, &self.applier) {
            match applier.apply(conversation_id, workspace, &turn.manifest).await {
                Ok(()) => turn.applied = true,
                Err(e) => {
                    tracing::warn!(conv_id = %conversation_id, error = %e, "Apply step failed");
                    self.bus.publish(
                        conversation_id,
                        StatusEvent::warning(
                            AGENT_PHASE,
                            format!("Changes are applied but could not be saved: {e}"),
                            100,
                        ),
                    );
                    turn.apply_warning = Some(e.to_string());
                }
            }
        }

        turn
    }
}

fn step_progress(index: usize) -> u8 {
    u8::try_from((10 + index * 10).min(90)).unwrap_or(90)
}
