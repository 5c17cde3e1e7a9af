//! Build and regenerate actions

use super::{checkpointed, Orchestrator};
use crate::conversation::{self, ConversationState, Event, TransitionError};
use crate::error::{ForgeError, ForgeResult};
use crate::event_bus::StatusEvent;
use crate::generation::{
    ArtifactSource, BuildStatus, GeneratedAppRecord, GenerationOutcome, QualityReport,
};
use crate::store;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Phase label for build lifecycle events
pub const BUILD_PHASE: &str = "build";

const BUILD_CHECKPOINT: &str = "build";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub app_id: String,
    pub status: BuildStatus,
    pub source: ArtifactSource,
    pub quality: Option<QualityReport>,
    pub app: GeneratedAppRecord,
}

impl BuildResult {
    fn new(record: GeneratedAppRecord, outcome: GenerationOutcome) -> Self {
        Self {
            app_id: record.id.clone(),
            status: outcome.status,
            source: outcome.source,
            quality: outcome.quality,
            app: record,
        }
    }
}

impl Orchestrator {
    /// Build the app for a conversation.
    ///
    /// The conversation lock is released while code is generated, so chat
    /// messages arriving mid-build are queued instead of waiting.
    pub async fn finalize(&self, conversation_id: &str) -> ForgeResult<BuildResult> {
        let result = self.run_build(conversation_id).await;
        self.report(conversation_id, BUILD_PHASE, result)
    }

    async fn run_build(&self, conversation_id: &str) -> ForgeResult<BuildResult> {
        // The token is registered before the lock drops, so every other
        // action sees the build as running until it is fully settled
        let (record, steps, token) = {
            let _guard = self.lock(conversation_id).await;
            let state = self.load(conversation_id).await?;
            let token = self.track(conversation_id)?;
            match self.enter_build(&state).await {
                Ok((record, steps)) => (record, steps, token),
                Err(e) => {
                    self.untrack(conversation_id);
                    return Err(e);
                }
            }
        };

        let outcome = self.generate_app(conversation_id, record, steps, &token).await;
        if outcome.is_err() {
            self.abort_build(conversation_id).await;
        }
        self.untrack(conversation_id);
        outcome
    }

    async fn enter_build(
        &self,
        state: &ConversationState,
    ) -> ForgeResult<(GeneratedAppRecord, usize)> {
        let result = checkpointed(state, BUILD_CHECKPOINT, |s| {
            conversation::transition(s, Event::BuildStarted)
        })?;
        let spec = result
            .new_state
            .spec
            .clone()
            .ok_or(TransitionError::MissingSpec)?;
        let steps = result.new_state.plan.as_ref().map_or(0, |p| p.steps.len());
        self.commit(result).await?;
        Ok((GeneratedAppRecord::new(&state.id, spec), steps))
    }

    async fn generate_app(
        &self,
        conversation_id: &str,
        mut record: GeneratedAppRecord,
        steps: usize,
        token: &CancellationToken,
    ) -> ForgeResult<BuildResult> {
        let attached = tokio::select! {
            biased;

            () = token.cancelled() => false,
            attached = self.bus.wait_for_connection(conversation_id, self.connect_wait) => attached,
        };
        if !attached {
            tracing::info!(conv_id = %conversation_id, "No listener attached, build events will be buffered");
        }

        self.bus.publish(
            conversation_id,
            StatusEvent::info(BUILD_PHASE, "Preparing build", 5),
        );
        self.bus.publish(
            conversation_id,
            StatusEvent::info(BUILD_PHASE, format!("Build plan ready ({steps} steps)"), 20),
        );

        let outcome = self
            .pipeline
            .generate(conversation_id, &mut record, None, token)
            .await;

        self.bus.publish(
            conversation_id,
            StatusEvent::info(BUILD_PHASE, "Saving app", 95),
        );
        store::save_app(self.store.as_ref(), &record).await?;

        let cancelled = outcome.status == BuildStatus::Cancelled;
        {
            let _guard = self.lock(conversation_id).await;
            let state = self.load(conversation_id).await?;
            let finished = conversation::transition(
                &state,
                Event::BuildFinished {
                    app_id: record.id.clone(),
                    cancelled,
                },
            )?;
            self.commit(finished).await?;
        }

        self.announce_result(conversation_id, &record, &outcome);
        Ok(BuildResult::new(record, outcome))
    }

    /// Return a conversation stuck in `build` to where it was before
    async fn abort_build(&self, conversation_id: &str) {
        let _guard = self.lock(conversation_id).await;
        let state = match self.load(conversation_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Could not load failed build for rollback");
                return;
            }
        };
        let result = conversation::abandon_build(&state, BUILD_CHECKPOINT);
        if let Err(e) = self.commit(result).await {
            tracing::warn!(conv_id = %conversation_id, error = %e, "Could not roll back failed build");
        }
    }

    /// Regenerate an existing app with a description of what to fix
    pub async fn regenerate(&self, app_id: &str, issue: &str) -> ForgeResult<BuildResult> {
        let record = self.get_app(app_id).await?;
        let channel = record.conversation_id.clone();
        let result = self.run_regenerate(&channel, record, issue).await;
        self.report(&channel, BUILD_PHASE, result)
    }

    async fn run_regenerate(
        &self,
        conversation_id: &str,
        mut record: GeneratedAppRecord,
        issue: &str,
    ) -> ForgeResult<BuildResult> {
        let issue = issue.trim();
        if issue.is_empty() {
            return Err(ForgeError::validation("Describe what should change"));
        }

        let _guard = self.lock(conversation_id).await;
        let token = self.track(conversation_id)?;
        record.revision += 1;
        let outcome = self
            .pipeline
            .generate(conversation_id, &mut record, Some(issue), &token)
            .await;
        self.untrack(conversation_id);

        store::save_app(self.store.as_ref(), &record).await?;
        self.announce_result(conversation_id, &record, &outcome);
        Ok(BuildResult::new(record, outcome))
    }

    fn announce_result(
        &self,
        conversation_id: &str,
        record: &GeneratedAppRecord,
        outcome: &GenerationOutcome,
    ) {
        tracing::info!(
            conv_id = %conversation_id,
            app_id = %record.id,
            status = ?outcome.status,
            source = ?outcome.source,
            quality = ?record.quality_score,
            "Build finished"
        );
        let event = if outcome.status == BuildStatus::Cancelled {
            StatusEvent::warning(BUILD_PHASE, "Build cancelled; partial output was saved", 100)
        } else {
            StatusEvent::success(BUILD_PHASE, format!("{} is ready", record.name))
        };
        self.bus
            .publish(conversation_id, event.with_details(serde_json::json!({ "appId": record.id })));
        if outcome.status == BuildStatus::Cancelled {
            // Ends the live stream once the warning is read
            self.bus.unsubscribe(conversation_id);
        }
    }
}
