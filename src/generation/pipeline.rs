//! Drives one generation to a usable artifact
//!
//! The model path streams chunks through the bus for live preview; any
//! failure on that path switches to the template generator, so a finished
//! (non-cancelled) generation always carries source for every component.

use super::chunk::{model_chunks, Artifact, ArtifactAccumulator, ChunkStream, GenerationChunk, PAGE};
use super::fallback::generate_fallback;
use super::quality::{verify, QualityReport};
use super::record::{BuildStatus, GeneratedAppRecord};
use crate::app_spec::AppSpec;
use crate::event_bus::{EventBus, StatusEvent};
use crate::llm::{LlmMessage, LlmRequest, LlmService};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Phase label carried by every event this pipeline publishes
pub const PHASE: &str = "generation";

/// Start of the pipeline's slice of overall build progress
const WINDOW_START: u8 = 30;
/// End of the pipeline's slice; persistence owns the rest
const WINDOW_END: u8 = 90;

const MAX_TOKENS: u32 = 16_000;

const SYSTEM_PROMPT: &str = "You write complete single-file React + TypeScript apps. \
Reply with only the source of src/App.tsx. Export the App component as default.";

/// Map producer progress (0-100) into the pipeline's window
pub fn scale_progress(raw: u8) -> u8 {
    let scaled = u16::from(WINDOW_START) + u16::from(raw.min(100)) * 6 / 10;
    u8::try_from(scaled.min(u16::from(WINDOW_END))).unwrap_or(WINDOW_END)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    Model,
    Fallback,
}

/// How reading a chunk stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(Artifact),
    Failed { partial: Artifact, reason: String },
    /// Whatever had accumulated when the token fired
    Cancelled(Artifact),
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub source: ArtifactSource,
    pub status: BuildStatus,
    pub quality: Option<QualityReport>,
}

pub struct GenerationPipeline {
    llm: Option<Arc<dyn LlmService>>,
    bus: Arc<EventBus>,
}

impl GenerationPipeline {
    pub fn new(llm: Option<Arc<dyn LlmService>>, bus: Arc<EventBus>) -> Self {
        Self { llm, bus }
    }

    /// Generate source for `record.spec` into `record`.
    ///
    /// `issue` describes what to fix when regenerating an existing app.
    pub async fn generate(
        &self,
        channel: &str,
        record: &mut GeneratedAppRecord,
        issue: Option<&str>,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        record.build_status = BuildStatus::Generating;
        match issue {
            Some(issue) => record.log(format!("Regeneration started: {issue}")),
            None => record.log("Generation started"),
        }
        self.bus.publish(
            channel,
            StatusEvent::info(PHASE, "Generating code", WINDOW_START),
        );

        let outcome = match &self.llm {
            _ if cancel.is_cancelled() => StreamOutcome::Cancelled(Artifact::new()),
            Some(llm) => {
                self.run_model(channel, llm.as_ref(), &record.spec, issue, cancel)
                    .await
            }
            None => {
                record.log("No model configured, using template generator");
                let artifact = generate_fallback(&record.spec);
                return self.finish(channel, record, artifact, ArtifactSource::Fallback);
            }
        };

        match outcome {
            StreamOutcome::Completed(mut artifact) => {
                let filled = fill_missing(&mut artifact, &record.spec);
                if filled > 0 {
                    record.log(format!("Filled {filled} missing component(s) from templates"));
                }
                self.finish(channel, record, artifact, ArtifactSource::Model)
            }
            StreamOutcome::Failed { reason, .. } => {
                tracing::warn!(channel = %channel, reason = %reason, "Model generation failed, using fallback");
                record.log(format!("Fallback generator used: {reason}"));
                self.bus.publish(
                    channel,
                    StatusEvent::warning(
                        PHASE,
                        "The model could not finish; building from templates instead",
                        WINDOW_END,
                    )
                    .with_details(json!({ "reason": reason })),
                );
                let artifact = generate_fallback(&record.spec);
                self.finish(channel, record, artifact, ArtifactSource::Fallback)
            }
            StreamOutcome::Cancelled(partial) => {
                tracing::info!(channel = %channel, components = partial.len(), "Generation cancelled");
                record.log(format!(
                    "Generation cancelled; kept {} partial component(s)",
                    partial.len()
                ));
                record.apply_artifact(&partial);
                record.build_status = BuildStatus::Cancelled;
                self.bus.publish(
                    channel,
                    StatusEvent::warning(PHASE, "Generation cancelled", WINDOW_END),
                );
                GenerationOutcome {
                    source: ArtifactSource::Model,
                    status: BuildStatus::Cancelled,
                    quality: None,
                }
            }
        }
    }

    fn finish(
        &self,
        channel: &str,
        record: &mut GeneratedAppRecord,
        artifact: Artifact,
        source: ArtifactSource,
    ) -> GenerationOutcome {
        let report = verify(&artifact);
        record.apply_artifact(&artifact);
        record.quality_score = Some(report.score);
        record.build_status = BuildStatus::Completed;
        record.log(format!("Quality score {}/100", report.score));
        record.log("Generation completed");

        self.bus.publish(
            channel,
            StatusEvent::info(
                PHASE,
                format!("Code ready (quality {}/100)", report.score),
                WINDOW_END,
            )
            .with_details(json!({ "source": source, "units": report.units })),
        );

        GenerationOutcome {
            source,
            status: BuildStatus::Completed,
            quality: Some(report),
        }
    }

    async fn run_model(
        &self,
        channel: &str,
        llm: &dyn LlmService,
        spec: &AppSpec,
        issue: Option<&str>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let request = generation_request(spec, issue);

        let opened = tokio::select! {
            biased;

            () = cancel.cancelled() => return StreamOutcome::Cancelled(Artifact::new()),
            opened = llm.stream_complete(&request) => opened,
        };

        match opened {
            Ok(stream) => self.consume(channel, model_chunks(stream, PAGE), cancel).await,
            Err(e) => StreamOutcome::Failed {
                partial: Artifact::new(),
                reason: e.message,
            },
        }
    }

    /// Read a chunk stream to its end, republishing progress and code
    /// through the bus in arrival order.
    pub async fn consume(
        &self,
        channel: &str,
        mut chunks: ChunkStream,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let mut acc = ArtifactAccumulator::new();
        let mut progress = WINDOW_START;

        loop {
            let next = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    return StreamOutcome::Cancelled(acc.into_artifact());
                }
                next = chunks.next() => next,
            };

            let Some(chunk) = next else {
                // Producer ended without a complete chunk
                return if acc.is_blank() {
                    StreamOutcome::Failed {
                        partial: acc.into_artifact(),
                        reason: "Stream ended without output".to_string(),
                    }
                } else {
                    StreamOutcome::Completed(acc.into_artifact())
                };
            };

            match &chunk {
                GenerationChunk::Status {
                    message,
                    progress: raw,
                } => {
                    progress = progress.max(scale_progress(*raw));
                    self.bus
                        .publish(channel, StatusEvent::info(PHASE, message.clone(), progress));
                }
                GenerationChunk::Code { component, content } => {
                    self.bus.publish(
                        channel,
                        StatusEvent::info(PHASE, format!("Writing {component}"), progress)
                            .with_details(json!({
                                "kind": "code",
                                "component": component,
                                "content": content,
                            })),
                    );
                }
                GenerationChunk::Complete { component, .. } => {
                    tracing::debug!(channel = %channel, component = %component, "Component complete");
                }
                GenerationChunk::Error { message } => {
                    return StreamOutcome::Failed {
                        partial: acc.into_artifact(),
                        reason: message.clone(),
                    };
                }
            }

            if !acc.apply(&chunk) {
                let artifact = acc.into_artifact();
                return if artifact.values().all(|text| text.trim().is_empty()) {
                    StreamOutcome::Failed {
                        partial: artifact,
                        reason: "Model returned no content".to_string(),
                    }
                } else {
                    StreamOutcome::Completed(artifact)
                };
            }
        }
    }
}

/// Fill blank or absent components from the template output
fn fill_missing(artifact: &mut Artifact, spec: &AppSpec) -> usize {
    let mut filled = 0;
    for (component, text) in generate_fallback(spec) {
        let slot = artifact.entry(component).or_default();
        if slot.trim().is_empty() {
            *slot = text;
            filled += 1;
        }
    }
    filled
}

fn generation_request(spec: &AppSpec, issue: Option<&str>) -> LlmRequest {
    let spec_json = serde_json::to_string_pretty(spec).unwrap_or_default();
    let mut prompt = format!("Build this app:\n\n{spec_json}");
    if let Some(issue) = issue {
        prompt.push_str("\n\nThe previous version had this problem, fix it:\n");
        prompt.push_str(issue);
    }
    LlmRequest::new(vec![LlmMessage::user(prompt)])
        .with_system(SYSTEM_PROMPT)
        .with_max_tokens(MAX_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::BusMessage;
    use crate::generation::chunk::TYPES;
    use crate::llm::LlmError;
    use crate::runtime::testing::MockLlm;

    fn pipeline(llm: Option<Arc<dyn LlmService>>) -> (GenerationPipeline, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        (GenerationPipeline::new(llm, bus.clone()), bus)
    }

    fn record() -> GeneratedAppRecord {
        GeneratedAppRecord::new("conv", AppSpec::minimal("Pipeline"))
    }

    fn chunks(items: Vec<GenerationChunk>) -> ChunkStream {
        futures::stream::iter(items).boxed()
    }

    #[test]
    fn test_progress_window() {
        assert_eq!(scale_progress(0), 30);
        assert_eq!(scale_progress(50), 60);
        assert_eq!(scale_progress(100), 90);
        assert_eq!(scale_progress(255), 90);
    }

    #[tokio::test]
    async fn test_consume_stops_at_complete() {
        let (pipeline, _bus) = pipeline(None);
        let outcome = pipeline
            .consume(
                "c",
                chunks(vec![
                    GenerationChunk::code(PAGE, "draft"),
                    GenerationChunk::complete(PAGE, "final"),
                    GenerationChunk::code(PAGE, "ignored"),
                ]),
                &CancellationToken::new(),
            )
            .await;
        let StreamOutcome::Completed(artifact) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(artifact[PAGE], "final");
    }

    #[tokio::test]
    async fn test_consume_republishes_in_order() {
        let (pipeline, bus) = pipeline(None);
        pipeline
            .consume(
                "c",
                chunks(vec![
                    GenerationChunk::status("Thinking", 50),
                    GenerationChunk::code(PAGE, "a"),
                    GenerationChunk::code(PAGE, "b"),
                    GenerationChunk::complete(PAGE, "ab"),
                ]),
                &CancellationToken::new(),
            )
            .await;

        let mut sub = bus.subscribe("c");
        let mut events = Vec::new();
        while events.len() < 3 {
            if let Some(BusMessage::Event(e)) = sub.recv().await {
                events.push(e);
            }
        }
        assert_eq!(events[0].message, "Thinking");
        assert_eq!(events[0].progress, 60);
        let contents: Vec<_> = events[1..]
            .iter()
            .map(|e| e.technical_details.as_ref().unwrap()["content"].clone())
            .collect();
        assert_eq!(contents, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_consume_cancelled_keeps_partial() {
        let (pipeline, _bus) = pipeline(None);
        let cancel = CancellationToken::new();
        let stream = futures::stream::iter(vec![GenerationChunk::code(PAGE, "half")])
            .chain(futures::stream::pending())
            .boxed();

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            token.cancel();
        });

        let outcome = pipeline.consume("c", stream, &cancel).await;
        assert_eq!(
            outcome,
            StreamOutcome::Cancelled(Artifact::from([(PAGE.to_string(), "half".to_string())]))
        );
    }

    #[tokio::test]
    async fn test_model_error_mid_stream_falls_back() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_stream(vec![
            Ok("export default function App() {".to_string()),
            Err(LlmError::network("connection reset")),
        ]);
        let (pipeline, _bus) = pipeline(Some(llm));
        let mut record = record();

        let outcome = pipeline
            .generate("c", &mut record, None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.source, ArtifactSource::Fallback);
        assert_eq!(record.build_status, BuildStatus::Completed);
        assert!(!record.files["src/App.tsx"].trim().is_empty());
        assert!(record
            .generation_log
            .iter()
            .any(|e| e.message.contains("Fallback generator used")));
    }

    #[tokio::test]
    async fn test_model_output_is_kept_and_types_filled() {
        let llm = Arc::new(MockLlm::new());
        llm.queue_stream(vec![
            Ok("```tsx\nexport default function App() { return null; }".to_string()),
            Ok("\n```".to_string()),
        ]);
        let (pipeline, _bus) = pipeline(Some(llm.clone()));
        let mut record = record();

        let outcome = pipeline
            .generate("c", &mut record, Some("buttons overlap"), &CancellationToken::new())
            .await;

        assert_eq!(outcome.source, ArtifactSource::Model);
        assert_eq!(
            record.files["src/App.tsx"],
            "export default function App() { return null; }"
        );
        assert_eq!(
            record.files["src/types.ts"],
            generate_fallback(&record.spec)[TYPES]
        );
        assert_eq!(record.quality_score, Some(100));
        assert!(llm.requests()[0].messages[0].content.contains("buttons overlap"));
    }

    #[tokio::test]
    async fn test_model_free_uses_templates() {
        let (pipeline, _bus) = pipeline(None);
        let mut record = record();
        let outcome = pipeline
            .generate("c", &mut record, None, &CancellationToken::new())
            .await;
        assert_eq!(outcome.source, ArtifactSource::Fallback);
        assert_eq!(outcome.status, BuildStatus::Completed);
        assert_eq!(record.files.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let llm = Arc::new(MockLlm::new());
        let (pipeline, _bus) = pipeline(Some(llm));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut record = record();

        let outcome = pipeline.generate("c", &mut record, None, &cancel).await;
        assert_eq!(outcome.status, BuildStatus::Cancelled);
        assert_eq!(record.build_status, BuildStatus::Cancelled);
        assert!(record.files.is_empty());
    }
}
