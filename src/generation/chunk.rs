//! Chunk protocol between a producer (model adapter) and the pipeline

use crate::llm::{strip_fences, TextStream};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};

pub const PAGE: &str = "page";
pub const TYPES: &str = "types";

/// Bytes of model output treated as a "full" artifact for progress purposes
const EXPECTED_BYTES: usize = 12_000;
/// Emit a status chunk each time this many more bytes have arrived
const STATUS_EVERY: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    /// Human-readable progress, 0-100 within the producer's own scale
    Status { message: String, progress: u8 },
    /// Partial artifact text, appended to its component
    Code { component: String, content: String },
    /// Authoritative final text for a component; ends the stream
    Complete { component: String, content: String },
    /// Terminates the stream
    Error { message: String },
}

impl GenerationChunk {
    pub fn status(message: impl Into<String>, progress: u8) -> Self {
        Self::Status {
            message: message.into(),
            progress: progress.min(100),
        }
    }

    pub fn code(component: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Code {
            component: component.into(),
            content: content.into(),
        }
    }

    pub fn complete(component: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Complete {
            component: component.into(),
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

pub type ChunkStream = BoxStream<'static, GenerationChunk>;

/// Generated text keyed by logical component (`page`, `types`, ...)
pub type Artifact = BTreeMap<String, String>;

/// Per-component concatenation of `code` chunks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactAccumulator {
    parts: Artifact,
}

impl ArtifactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, component: &str, content: &str) {
        self.parts
            .entry(component.to_string())
            .or_default()
            .push_str(content);
    }

    /// Supersede everything accumulated for `component`
    pub fn replace(&mut self, component: &str, content: String) {
        self.parts.insert(component.to_string(), content);
    }

    /// Fold one chunk in; returns false once the stream should stop
    pub fn apply(&mut self, chunk: &GenerationChunk) -> bool {
        match chunk {
            GenerationChunk::Status { .. } => true,
            GenerationChunk::Code { component, content } => {
                self.append(component, content);
                true
            }
            GenerationChunk::Complete { component, content } => {
                self.replace(component, content.clone());
                false
            }
            GenerationChunk::Error { .. } => false,
        }
    }

    #[cfg(test)]
    pub fn get(&self, component: &str) -> Option<&str> {
        self.parts.get(component).map(String::as_str)
    }

    /// True when no component has any non-whitespace content
    pub fn is_blank(&self) -> bool {
        self.parts.values().all(|text| text.trim().is_empty())
    }

    pub fn into_artifact(self) -> Artifact {
        self.parts
    }
}

struct AdapterState {
    inner: TextStream,
    component: String,
    text: String,
    reported: usize,
    queue: VecDeque<GenerationChunk>,
    finished: bool,
}

/// Adapt a raw text-fragment stream into chunks for one component.
///
/// Every fragment becomes a `code` chunk; byte counts drive `status`
/// chunks; the end of the stream yields a `complete` chunk carrying the
/// fence-stripped text, or an `error` when nothing arrived.
pub fn model_chunks(stream: TextStream, component: impl Into<String>) -> ChunkStream {
    let state = AdapterState {
        inner: stream,
        component: component.into(),
        text: String::new(),
        reported: 0,
        queue: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.queue.pop_front() {
                return Some((chunk, st));
            }
            if st.finished {
                return None;
            }

            match st.inner.next().await {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    st.text.push_str(&fragment);
                    st.queue
                        .push_back(GenerationChunk::code(st.component.clone(), fragment));
                    if st.text.len() - st.reported >= STATUS_EVERY {
                        st.reported = st.text.len();
                        let raw = (st.text.len() * 100 / EXPECTED_BYTES).min(99);
                        st.queue.push_back(GenerationChunk::status(
                            format!("Writing {} ({} KB)", st.component, st.text.len() / 1024),
                            u8::try_from(raw).unwrap_or(99),
                        ));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.queue.push_back(GenerationChunk::error(e.message));
                }
                None => {
                    st.finished = true;
                    let final_text = strip_fences(&st.text).to_string();
                    if final_text.is_empty() {
                        st.queue
                            .push_back(GenerationChunk::error("Model returned no content"));
                    } else {
                        st.queue
                            .push_back(GenerationChunk::complete(st.component.clone(), final_text));
                    }
                }
            }
        }
    })
    .boxed()
}
