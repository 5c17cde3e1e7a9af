//! Streaming generation pipeline
//!
//! Producers emit [`GenerationChunk`]s; the pipeline accumulates them per
//! component, republishes progress on the event bus, and falls back to the
//! template generator whenever the model path cannot produce an artifact.

mod chunk;
mod fallback;
mod pipeline;
mod quality;
mod record;

#[cfg(test)]
mod proptests;

pub use chunk::{
    model_chunks, Artifact, ArtifactAccumulator, ChunkStream, GenerationChunk, PAGE, TYPES,
};
pub use fallback::generate_fallback;
pub use pipeline::{
    scale_progress, ArtifactSource, GenerationOutcome, GenerationPipeline, StreamOutcome, PHASE,
};
pub use quality::{verify, QualityReport, UnitScore};
pub use record::{component_path, BuildStatus, GeneratedAppRecord, LogEntry, APP_SCHEMA_VERSION};
