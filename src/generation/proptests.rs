//! Property-based tests for chunk accumulation and the fallback guarantee

use super::chunk::{ArtifactAccumulator, GenerationChunk, PAGE, TYPES};
use super::pipeline::{ArtifactSource, GenerationPipeline};
use super::record::{BuildStatus, GeneratedAppRecord};
use crate::app_spec::AppSpec;
use crate::event_bus::EventBus;
use crate::llm::LlmError;
use crate::runtime::testing::MockLlm;
use proptest::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Split `text` at the given (unsorted, possibly out of range) byte offsets,
/// snapping each to a char boundary.
fn split_at_points(text: &str, points: &[usize]) -> Vec<String> {
    let mut cuts: Vec<usize> = points
        .iter()
        .map(|p| {
            let mut at = p % (text.len() + 1);
            while !text.is_char_boundary(at) {
                at -= 1;
            }
            at
        })
        .collect();
    cuts.push(0);
    cuts.push(text.len());
    cuts.sort_unstable();
    cuts.dedup();
    cuts.windows(2)
        .map(|w| text[w[0]..w[1]].to_string())
        .collect()
}

fn accumulate(chunks: &[GenerationChunk]) -> ArtifactAccumulator {
    let mut acc = ArtifactAccumulator::new();
    for chunk in chunks {
        if !acc.apply(chunk) {
            break;
        }
    }
    acc
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn code_chunks_concatenate_regardless_of_split(
        text in "[a-z{}();<> \n]{0,200}",
        points_a in proptest::collection::vec(any::<usize>(), 0..10),
        points_b in proptest::collection::vec(any::<usize>(), 0..10),
    ) {
        let a: Vec<_> = split_at_points(&text, &points_a)
            .into_iter()
            .map(|part| GenerationChunk::code(PAGE, part))
            .collect();
        let b: Vec<_> = split_at_points(&text, &points_b)
            .into_iter()
            .map(|part| GenerationChunk::code(PAGE, part))
            .collect();

        let acc_a = accumulate(&a);
        let acc_b = accumulate(&b);
        prop_assert_eq!(acc_a.get(PAGE).unwrap_or(""), text.as_str());
        prop_assert_eq!(acc_a, acc_b);
    }

    #[test]
    fn complete_supersedes_any_split(
        text in "[a-z ]{0,100}",
        final_text in "[a-z ]{1,100}",
        points in proptest::collection::vec(any::<usize>(), 0..10),
        types in "[a-z]{0,20}",
    ) {
        let mut chunks: Vec<_> = split_at_points(&text, &points)
            .into_iter()
            .map(|part| GenerationChunk::code(PAGE, part))
            .collect();
        chunks.insert(0, GenerationChunk::code(TYPES, types.clone()));
        chunks.push(GenerationChunk::complete(PAGE, final_text.clone()));
        chunks.push(GenerationChunk::code(PAGE, "after"));

        let acc = accumulate(&chunks);
        prop_assert_eq!(acc.get(PAGE), Some(final_text.as_str()));
        prop_assert_eq!(acc.get(TYPES), Some(types.as_str()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn model_error_anywhere_still_completes(
        fragments in proptest::collection::vec("[a-z{}() ]{1,20}", 0..6),
        fail_at in any::<prop::sample::Index>(),
    ) {
        let mut items: Vec<Result<String, LlmError>> = fragments.into_iter().map(Ok).collect();
        let at = fail_at.index(items.len() + 1);
        items.insert(at, Err(LlmError::server_error("overloaded")));

        let llm = Arc::new(MockLlm::new());
        llm.queue_stream(items);
        let pipeline = GenerationPipeline::new(Some(llm), Arc::new(EventBus::default()));
        let mut record = GeneratedAppRecord::new("prop", AppSpec::minimal("Prop"));

        let outcome = runtime().block_on(pipeline.generate(
            "prop",
            &mut record,
            None,
            &CancellationToken::new(),
        ));

        prop_assert_eq!(outcome.source, ArtifactSource::Fallback);
        prop_assert_eq!(record.build_status, BuildStatus::Completed);
        prop_assert!(record.files.values().all(|text| !text.trim().is_empty()));
    }
}
