//! Property-based tests for the conversation state machine

use super::intake::{AUDIENCE_QUESTION, FIELDS_QUESTION, VIEWS_QUESTION, WORKFLOW_QUESTION};
use super::readiness::{overall_of, Readiness, ReadinessDelta};
use super::state::*;
use super::transition::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_delta() -> impl Strategy<Value = ReadinessDelta> {
    (0u8..=40, 0u8..=40, 0u8..=40).prop_map(|(s, u, w)| ReadinessDelta::new(s, u, w))
}

fn arb_answer() -> impl Strategy<Value = Answer> {
    prop_oneof![
        "[A-Za-z ]{1,12}".prop_map(Answer::Single),
        proptest::collection::vec("[A-Za-z ]{1,12}", 0..4).prop_map(Answer::Multiple),
    ]
}

fn arb_question_id() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(FIELDS_QUESTION.to_string()),
        Just(VIEWS_QUESTION.to_string()),
        Just(WORKFLOW_QUESTION.to_string()),
        Just(AUDIENCE_QUESTION.to_string()),
        "[a-z]{3,8}",
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (arb_question_id(), arb_answer())
            .prop_map(|(question_id, answer)| Event::Answer { question_id, answer }),
        "[a-z ]{1,30}".prop_map(|text| Event::UserMessage { text }),
        "[a-z]{1,8}".prop_map(|label| Event::Checkpoint { label }),
        Just(Event::Undo),
        prop_oneof![Just("minimal"), Just("standard"), Just("rich"), Just("other")]
            .prop_map(|id| Event::SelectProposal {
                proposal_id: id.to_string()
            }),
        Just(Event::BuildStarted),
    ]
}

fn started() -> ConversationState {
    start(&ConversationState::new("prop"), "track my coffee shop orders")
        .unwrap()
        .new_state
}

fn check_invariants(state: &ConversationState) -> Result<(), TestCaseError> {
    let r = state.readiness;
    prop_assert!(r.schema() <= 100 && r.ui() <= 100 && r.workflow() <= 100);
    prop_assert_eq!(r.overall(), overall_of(r.schema(), r.ui(), r.workflow()));

    let mut ids: Vec<&str> = state.questions.iter().map(|q| q.id.as_str()).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    prop_assert_eq!(before, ids.len(), "question ids must be unique");

    prop_assert!(state.checkpoints.len() <= MAX_CHECKPOINTS);
    if state.phase >= Phase::Design {
        prop_assert!(state.spec.is_some());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // Readiness never decreases under any sequence of deltas
    #[test]
    fn prop_readiness_monotonic(deltas in proptest::collection::vec(arb_delta(), 0..30)) {
        let mut readiness = Readiness::default();
        for delta in deltas {
            let next = readiness.apply(delta);
            prop_assert!(next.schema() >= readiness.schema());
            prop_assert!(next.ui() >= readiness.ui());
            prop_assert!(next.workflow() >= readiness.workflow());
            prop_assert!(next.overall() >= readiness.overall());
            prop_assert!(next.overall() <= 100);
            readiness = next;
        }
    }

    // Any event sequence keeps the record internally consistent, and
    // without undo the phase never moves backward except after a build
    #[test]
    fn prop_events_preserve_invariants(events in proptest::collection::vec(arb_event(), 0..25)) {
        let mut state = started();
        for event in events {
            let is_undo = matches!(event, Event::Undo);
            let before = state.phase;
            if let Ok(result) = transition(&state, event) {
                state = result.new_state;
                check_invariants(&state)?;
                if !is_undo {
                    prop_assert!(state.phase >= before, "{:?} -> {:?}", before, state.phase);
                }
            }
        }
    }

    // Undo after a checkpoint restores exactly the snapshot and nothing else
    #[test]
    fn prop_undo_restores_checkpoint(
        events in proptest::collection::vec(arb_event(), 0..15),
        label in "[a-z]{1,8}",
    ) {
        let base = started();
        let checkpointed = create_checkpoint(&base, &label).new_state;

        let mut state = checkpointed.clone();
        for event in events {
            // Nested checkpoints/undos would pop a different snapshot
            if matches!(event, Event::Checkpoint { .. } | Event::Undo) {
                continue;
            }
            if let Ok(result) = transition(&state, event) {
                state = result.new_state;
            }
        }

        let undone = undo(&state).new_state;
        prop_assert_eq!(undone.snapshot(), base.snapshot());
        prop_assert_eq!(&undone.messages, &state.messages);
        prop_assert_eq!(&undone.answers, &state.answers);
        prop_assert_eq!(&undone.questions, &state.questions);
        prop_assert_eq!(undone.checkpoints.len(), checkpointed.checkpoints.len() - 1);
    }

    // Unknown answers are always kept and always flagged
    #[test]
    fn prop_unknown_answers_flagged(id in "[a-z]{9,12}", answer in arb_answer()) {
        let state = started();
        let result = record_answer(&state, &id, answer.clone()).unwrap();
        prop_assert!(result.unknown_question());
        prop_assert_eq!(result.new_state.answers.get(&id), Some(&answer));
        prop_assert!(result.new_state.unknown_answers.contains(&id));
    }

    // Messages sent during a build are replayed in order after it
    #[test]
    fn prop_pending_messages_keep_order(texts in proptest::collection::vec("[a-z]{1,10}", 1..8)) {
        let mut state = started();
        state.phase = Phase::Build;
        let before = state.messages.len();
        for text in &texts {
            state = record_user_message(&state, text).new_state;
        }
        prop_assert_eq!(state.messages.len(), before);

        let flushed = flush_pending(&state).new_state;
        let replayed: Vec<&str> = flushed.messages[before..].iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<&str> = texts.iter().map(String::as_str).collect();
        prop_assert_eq!(replayed, expected);
    }
}
