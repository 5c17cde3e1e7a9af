//! Pure conversation transitions
//!
//! Every operation takes the current state by reference and returns the
//! next state plus user-visible notices. No I/O happens here; the runtime
//! persists `new_state` and publishes notices.

use super::intake::{
    analyze_intent, answer_delta, generate_proposals, generate_questions, infer_readiness_delta,
    synthesize_plan, synthesize_spec,
};
use super::readiness::ReadinessDelta;
use super::state::{
    Answer, Checkpoint, ConversationState, Dimension, FeedbackSession, Message, Phase,
    MAX_CHECKPOINTS,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const PROPOSAL_BONUS: u8 = 20;

/// Input to `transition`
#[derive(Debug, Clone)]
pub enum Event {
    Start { message: String },
    Answer { question_id: String, answer: Answer },
    UserMessage { text: String },
    AssistantMessage { text: String, metadata: Option<Value> },
    Checkpoint { label: String },
    Undo,
    SelectProposal { proposal_id: String },
    BuildStarted,
    BuildFinished { app_id: String, cancelled: bool },
}

/// Whether advancing may overwrite an already-synthesized spec or plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Regenerate {
    #[default]
    Keep,
    Replace,
}

/// Something the user should be told about, but that is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    UnknownQuestion { question_id: String },
    NothingToUndo,
    MessageQueued { pending: usize },
    PhaseAdvanced { from: Phase, to: Phase },
    Restored { label: String },
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::UnknownQuestion { question_id } => {
                format!("Recorded an answer for '{question_id}', which is not a current question")
            }
            Notice::NothingToUndo => "There is nothing to undo yet".to_string(),
            Notice::MessageQueued { pending } => format!(
                "Your message will be picked up once the build finishes ({pending} queued)"
            ),
            Notice::PhaseAdvanced { from, to } => format!("Moved from {from} to {to}"),
            Notice::Restored { label } => format!("Restored the state before \"{label}\""),
        }
    }
}

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConversationState,
    pub notices: Vec<Notice>,
}

impl TransitionResult {
    pub fn new(state: ConversationState) -> Self {
        Self {
            new_state: state,
            notices: vec![],
        }
    }

    #[must_use]
    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }

    /// Chain another transition onto this result, keeping all notices
    pub fn then(
        self,
        f: impl FnOnce(&ConversationState) -> Result<TransitionResult, TransitionError>,
    ) -> Result<TransitionResult, TransitionError> {
        let mut next = f(&self.new_state)?;
        let mut notices = self.notices;
        notices.append(&mut next.notices);
        next.notices = notices;
        Ok(next)
    }

    pub fn unknown_question(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, Notice::UnknownQuestion { .. }))
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot {action} while the conversation is in the {phase} phase")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("{remaining} question(s) still need an answer")]
    IncompleteAnswers { remaining: usize },
    #[error("Unknown design proposal: {0}")]
    UnknownProposal(String),
    #[error("The conversation has no app spec yet")]
    MissingSpec,
    #[error("Invalid app spec: {0}")]
    InvalidSpec(String),
}

/// Pure transition function
pub fn transition(
    state: &ConversationState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        Event::Start { message } => start(state, &message),
        Event::Answer {
            question_id,
            answer,
        } => {
            let recorded = record_answer(state, &question_id, answer)?;
            if recorded.new_state.phase == Phase::Clarification
                && recorded.new_state.all_answered()
            {
                recorded.then(|s| advance_phase(s, Regenerate::Keep))
            } else {
                Ok(recorded)
            }
        }
        Event::UserMessage { text } => Ok(record_user_message(state, &text)),
        Event::AssistantMessage { text, metadata } => {
            let mut next = state.clone();
            let message = Message::assistant(text);
            next.messages.push(match metadata {
                Some(metadata) => message.with_metadata(metadata),
                None => message,
            });
            next.updated_at = Utc::now();
            Ok(TransitionResult::new(next))
        }
        Event::Checkpoint { label } => Ok(create_checkpoint(state, &label)),
        Event::Undo => Ok(undo(state)),
        Event::SelectProposal { proposal_id } => select_proposal(state, &proposal_id),
        Event::BuildStarted => begin_build(state),
        Event::BuildFinished { app_id, cancelled } => Ok(finish_build(state, &app_id, cancelled)),
    }
}

/// First user message: classify, ask clarification questions
pub fn start(
    state: &ConversationState,
    message: &str,
) -> Result<TransitionResult, TransitionError> {
    if state.phase != Phase::Intake {
        return Err(TransitionError::InvalidPhase {
            action: "start",
            phase: state.phase,
        });
    }

    let mut next = state.clone();
    next.messages.push(Message::user(message));
    let intent = analyze_intent(message);
    next.questions = generate_questions(&intent);
    next.intent = Some(intent);

    update_readiness(&next, ReadinessDelta::schema(10))
        .then(|s| advance_phase(s, Regenerate::Keep))
}

/// Record an answer; unknown question ids are kept and flagged
pub fn record_answer(
    state: &ConversationState,
    question_id: &str,
    answer: Answer,
) -> Result<TransitionResult, TransitionError> {
    if !state.phase.is_editable() {
        return Err(TransitionError::InvalidPhase {
            action: "answer questions",
            phase: state.phase,
        });
    }

    let mut next = state.clone();
    let delta = answer_delta(question_id, &answer);
    let first_answer = match next.questions.iter_mut().find(|q| q.id == question_id) {
        Some(question) => {
            let first = !question.answered;
            question.answered = true;
            first
        }
        None => false,
    };
    let is_known_id = next.question(question_id).is_some();

    next.answers.insert(question_id.to_string(), answer);
    // Re-answering does not earn readiness twice
    if first_answer {
        next.readiness = next.readiness.apply(delta);
    }
    next.updated_at = Utc::now();

    if is_known_id {
        Ok(TransitionResult::new(next))
    } else {
        tracing::warn!(
            conv_id = %state.id,
            question_id,
            "Answer recorded for unknown question id"
        );
        if !next.unknown_answers.iter().any(|id| id == question_id) {
            next.unknown_answers.push(question_id.to_string());
        }
        Ok(TransitionResult::new(next).with_notice(Notice::UnknownQuestion {
            question_id: question_id.to_string(),
        }))
    }
}

/// Move along the single forward edge of the phase graph
pub fn advance_phase(
    state: &ConversationState,
    regenerate: Regenerate,
) -> Result<TransitionResult, TransitionError> {
    let from = state.phase;
    let Some(to) = from.next() else {
        return Err(TransitionError::InvalidPhase {
            action: "advance",
            phase: from,
        });
    };

    let mut next = state.clone();
    match to {
        Phase::Clarification => {
            if next.questions.is_empty() {
                let intent = next
                    .intent
                    .get_or_insert_with(|| analyze_intent(""))
                    .clone();
                next.questions = generate_questions(&intent);
            }
            let first = next.unanswered().next().map(|q| q.text.clone());
            if let Some(text) = first {
                next.messages.push(Message::assistant(format!(
                    "Great, let's shape this together. {text}"
                )));
            }
        }
        Phase::Design => {
            let remaining = next.unanswered().count();
            if remaining > 0 {
                return Err(TransitionError::IncompleteAnswers { remaining });
            }
            if next.spec.is_none() || regenerate == Regenerate::Replace {
                let intent = next
                    .intent
                    .clone()
                    .unwrap_or_else(|| analyze_intent(""));
                next.spec = Some(synthesize_spec(&intent, &next.answers));
                next.readiness = next.readiness.apply(ReadinessDelta::new(30, 20, 10));
            }
            if let Some(spec) = &next.spec {
                next.proposals = generate_proposals(spec);
                next.messages.push(Message::assistant(format!(
                    "Here is a first design for {}. Pick one of {} styles or keep going.",
                    spec.name,
                    next.proposals.len()
                )));
            }
        }
        Phase::Planning => {
            let spec = next.spec.as_ref().ok_or(TransitionError::MissingSpec)?;
            if next.plan.is_none() || regenerate == Regenerate::Replace {
                next.plan = Some(synthesize_plan(spec));
                next.readiness = next.readiness.apply(ReadinessDelta::new(0, 20, 20));
            }
            next.proposals.clear();
        }
        Phase::Build => {
            let spec = next.spec.as_ref().ok_or(TransitionError::MissingSpec)?;
            spec.validate()
                .map_err(|e| TransitionError::InvalidSpec(e.to_string()))?;
            if next.plan.is_none() {
                next.plan = Some(synthesize_plan(spec));
            }
        }
        Phase::Complete => {
            if next.app_id.is_none() {
                return Err(TransitionError::InvalidPhase {
                    action: "complete without a build",
                    phase: from,
                });
            }
        }
        Phase::Intake => unreachable!("intake has no incoming edge"),
    }

    next.phase = to;
    next.updated_at = Utc::now();
    Ok(TransitionResult::new(next).with_notice(Notice::PhaseAdvanced { from, to }))
}

/// Raise readiness sub-scores; never lowers them
pub fn update_readiness(state: &ConversationState, delta: ReadinessDelta) -> TransitionResult {
    let mut next = state.clone();
    if delta.is_zero() {
        return TransitionResult::new(next);
    }
    next.readiness = next.readiness.apply(delta);
    next.updated_at = Utc::now();
    TransitionResult::new(next)
}

/// Push a snapshot of the undoable fields
pub fn create_checkpoint(state: &ConversationState, label: &str) -> TransitionResult {
    push_checkpoint(state, label, None)
}

/// Checkpoint taken before the generated app itself is edited
pub fn create_app_checkpoint(
    state: &ConversationState,
    label: &str,
    app_revision: u32,
) -> TransitionResult {
    push_checkpoint(state, label, Some(app_revision))
}

fn push_checkpoint(
    state: &ConversationState,
    label: &str,
    app_revision: Option<u32>,
) -> TransitionResult {
    let mut next = state.clone();
    next.checkpoints.push(Checkpoint {
        label: label.to_string(),
        created_at: Utc::now(),
        snapshot: state.snapshot(),
        app_revision,
    });
    if next.checkpoints.len() > MAX_CHECKPOINTS {
        let excess = next.checkpoints.len() - MAX_CHECKPOINTS;
        next.checkpoints.drain(..excess);
    }
    TransitionResult::new(next)
}

/// Pop the newest checkpoint; with none left this only yields a notice
pub fn undo(state: &ConversationState) -> TransitionResult {
    let mut next = state.clone();
    match next.checkpoints.pop() {
        Some(checkpoint) => {
            next.restore(checkpoint.snapshot);
            next.updated_at = Utc::now();
            TransitionResult::new(next).with_notice(Notice::Restored {
                label: checkpoint.label,
            })
        }
        None => TransitionResult::new(next).with_notice(Notice::NothingToUndo),
    }
}

/// Merge a proposal into the spec, then move on to planning
pub fn select_proposal(
    state: &ConversationState,
    proposal_id: &str,
) -> Result<TransitionResult, TransitionError> {
    if state.phase != Phase::Design {
        return Err(TransitionError::InvalidPhase {
            action: "select a design proposal",
            phase: state.phase,
        });
    }
    let proposal = state
        .proposals
        .iter()
        .find(|p| p.id == proposal_id)
        .ok_or_else(|| TransitionError::UnknownProposal(proposal_id.to_string()))?;

    let mut next = state.clone();
    let spec = next.spec.as_mut().ok_or(TransitionError::MissingSpec)?;
    spec.merge_entities(&proposal.entities);
    if let Some(layout) = &proposal.layout {
        spec.layout = layout.clone();
    }
    spec.merge_workflows(&proposal.workflows);

    let bonus = proposal
        .dimensions()
        .into_iter()
        .fold(ReadinessDelta::default(), |acc, dim| {
            acc.plus(match dim {
                Dimension::Schema => ReadinessDelta::schema(PROPOSAL_BONUS),
                Dimension::Ui => ReadinessDelta::ui(PROPOSAL_BONUS),
                Dimension::Workflow => ReadinessDelta::workflow(PROPOSAL_BONUS),
            })
        });
    next.readiness = next.readiness.apply(bonus);
    next.proposals.clear();
    next.messages.push(Message::system(format!(
        "Applied the \"{}\" design",
        proposal.title
    )));
    next.updated_at = Utc::now();

    // Regenerate the plan so it reflects the merged spec
    TransitionResult::new(next).then(|s| advance_phase(s, Regenerate::Replace))
}

/// Append a user message, or queue it while a build is running
pub fn record_user_message(state: &ConversationState, text: &str) -> TransitionResult {
    let mut next = state.clone();
    next.updated_at = Utc::now();

    if state.phase == Phase::Build {
        next.pending_user_messages.push(Message::user(text));
        let pending = next.pending_user_messages.len();
        return TransitionResult::new(next).with_notice(Notice::MessageQueued { pending });
    }

    next.messages.push(Message::user(text));
    if let Some(session) = next.feedback_session.as_mut() {
        session.turns += 1;
    }
    if state.phase.is_editable() {
        update_readiness(&next, infer_readiness_delta(text))
    } else {
        TransitionResult::new(next)
    }
}

/// Move queued messages into the transcript, preserving arrival order
pub fn flush_pending(state: &ConversationState) -> TransitionResult {
    let mut next = state.clone();
    let pending = std::mem::take(&mut next.pending_user_messages);
    next.messages.extend(pending);
    TransitionResult::new(next)
}

/// Enter the build phase, advancing through any remaining steps first
pub fn begin_build(state: &ConversationState) -> Result<TransitionResult, TransitionError> {
    let mut result = TransitionResult::new(state.clone());
    while result.new_state.phase < Phase::Build {
        result = result.then(|s| advance_phase(s, Regenerate::Keep))?;
    }
    if result.new_state.phase != Phase::Build {
        return Err(TransitionError::InvalidPhase {
            action: "start a build",
            phase: result.new_state.phase,
        });
    }
    Ok(result)
}

/// Back out of a build that failed before producing an app.
///
/// The build's own checkpoint is popped when it is the newest one; any other
/// history is left alone and the conversation drops back to planning.
/// Queued messages are flushed either way.
pub fn abandon_build(state: &ConversationState, checkpoint_label: &str) -> TransitionResult {
    if state.phase != Phase::Build {
        return flush_pending(state);
    }
    let owns_top = state
        .checkpoints
        .last()
        .is_some_and(|c| c.label == checkpoint_label);
    let rolled_back = if owns_top {
        undo(state)
    } else {
        let mut next = state.clone();
        next.phase = Phase::Planning;
        next.updated_at = Utc::now();
        TransitionResult::new(next).with_notice(Notice::PhaseAdvanced {
            from: Phase::Build,
            to: Phase::Planning,
        })
    };
    let notices = rolled_back.notices;
    let mut result = flush_pending(&rolled_back.new_state);
    result.notices = notices;
    result
}

/// Leave the build phase. A cancelled build returns to planning so it can
/// be retried; either way queued messages are flushed.
pub fn finish_build(state: &ConversationState, app_id: &str, cancelled: bool) -> TransitionResult {
    let mut next = flush_pending(state).new_state;
    next.app_id = Some(app_id.to_string());
    next.updated_at = Utc::now();

    if state.phase != Phase::Build {
        return TransitionResult::new(next);
    }

    let to = if cancelled {
        Phase::Planning
    } else {
        next.feedback_session = Some(FeedbackSession {
            app_id: app_id.to_string(),
            started_at: Utc::now(),
            turns: 0,
        });
        Phase::Complete
    };
    next.phase = to;
    TransitionResult::new(next).with_notice(Notice::PhaseAdvanced {
        from: Phase::Build,
        to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::intake::{
        AUDIENCE_QUESTION, FIELDS_QUESTION, VIEWS_QUESTION, WORKFLOW_QUESTION,
    };
    use crate::conversation::state::Role;

    fn started() -> ConversationState {
        transition(
            &ConversationState::new("c1"),
            Event::Start {
                message: "track my coffee shop orders".to_string(),
            },
        )
        .unwrap()
        .new_state
    }

    fn answer(state: &ConversationState, id: &str, value: Answer) -> TransitionResult {
        transition(
            state,
            Event::Answer {
                question_id: id.to_string(),
                answer: value,
            },
        )
        .unwrap()
    }

    fn answered_all() -> ConversationState {
        let mut state = started();
        for (id, value) in [
            (FIELDS_QUESTION, Answer::Multiple(vec!["Paid".to_string()])),
            (VIEWS_QUESTION, Answer::Multiple(vec!["Kanban board".to_string()])),
            (WORKFLOW_QUESTION, Answer::from("Notify customer when ready")),
            (AUDIENCE_QUESTION, Answer::from("My team")),
        ] {
            state = answer(&state, id, value).new_state;
        }
        state
    }

    #[test]
    fn test_start_moves_to_clarification_with_questions() {
        let state = started();
        assert_eq!(state.phase, Phase::Clarification);
        assert!(!state.questions.is_empty());
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.messages.last().unwrap().role, Role::Assistant);
        assert_eq!(state.readiness.schema(), 10);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let err = start(&started(), "again").unwrap_err();
        assert!(matches!(err, TransitionError::InvalidPhase { .. }));
    }

    #[test]
    fn test_answering_everything_reaches_design_with_spec() {
        let state = answered_all();
        assert_eq!(state.phase, Phase::Design);
        let spec = state.spec.as_ref().unwrap();
        let order = spec.entity("Order").unwrap();
        assert!(order.status_field().is_some());
        assert!(!spec.views.is_empty());
        assert_eq!(state.proposals.len(), 3);
    }

    #[test]
    fn test_unknown_question_is_recorded_and_flagged() {
        let state = started();
        let result = answer(&state, "color", Answer::from("blue"));
        assert!(result.unknown_question());
        assert_eq!(result.new_state.answers["color"], Answer::from("blue"));
        assert_eq!(result.new_state.unknown_answers, vec!["color".to_string()]);
        assert_eq!(result.new_state.readiness, state.readiness);
    }

    #[test]
    fn test_reanswer_does_not_double_count() {
        let state = started();
        let once = answer(&state, WORKFLOW_QUESTION, Answer::from(NO)).new_state;
        let twice = answer(&once, WORKFLOW_QUESTION, Answer::from(NO)).new_state;
        assert_eq!(once.readiness, twice.readiness);
    }

    const NO: &str = "Nothing automatic";

    #[test]
    fn test_advance_requires_answers() {
        let err = advance_phase(&started(), Regenerate::Keep).unwrap_err();
        assert_eq!(err, TransitionError::IncompleteAnswers { remaining: 4 });
    }

    #[test]
    fn test_advance_keeps_existing_spec_unless_replaced() {
        let mut state = answered_all();
        state.phase = Phase::Clarification;
        let custom = crate::app_spec::AppSpec::minimal("Custom");
        state.spec = Some(custom.clone());

        let kept = advance_phase(&state, Regenerate::Keep).unwrap().new_state;
        assert_eq!(kept.spec.as_ref().unwrap().name, "Custom");

        let replaced = advance_phase(&state, Regenerate::Replace).unwrap().new_state;
        assert_ne!(replaced.spec.unwrap(), custom);
    }

    #[test]
    fn test_undo_restores_snapshot_only() {
        let state = answered_all();
        let checkpointed = create_checkpoint(&state, "select proposal").new_state;
        let changed = select_proposal(&checkpointed, "rich").unwrap().new_state;
        assert_eq!(changed.phase, Phase::Planning);

        let undone = undo(&changed);
        assert_eq!(
            undone.notices,
            vec![Notice::Restored {
                label: "select proposal".to_string()
            }]
        );
        let undone = undone.new_state;
        assert_eq!(undone.snapshot(), state.snapshot());
        // The transcript is not rewound
        assert_eq!(undone.messages, changed.messages);
        assert!(undone.checkpoints.is_empty());
    }

    #[test]
    fn test_undo_without_checkpoint_is_notice() {
        let state = started();
        let result = undo(&state);
        assert_eq!(result.notices, vec![Notice::NothingToUndo]);
        assert_eq!(result.new_state, state);
    }

    #[test]
    fn test_checkpoint_depth_is_capped() {
        let mut state = started();
        for i in 0..(MAX_CHECKPOINTS + 5) {
            state = create_checkpoint(&state, &format!("cp{i}")).new_state;
        }
        assert_eq!(state.checkpoints.len(), MAX_CHECKPOINTS);
        assert_eq!(state.checkpoints[0].label, "cp5");
    }

    #[test]
    fn test_select_proposal_bonus_and_clear() {
        let state = answered_all();
        let before = state.readiness;
        let after = select_proposal(&state, "standard").unwrap().new_state;
        assert!(after.proposals.is_empty());
        assert_eq!(after.readiness.schema(), (before.schema() + 20).min(100));
        assert!(after.plan.is_some());
        let order = after.spec.as_ref().unwrap().entity("Order").unwrap();
        assert!(order.field("notes").is_some());
    }

    #[test]
    fn test_select_unknown_proposal() {
        let err = select_proposal(&answered_all(), "nope").unwrap_err();
        assert_eq!(err, TransitionError::UnknownProposal("nope".to_string()));
    }

    #[test]
    fn test_messages_during_build_are_queued_then_flushed() {
        let state = begin_build(&answered_all()).unwrap().new_state;
        assert_eq!(state.phase, Phase::Build);
        let before = state.messages.len();

        let first = record_user_message(&state, "make it blue");
        assert_eq!(first.notices, vec![Notice::MessageQueued { pending: 1 }]);
        let second = record_user_message(&first.new_state, "and bigger").new_state;
        assert_eq!(second.messages.len(), before);

        let done = finish_build(&second, "app-1", false).new_state;
        assert_eq!(done.phase, Phase::Complete);
        assert!(done.pending_user_messages.is_empty());
        let tail: Vec<_> = done.messages[before..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["make it blue", "and bigger"]);
        assert!(done.feedback_session.is_some());
    }

    #[test]
    fn test_cancelled_build_returns_to_planning() {
        let state = begin_build(&answered_all()).unwrap().new_state;
        let result = finish_build(&state, "app-1", true);
        assert_eq!(result.new_state.phase, Phase::Planning);
        assert_eq!(result.new_state.app_id.as_deref(), Some("app-1"));
    }

    #[test]
    fn test_abandon_build_pops_its_own_checkpoint() {
        let designed = answered_all();
        let building = begin_build(&create_checkpoint(&designed, "build").new_state)
            .unwrap()
            .new_state;
        let queued = record_user_message(&building, "make it blue").new_state;

        let result = abandon_build(&queued, "build");
        assert_eq!(
            result.notices,
            vec![Notice::Restored {
                label: "build".to_string()
            }]
        );
        let state = result.new_state;
        assert_eq!(state.snapshot(), designed.snapshot());
        assert!(state.checkpoints.is_empty());
        assert!(state.pending_user_messages.is_empty());
        assert_eq!(state.messages.last().unwrap().content, "make it blue");
    }

    #[test]
    fn test_abandon_build_keeps_unrelated_history() {
        let designed = create_checkpoint(&answered_all(), "select proposal").new_state;
        let planned = select_proposal(&designed, "rich").unwrap().new_state;
        // Already building with no build checkpoint on top, as after a restart
        let building = begin_build(&planned).unwrap().new_state;
        assert_eq!(building.phase, Phase::Build);

        let result = abandon_build(&building, "build");
        assert_eq!(
            result.notices,
            vec![Notice::PhaseAdvanced {
                from: Phase::Build,
                to: Phase::Planning
            }]
        );
        assert_eq!(result.new_state.phase, Phase::Planning);
        assert_eq!(result.new_state.plan, planned.plan);
        let labels: Vec<_> = result.new_state.checkpoints.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["select proposal"]);
    }

    #[test]
    fn test_abandon_build_with_empty_history_leaves_build() {
        let building = begin_build(&answered_all()).unwrap().new_state;
        let state = abandon_build(&building, "build").new_state;
        assert_eq!(state.phase, Phase::Planning);
    }

    #[test]
    fn test_app_checkpoint_carries_revision() {
        let state = create_app_checkpoint(&answered_all(), "agent edit", 3).new_state;
        assert_eq!(state.checkpoints.last().unwrap().app_revision, Some(3));
        let plain = create_checkpoint(&state, "chat").new_state;
        assert_eq!(plain.checkpoints.last().unwrap().app_revision, None);
    }

    #[test]
    fn test_zero_readiness_delta_changes_nothing() {
        let state = started();
        let result = update_readiness(&state, ReadinessDelta::default());
        assert_eq!(result.new_state, state);
    }

    #[test]
    fn test_assistant_message_metadata() {
        let state = transition(
            &started(),
            Event::AssistantMessage {
                text: "Done.".to_string(),
                metadata: Some(serde_json::json!({ "cancelled": false })),
            },
        )
        .unwrap()
        .new_state;
        let last = state.messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.metadata, Some(serde_json::json!({ "cancelled": false })));
    }

    #[test]
    fn test_begin_build_from_clarification_needs_answers() {
        let err = begin_build(&started()).unwrap_err();
        assert!(matches!(err, TransitionError::IncompleteAnswers { .. }));
    }

    #[test]
    fn test_complete_is_terminal() {
        let state = begin_build(&answered_all()).unwrap().new_state;
        let done = finish_build(&state, "app-1", false).new_state;
        assert!(advance_phase(&done, Regenerate::Keep).is_err());
        assert!(record_answer(&done, FIELDS_QUESTION, Answer::from("Notes")).is_err());
    }
}
