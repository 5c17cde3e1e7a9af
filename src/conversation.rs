//! Conversation state machine
//!
//! Discrete phase graph `intake -> clarification -> design -> planning ->
//! build -> complete` driven by pure transitions. Readiness is tracked
//! alongside but never decides the phase.

mod intake;
mod readiness;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use intake::{analyze_intent, synthesize_spec};
pub use readiness::Readiness;
pub use state::{
    Answer, ConversationState, DesignProposal, FeedbackSession, Message, Phase, Question,
    QuestionType, Role, SCHEMA_VERSION,
};
pub use transition::{
    abandon_build, create_app_checkpoint, transition, Event, Notice, TransitionError,
    TransitionResult,
};
