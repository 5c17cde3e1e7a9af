//! Conversation record types

use super::intake::IntentAnalysis;
use super::readiness::Readiness;
use crate::app_spec::{AppSpec, Entity, Layout, Plan, Workflow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const SCHEMA_VERSION: u32 = 2;

/// Oldest checkpoints are dropped past this depth
pub const MAX_CHECKPOINTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Intake,
    Clarification,
    Design,
    Planning,
    Build,
    Complete,
}

impl Phase {
    /// The single forward edge out of this phase
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Intake => Some(Phase::Clarification),
            Phase::Clarification => Some(Phase::Design),
            Phase::Design => Some(Phase::Planning),
            Phase::Planning => Some(Phase::Build),
            Phase::Build => Some(Phase::Complete),
            Phase::Complete => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::Clarification => "clarification",
            Phase::Design => "design",
            Phase::Planning => "planning",
            Phase::Build => "build",
            Phase::Complete => "complete",
        }
    }

    /// Answers and design changes are accepted before the build starts
    pub fn is_editable(self) -> bool {
        self < Phase::Build
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multiple,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<String>,
    #[serde(default)]
    pub answered: bool,
}

/// A single choice or a set of choices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl Answer {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Answer::Single(value) => vec![value.as_str()],
            Answer::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.values().into_iter().next()
    }
}

impl From<&str> for Answer {
    fn from(value: &str) -> Self {
        Answer::Single(value.to_string())
    }
}

/// Readiness dimension a proposal contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Schema,
    Ui,
    Workflow,
}

/// Alternative design the user can pick in the design phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignProposal {
    pub id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

impl DesignProposal {
    /// Dimensions this proposal's partial spec would change
    pub fn dimensions(&self) -> Vec<Dimension> {
        let mut dims = Vec::new();
        if !self.entities.is_empty() {
            dims.push(Dimension::Schema);
        }
        if self.layout.is_some() {
            dims.push(Dimension::Ui);
        }
        if !self.workflows.is_empty() {
            dims.push(Dimension::Workflow);
        }
        dims
    }
}

/// Fields restored by undo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub spec: Option<AppSpec>,
    pub plan: Option<Plan>,
    pub phase: Phase,
    pub readiness: Readiness,
    #[serde(default)]
    pub proposals: Vec<DesignProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub snapshot: Snapshot,
    /// App revision to bring back when this checkpoint is undone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_revision: Option<u32>,
}

/// Post-build iteration on a generated app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSession {
    pub app_id: String,
    pub started_at: DateTime<Utc>,
    pub turns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub schema_version: u32,
    pub id: String,
    pub messages: Vec<Message>,
    pub phase: Phase,
    pub answers: BTreeMap<String, Answer>,
    pub questions: Vec<Question>,
    /// Answers recorded against ids not in `questions`
    #[serde(default)]
    pub unknown_answers: Vec<String>,
    #[serde(default)]
    pub intent: Option<IntentAnalysis>,
    #[serde(default)]
    pub spec: Option<AppSpec>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub proposals: Vec<DesignProposal>,
    #[serde(default)]
    pub feedback_session: Option<FeedbackSession>,
    /// User messages that arrived mid-build, in arrival order
    #[serde(default)]
    pub pending_user_messages: Vec<Message>,
    #[serde(default)]
    pub app_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            id: id.into(),
            messages: Vec::new(),
            phase: Phase::Intake,
            answers: BTreeMap::new(),
            questions: Vec::new(),
            unknown_answers: Vec::new(),
            intent: None,
            spec: None,
            plan: None,
            readiness: Readiness::default(),
            checkpoints: Vec::new(),
            proposals: Vec::new(),
            feedback_session: None,
            pending_user_messages: Vec::new(),
            app_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn unanswered(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(|q| !q.answered)
    }

    pub fn all_answered(&self) -> bool {
        !self.questions.is_empty() && self.unanswered().next().is_none()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            spec: self.spec.clone(),
            plan: self.plan.clone(),
            phase: self.phase,
            readiness: self.readiness,
            proposals: self.proposals.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.spec = snapshot.spec;
        self.plan = snapshot.plan;
        self.phase = snapshot.phase;
        self.readiness = snapshot.readiness;
        self.proposals = snapshot.proposals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_graph_is_linear() {
        let mut phase = Phase::Intake;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(phase, Phase::Complete);
    }

    #[test]
    fn test_answer_wire_shape() {
        let single: Answer = serde_json::from_value(json!("Table")).unwrap();
        assert_eq!(single, Answer::Single("Table".to_string()));
        let multiple: Answer = serde_json::from_value(json!(["Table", "Calendar"])).unwrap();
        assert_eq!(multiple.values(), vec!["Table", "Calendar"]);
    }

    #[test]
    fn test_question_type_field_name() {
        let q = Question {
            id: "views".to_string(),
            text: "Which views?".to_string(),
            question_type: QuestionType::Multiple,
            options: vec!["Table".to_string()],
            answered: false,
        };
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(value["type"], "multiple");
    }

    #[test]
    fn test_all_answered_requires_questions() {
        let state = ConversationState::new("c1");
        assert!(!state.all_answered());
    }
}
