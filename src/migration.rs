//! v1 → v2 record migration
//!
//! Records without a `schemaVersion` field were written by v1. The
//! `migrate_*` functions are pure and total: every v2 field missing from a
//! v1 record gets an explicit default.

use crate::app_spec::{decode_spec, AppSpec};
use crate::conversation::{
    Answer, ConversationState, FeedbackSession, Message, Phase, Question, QuestionType, Role,
    SCHEMA_VERSION,
};
use crate::generation::{
    component_path, BuildStatus, GeneratedAppRecord, LogEntry, APP_SCHEMA_VERSION, PAGE,
};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageV1 {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionV1 {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multiple: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationV1 {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<MessageV1>,
    /// `gathering`, `designing`, `building` or `done`
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub questions: Vec<QuestionV1>,
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
    #[serde(default)]
    pub spec: Option<Value>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecordV1 {
    pub id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The whole app as one source file
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub spec: Option<Value>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn migrate_phase(old: &ConversationV1) -> Phase {
    match old.phase.as_str() {
        "gathering" if old.questions.is_empty() && old.messages.is_empty() => Phase::Intake,
        "gathering" => Phase::Clarification,
        "designing" => Phase::Design,
        // A v1 build cannot be resumed; without an app it goes back to planning
        "building" | "done" if old.app_id.is_some() => Phase::Complete,
        "building" | "done" => Phase::Planning,
        _ => Phase::Intake,
    }
}

fn migrate_role(role: &str) -> Role {
    match role {
        "user" => Role::User,
        "system" => Role::System,
        _ => Role::Assistant,
    }
}

fn migrate_answer(value: Value) -> Answer {
    match value {
        Value::String(s) => Answer::Single(s),
        Value::Array(items) => Answer::Multiple(
            items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
        ),
        other => Answer::Single(other.to_string()),
    }
}

pub fn migrate_conversation(old: ConversationV1) -> ConversationState {
    let phase = migrate_phase(&old);
    let now = Utc::now();
    let mut state = ConversationState::new(old.id);
    state.phase = phase;
    state.created_at = old.created_at.unwrap_or(now);
    state.updated_at = old.updated_at.unwrap_or(state.created_at);
    state.messages = old
        .messages
        .into_iter()
        .map(|m| {
            let mut message = Message::new(migrate_role(&m.role), m.content);
            message.timestamp = m.timestamp.unwrap_or(state.created_at);
            message
        })
        .collect();
    state.answers = old
        .answers
        .into_iter()
        .map(|(id, value)| (id, migrate_answer(value)))
        .collect();
    state.questions = old
        .questions
        .into_iter()
        .map(|q| Question {
            answered: state.answers.contains_key(&q.id),
            id: q.id,
            text: q.text,
            question_type: if q.multiple {
                QuestionType::Multiple
            } else {
                QuestionType::Single
            },
            options: q.options,
        })
        .collect();
    state.unknown_answers = state
        .answers
        .keys()
        .filter(|id| state.question(id).is_none())
        .cloned()
        .collect();
    state.spec = old.spec.as_ref().filter(|v| !v.is_null()).map(decode_spec);
    state.app_id = old.app_id;
    if let Some(app_id) = state.app_id.clone().filter(|_| phase == Phase::Complete) {
        state.feedback_session = Some(FeedbackSession {
            app_id,
            started_at: state.updated_at,
            turns: 0,
        });
    }
    state
}

fn migrate_status(old: &AppRecordV1) -> BuildStatus {
    match old.status.as_str() {
        "error" | "failed" => BuildStatus::Failed,
        _ if old.code.trim().is_empty() => BuildStatus::Failed,
        "completed" | "complete" | "success" | "done" | "" => BuildStatus::Completed,
        // Interrupted v1 generations never finish
        _ => BuildStatus::Failed,
    }
}

pub fn migrate_app(old: AppRecordV1) -> GeneratedAppRecord {
    let status = migrate_status(&old);
    let spec = old
        .spec
        .as_ref()
        .filter(|v| !v.is_null())
        .map_or_else(|| AppSpec::minimal(old.name.clone()), decode_spec);
    let mut record = GeneratedAppRecord::new(old.conversation_id, spec);
    record.id = old.id;
    if !old.name.is_empty() {
        record.name = old.name;
    }
    if !old.description.is_empty() {
        record.description = old.description;
    }
    if !old.code.is_empty() {
        record.files.insert(component_path(PAGE), old.code);
    }
    record.build_status = status;
    let created = old.created_at.unwrap_or(record.created_at);
    record.created_at = created;
    record.generation_log.push(LogEntry {
        timestamp: Utc::now(),
        message: format!("Migrated from schema v1 (status '{}')", old.status),
    });
    record
}

fn schema_version(raw: &Value) -> Option<u64> {
    raw.get("schemaVersion").and_then(Value::as_u64)
}

fn unsupported(version: u64) -> serde_json::Error {
    serde_json::Error::custom(format!("unsupported schemaVersion {version}"))
}

/// Decode a stored conversation of any known version
pub fn decode_conversation(raw: Value) -> Result<ConversationState, serde_json::Error> {
    match schema_version(&raw) {
        None => Ok(migrate_conversation(serde_json::from_value(raw)?)),
        Some(v) if v == u64::from(SCHEMA_VERSION) => serde_json::from_value(raw),
        Some(v) => Err(unsupported(v)),
    }
}

/// Decode a stored app record of any known version
pub fn decode_app(raw: Value) -> Result<GeneratedAppRecord, serde_json::Error> {
    match schema_version(&raw) {
        None => Ok(migrate_app(serde_json::from_value(raw)?)),
        Some(v) if v == u64::from(APP_SCHEMA_VERSION) => serde_json::from_value(raw),
        Some(v) => Err(unsupported(v)),
    }
}
