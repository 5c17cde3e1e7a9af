//! Record store adapter
//!
//! The core persists two record kinds as opaque JSON keyed by id. Loads go
//! through the migration decoders, so records written by older versions are
//! upgraded transparently.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::conversation::ConversationState;
use crate::error::{ForgeError, ForgeResult};
use crate::generation::GeneratedAppRecord;
use crate::migration::{decode_app, decode_conversation};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Conversation,
    App,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Conversation => "conversation",
            RecordKind::App => "app",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage for records; last write wins
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Value>>;

    async fn put(&self, kind: RecordKind, id: &str, record: &Value) -> StoreResult<()>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn get(&self, kind: RecordKind, id: &str) -> StoreResult<Option<Value>> {
        (**self).get(kind, id).await
    }

    async fn put(&self, kind: RecordKind, id: &str, record: &Value) -> StoreResult<()> {
        (**self).put(kind, id, record).await
    }
}

pub async fn load_conversation(
    store: &dyn RecordStore,
    id: &str,
) -> ForgeResult<ConversationState> {
    let raw = store
        .get(RecordKind::Conversation, id)
        .await?
        .ok_or_else(|| ForgeError::conversation_not_found(id))?;
    Ok(decode_conversation(raw).map_err(StoreError::from)?)
}

pub async fn save_conversation(
    store: &dyn RecordStore,
    state: &ConversationState,
) -> ForgeResult<()> {
    let value = serde_json::to_value(state).map_err(StoreError::from)?;
    store.put(RecordKind::Conversation, &state.id, &value).await?;
    Ok(())
}

pub async fn load_app(store: &dyn RecordStore, id: &str) -> ForgeResult<GeneratedAppRecord> {
    let raw = store
        .get(RecordKind::App, id)
        .await?
        .ok_or_else(|| ForgeError::app_not_found(id))?;
    Ok(decode_app(raw).map_err(StoreError::from)?)
}

pub async fn save_app(store: &dyn RecordStore, record: &GeneratedAppRecord) -> ForgeResult<()> {
    let value = serde_json::to_value(record).map_err(StoreError::from)?;
    store.put(RecordKind::App, &record.id, &value).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_spec::AppSpec;
    use crate::runtime::testing::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_conversation_round_trip_and_not_found() {
        let store = MemoryStore::default();
        let state = ConversationState::new("c1");
        save_conversation(&store, &state).await.unwrap();
        let loaded = load_conversation(&store, "c1").await.unwrap();
        assert_eq!(loaded.id, "c1");

        let missing = load_conversation(&store, "nope").await.unwrap_err();
        assert_eq!(missing.code(), "not_found");
    }

    #[tokio::test]
    async fn test_v1_records_are_upgraded_on_load() {
        let store = MemoryStore::default();
        store
            .put(
                RecordKind::App,
                "a1",
                &json!({
                    "id": "a1",
                    "conversationId": "c1",
                    "name": "Old",
                    "code": "export default 1;",
                    "status": "completed"
                }),
            )
            .await
            .unwrap();
        let app = load_app(&store, "a1").await.unwrap();
        assert_eq!(app.files["src/App.tsx"], "export default 1;");
        assert_eq!(app.schema_version, crate::generation::APP_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_storage_error() {
        let store = MemoryStore::default();
        store
            .put(RecordKind::Conversation, "bad", &json!({"schemaVersion": 2, "id": 7}))
            .await
            .unwrap();
        let err = load_conversation(&store, "bad").await.unwrap_err();
        assert_eq!(err.code(), "storage");
    }

    #[tokio::test]
    async fn test_save_app() {
        let store = MemoryStore::default();
        let record = GeneratedAppRecord::new("c1", AppSpec::minimal("A"));
        save_app(&store, &record).await.unwrap();
        assert_eq!(load_app(&store, &record.id).await.unwrap(), record);
    }
}
