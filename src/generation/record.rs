//! Persisted app record produced by a build

use super::chunk::{Artifact, PAGE, TYPES};
use crate::app_spec::AppSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const APP_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    Generating,
    Completed,
    Failed,
    /// Stopped by the user; files hold whatever had been produced
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Source as it stood at one revision, kept so agent edits can be undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRevision {
    pub revision: u32,
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

const MAX_REVISIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAppRecord {
    pub schema_version: u32,
    pub id: String,
    pub conversation_id: String,
    pub name: String,
    pub description: String,
    pub spec: AppSpec,
    /// Source text keyed by project-relative path
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub generation_log: Vec<LogEntry>,
    pub build_status: BuildStatus,
    #[serde(default)]
    pub quality_score: Option<u8>,
    /// Bumped on every regeneration or applied agent turn
    #[serde(default)]
    pub revision: u32,
    /// Oldest first, at most `MAX_REVISIONS`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AppRevision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedAppRecord {
    pub fn new(conversation_id: impl Into<String>, spec: AppSpec) -> Self {
        let now = Utc::now();
        Self {
            schema_version: APP_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            spec,
            files: BTreeMap::new(),
            dependencies: vec!["react".to_string(), "react-dom".to_string()],
            summary: None,
            generation_log: Vec::new(),
            build_status: BuildStatus::Generating,
            quality_score: None,
            revision: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.generation_log.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
        self.updated_at = Utc::now();
    }

    /// Replace the generated source with a new snapshot
    pub fn apply_artifact(&mut self, artifact: &Artifact) {
        self.files = artifact
            .iter()
            .map(|(component, text)| (component_path(component), text.clone()))
            .collect();
        self.updated_at = Utc::now();
    }

    /// Save the current source into the history before it is overwritten
    pub fn remember_revision(&mut self) {
        self.history.push(AppRevision {
            revision: self.revision,
            files: self.files.clone(),
            dependencies: self.dependencies.clone(),
            summary: self.summary.clone(),
        });
        if self.history.len() > MAX_REVISIONS {
            let excess = self.history.len() - MAX_REVISIONS;
            self.history.drain(..excess);
        }
    }

    /// Bring back the source of `revision`.
    ///
    /// The restore is itself a new revision; history newer than the restored
    /// one is discarded. Returns false when that revision is no longer kept.
    pub fn restore_revision(&mut self, revision: u32) -> bool {
        let Some(pos) = self.history.iter().position(|r| r.revision == revision) else {
            return false;
        };
        let restored = self.history.swap_remove(pos);
        self.history.truncate(pos);
        self.files = restored.files;
        self.dependencies = restored.dependencies;
        self.summary = restored.summary;
        self.revision += 1;
        self.log(format!("Restored the source of revision {revision}"));
        true
    }
}

/// Project path for a logical component
pub fn component_path(component: &str) -> String {
    match component {
        PAGE => "src/App.tsx".to_string(),
        TYPES => "src/types.ts".to_string(),
        other if other.contains('/') => other.to_string(),
        other => format!("src/{other}.tsx"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(BuildStatus::Cancelled).unwrap(),
            serde_json::json!("CANCELLED")
        );
    }

    #[test]
    fn test_apply_artifact_maps_paths() {
        let mut record = GeneratedAppRecord::new("c1", AppSpec::minimal("A"));
        let mut artifact = Artifact::new();
        artifact.insert(PAGE.to_string(), "page".to_string());
        artifact.insert(TYPES.to_string(), "types".to_string());
        artifact.insert("styles".to_string(), "css".to_string());
        record.apply_artifact(&artifact);

        assert_eq!(record.files["src/App.tsx"], "page");
        assert_eq!(record.files["src/types.ts"], "types");
        assert_eq!(record.files["src/styles.tsx"], "css");
    }

    #[test]
    fn test_restore_revision_discards_newer_history() {
        let mut record = GeneratedAppRecord::new("c1", AppSpec::minimal("A"));
        record.files.insert("src/App.tsx".to_string(), "v0".to_string());
        for text in ["v1", "v2"] {
            record.remember_revision();
            record.files.insert("src/App.tsx".to_string(), text.to_string());
            record.revision += 1;
        }
        assert_eq!(record.history.len(), 2);

        assert!(record.restore_revision(1));
        assert_eq!(record.files["src/App.tsx"], "v1");
        assert_eq!(record.revision, 3);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].revision, 0);

        assert!(!record.restore_revision(2));
        assert!(record.restore_revision(0));
        assert_eq!(record.files["src/App.tsx"], "v0");
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_history_is_capped() {
        let mut record = GeneratedAppRecord::new("c1", AppSpec::minimal("A"));
        for _ in 0..(MAX_REVISIONS + 3) {
            record.remember_revision();
            record.revision += 1;
        }
        assert_eq!(record.history.len(), MAX_REVISIONS);
        assert_eq!(record.history[0].revision, 3);
    }
}
