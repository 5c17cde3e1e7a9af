//! Operations a directive can resolve to
//!
//! Tools are stateless; everything they touch arrives through
//! [`ToolContext`]. Each run reports the effects it had so the executor can
//! classify them without diffing the whole workspace.

mod files;
mod project;

pub use files::{DeleteFileTool, ReadFileTool, RenameFileTool, WriteFileTool};
pub use project::{AddDependencyTool, SetSummaryTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Working set an agent turn operates on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub files: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
    pub summary: Option<String>,
}

/// Observable change made by one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// `previous` is `None` when the path did not exist before the write
    FileWritten {
        path: String,
        previous: Option<String>,
    },
    FileDeleted {
        path: String,
    },
    FileRenamed {
        from: String,
        to: String,
    },
    DependencyAdded {
        package: String,
    },
    SummarySet,
}

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    pub effects: Vec<Effect>,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            effects: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            effects: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Per-invocation context
pub struct ToolContext<'a> {
    pub conversation_id: &'a str,
    pub workspace: &'a mut Workspace,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Whether a run changes the workspace
    fn mutates(&self) -> bool;

    /// One-line human-readable summary of an invocation, used for consent
    fn preview(&self, input: &Value) -> String;

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput;
}

/// Fixed set of operations directives may resolve to
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ToolRegistry {
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Arc::new(WriteFileTool),
                Arc::new(DeleteFileTool),
                Arc::new(RenameFileTool),
                Arc::new(ReadFileTool),
                Arc::new(AddDependencyTool),
                Arc::new(SetSummaryTool),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

/// Project-relative path check shared by the file tools
pub(crate) fn validate_path(path: &str) -> Result<&str, String> {
    let path = path.trim();
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(format!("path must be project-relative: {path}"));
    }
    if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(format!("invalid path: {path}"));
    }
    Ok(path)
}
