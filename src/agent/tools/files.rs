//! File operations on the workspace

use super::{validate_path, Effect, Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

fn path_of(input: &Value, key: &str) -> String {
    input
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteInput {
    path: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> String {
        "Create or replace a file with the given content.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": { "type": "string", "description": "Project-relative path" },
                "content": { "type": "string", "description": "Full file content" }
            }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    fn preview(&self, input: &Value) -> String {
        format!("Write {}", path_of(input, "path"))
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: WriteInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let path = match validate_path(&input.path) {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutput::error(e),
        };

        let bytes = input.content.len();
        let previous = ctx.workspace.files.insert(path.clone(), input.content);
        let verb = if previous.is_some() { "Updated" } else { "Created" };
        ToolOutput::success(format!("{verb} {path} ({bytes} bytes)"))
            .with_effect(Effect::FileWritten { path, previous })
    }
}

pub struct DeleteFileTool;

#[derive(Debug, Deserialize)]
struct PathInput {
    path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> String {
        "Delete a file from the project.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": { "path": { "type": "string" } }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    fn preview(&self, input: &Value) -> String {
        format!("Delete {}", path_of(input, "path"))
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: PathInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let path = input.path.trim().to_string();
        if ctx.workspace.files.remove(&path).is_none() {
            return ToolOutput::error(format!("No such file: {path}"));
        }
        ToolOutput::success(format!("Deleted {path}")).with_effect(Effect::FileDeleted { path })
    }
}

pub struct RenameFileTool;

#[derive(Debug, Deserialize)]
struct RenameInput {
    from: String,
    to: String,
}

#[async_trait]
impl Tool for RenameFileTool {
    fn name(&self) -> &'static str {
        "rename_file"
    }

    fn description(&self) -> String {
        "Move a file to a new path. Fails if the target already exists.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["from", "to"],
            "properties": {
                "from": { "type": "string" },
                "to": { "type": "string" }
            }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    fn preview(&self, input: &Value) -> String {
        format!("Rename {} to {}", path_of(input, "from"), path_of(input, "to"))
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: RenameInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let from = input.from.trim().to_string();
        let to = match validate_path(&input.to) {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutput::error(e),
        };
        if ctx.workspace.files.contains_key(&to) {
            return ToolOutput::error(format!("Target already exists: {to}"));
        }
        let Some(content) = ctx.workspace.files.remove(&from) else {
            return ToolOutput::error(format!("No such file: {from}"));
        };
        ctx.workspace.files.insert(to.clone(), content);
        ToolOutput::success(format!("Renamed {from} to {to}"))
            .with_effect(Effect::FileRenamed { from, to })
    }
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> String {
        "Return the current content of a file.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": { "path": { "type": "string" } }
        })
    }

    fn mutates(&self) -> bool {
        false
    }

    fn preview(&self, input: &Value) -> String {
        format!("Read {}", path_of(input, "path"))
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: PathInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        match ctx.workspace.files.get(input.path.trim()) {
            Some(content) => ToolOutput::success(content.clone()),
            None => ToolOutput::error(format!("No such file: {}", input.path)),
        }
    }
}
