//! Project-level operations: dependencies and the turn summary

use super::{Effect, Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct AddDependencyTool;

/// `packages` may be a whitespace-separated string or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Packages {
    Joined(String),
    List(Vec<String>),
}

impl Packages {
    fn names(self) -> Vec<String> {
        let raw = match self {
            Packages::Joined(s) => s.split_whitespace().map(str::to_string).collect(),
            Packages::List(list) => list,
        };
        raw.into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct DependencyInput {
    packages: Packages,
}

fn is_valid_package(name: &str) -> bool {
    let bare = name.strip_prefix('@').unwrap_or(name);
    !bare.is_empty()
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@' | '^' | '~'))
}

#[async_trait]
impl Tool for AddDependencyTool {
    fn name(&self) -> &'static str {
        "add_dependency"
    }

    fn description(&self) -> String {
        "Add npm packages to the project.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["packages"],
            "properties": {
                "packages": {
                    "description": "Package names, space separated or as a list",
                    "oneOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ]
                }
            }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    fn preview(&self, input: &Value) -> String {
        let packages = match input.get("packages") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => "?".to_string(),
        };
        format!("Install {packages}")
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: DependencyInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let names = input.packages.names();
        if names.is_empty() {
            return ToolOutput::error("No packages given");
        }
        if let Some(bad) = names.iter().find(|n| !is_valid_package(n)) {
            return ToolOutput::error(format!("Invalid package name: {bad}"));
        }

        let mut output = ToolOutput::success(String::new());
        let mut added = Vec::new();
        for name in names {
            if ctx.workspace.dependencies.contains(&name) {
                continue;
            }
            ctx.workspace.dependencies.push(name.clone());
            added.push(name.clone());
            output = output.with_effect(Effect::DependencyAdded { package: name });
        }

        tracing::debug!(conv_id = %ctx.conversation_id, added = ?added, "Dependencies added");
        output.output = if added.is_empty() {
            "Already installed".to_string()
        } else {
            format!("Added {}", added.join(", "))
        };
        output
    }
}

pub struct SetSummaryTool;

#[derive(Debug, Deserialize)]
struct SummaryInput {
    text: String,
}

#[async_trait]
impl Tool for SetSummaryTool {
    fn name(&self) -> &'static str {
        "set_summary"
    }

    fn description(&self) -> String {
        "Set a short human-readable summary of what this turn changed.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["text"],
            "properties": { "text": { "type": "string" } }
        })
    }

    fn mutates(&self) -> bool {
        true
    }

    fn preview(&self, _input: &Value) -> String {
        "Update the change summary".to_string()
    }

    async fn run(&self, input: Value, ctx: ToolContext<'_>) -> ToolOutput {
        let input: SummaryInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        ctx.workspace.summary = Some(input.text.trim().to_string());
        ToolOutput::success("Summary set").with_effect(Effect::SummarySet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::Workspace;

    async fn run(tool: &dyn Tool, input: Value, workspace: &mut Workspace) -> ToolOutput {
        tool.run(
            input,
            ToolContext {
                conversation_id: "test-conv",
                workspace,
            },
        )
        .await
    }

    #[tokio::test]
    async fn test_add_dependency_skips_duplicates() {
        let mut ws = Workspace {
            dependencies: vec!["react".to_string()],
            ..Workspace::default()
        };
        let out = run(
            &AddDependencyTool,
            json!({"packages": "react dayjs @tanstack/react-query"}),
            &mut ws,
        )
        .await;
        assert!(out.success);
        assert_eq!(out.effects.len(), 2);
        assert_eq!(ws.dependencies, vec!["react", "dayjs", "@tanstack/react-query"]);
    }

    #[tokio::test]
    async fn test_add_dependency_rejects_shell_text() {
        let mut ws = Workspace::default();
        let out = run(&AddDependencyTool, json!({"packages": ["lodash;rm"]}), &mut ws).await;
        assert!(!out.success);
        assert!(ws.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_set_summary() {
        let mut ws = Workspace::default();
        let out = run(&SetSummaryTool, json!({"text": " Added dark mode "}), &mut ws).await;
        assert_eq!(out.effects, vec![Effect::SummarySet]);
        assert_eq!(ws.summary.as_deref(), Some("Added dark mode"));
    }
}
