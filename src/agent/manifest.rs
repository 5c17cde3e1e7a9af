//! Per-turn record of what an agent turn changed

use super::tools::{Effect, ToolOutput, Workspace};
use serde::Serialize;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStat {
    pub added: usize,
    pub removed: usize,
}

impl DiffStat {
    pub fn between(old: &str, new: &str) -> Self {
        let mut stat = Self::default();
        for change in TextDiff::from_lines(old, new).iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => stat.added += 1,
                ChangeTag::Delete => stat.removed += 1,
                ChangeTag::Equal => {}
            }
        }
        stat
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenamedFile {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChangeManifest {
    pub modified_files: Vec<String>,
    pub created_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub renamed_files: Vec<RenamedFile>,
    pub added_dependencies: Vec<String>,
    pub summary: Option<String>,
    /// Line diff per modified path, summed over the turn
    pub diff_stats: BTreeMap<String, DiffStat>,
    pub tool_executions: Vec<ToolExecution>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

impl AgentChangeManifest {
    /// Record one executed (or rejected) directive
    pub fn record(&mut self, tool: &str, args: Value, output: &ToolOutput, workspace: &Workspace) {
        for effect in &output.effects {
            self.classify(effect, workspace);
        }
        self.tool_executions.push(ToolExecution {
            tool: tool.to_string(),
            args,
            result: output.output.clone(),
            success: output.success,
        });
    }

    fn classify(&mut self, effect: &Effect, workspace: &Workspace) {
        match effect {
            Effect::FileWritten {
                path,
                previous: None,
            } => push_unique(&mut self.created_files, path),
            Effect::FileWritten {
                path,
                previous: Some(old),
            } => {
                push_unique(&mut self.modified_files, path);
                let new = workspace.files.get(path).map_or("", String::as_str);
                let step = DiffStat::between(old, new);
                let total = self.diff_stats.entry(path.clone()).or_default();
                total.added += step.added;
                total.removed += step.removed;
            }
            Effect::FileDeleted { path } => push_unique(&mut self.deleted_files, path),
            Effect::FileRenamed { from, to } => self.renamed_files.push(RenamedFile {
                from: from.clone(),
                to: to.clone(),
            }),
            Effect::DependencyAdded { package } => {
                push_unique(&mut self.added_dependencies, package);
            }
            Effect::SummarySet => self.summary.clone_from(&workspace.summary),
        }
    }

    /// True when nothing in the workspace changed
    pub fn is_empty(&self) -> bool {
        self.modified_files.is_empty()
            && self.created_files.is_empty()
            && self.deleted_files.is_empty()
            && self.renamed_files.is_empty()
            && self.added_dependencies.is_empty()
            && self.summary.is_none()
    }
}
