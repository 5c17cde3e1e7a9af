//! Tool-calling agent executor
//!
//! Model output in agent mode is prose with embedded `<forge-*>` directive
//! tags. The executor parses them (incrementally when streamed), resolves
//! each to a registry tool, gates state-mutating ones on mode and consent,
//! and classifies the effects into an [`AgentChangeManifest`].

mod consent;
mod directive;
mod executor;
mod manifest;
mod partial_json;
mod tools;

pub use consent::{ConsentBroker, CONSENT_PHASE};
pub use directive::{Directive, DirectiveError, DirectiveParser, ParseEvent};
pub use executor::{AgentExecutor, AgentTurn, ChangeApplier, DirectiveFailure, AGENT_PHASE};
pub use manifest::{AgentChangeManifest, DiffStat, RenamedFile, ToolExecution};
pub use partial_json::parse_partial;
pub use tools::{Effect, Tool, ToolContext, ToolDefinition, ToolOutput, ToolRegistry, Workspace};

use serde::{Deserialize, Serialize};

/// Whether directives may change state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    ReadWrite,
    /// Mutating directives are answered with a rejection instead of running
    ReadOnly,
}

/// Directive syntax reference for the agent-mode system prompt
pub fn directive_guide(registry: &ToolRegistry) -> String {
    let mut guide = String::from(
        "Change the app by embedding directives in your reply:\n\
         <forge-write path=\"src/App.tsx\">full file content</forge-write>\n\
         <forge-delete path=\"src/Old.tsx\"/>\n\
         <forge-rename from=\"src/A.tsx\" to=\"src/B.tsx\"/>\n\
         <forge-add-dependency packages=\"dayjs zod\"/>\n\
         <forge-summary>one sentence describing the change</forge-summary>\n\
         Any tool can also be called as <forge-tool name=\"TOOL\">{json arguments}</forge-tool>.\n\nTools:\n",
    );
    for def in registry.definitions() {
        guide.push_str("- ");
        guide.push_str(&def.name);
        guide.push_str(": ");
        guide.push_str(&def.description);
        guide.push('\n');
    }
    guide
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guide_lists_every_tool() {
        let registry = ToolRegistry::standard();
        let guide = directive_guide(&registry);
        for def in registry.definitions() {
            assert!(guide.contains(&def.name), "missing {}", def.name);
        }
    }
}
