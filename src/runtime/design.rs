//! Model-written design proposals
//!
//! The deterministic proposals are always computed first; a connected model
//! may replace them with variants tailored to the conversation. Anything
//! unusable keeps the deterministic set.

use super::Orchestrator;
use crate::app_spec::{decode_entities, Layout, Workflow};
use crate::conversation::{ConversationState, DesignProposal};
use crate::llm::{complete_json, LlmMessage, LlmRequest};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

const PROPOSAL_MAX_TOKENS: u32 = 4096;
const MIN_PROPOSALS: usize = 2;

#[derive(Debug, Deserialize)]
struct ProposalReply {
    proposals: Vec<RawProposal>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    id: String,
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    entities: Value,
    #[serde(default)]
    layout: Option<Layout>,
    #[serde(default)]
    workflows: Vec<Workflow>,
}

impl Orchestrator {
    pub(super) async fn propose_designs(&self, state: &mut ConversationState) {
        let Some(llm) = &self.llm else {
            return;
        };
        let Some(spec) = &state.spec else {
            return;
        };
        let (Ok(spec_json), Ok(examples)) = (
            serde_json::to_string(spec),
            serde_json::to_string(&state.proposals),
        ) else {
            return;
        };

        let request = LlmRequest::new(vec![LlmMessage::user(format!(
            "Current design:\n{spec_json}\n\nDefault proposals:\n{examples}"
        ))])
        .with_system(
            "Suggest three alternative designs for the app described below. \
             Each proposal may add entity fields, change the layout, or add workflows. \
             Reply with JSON only: {\"proposals\": [{\"id\", \"title\", \"summary\", \
             \"entities\", \"layout\", \"workflows\"}]}, using the same shapes as the \
             default proposals.",
        )
        .with_max_tokens(PROPOSAL_MAX_TOKENS);

        match complete_json::<ProposalReply>(llm.as_ref(), &request).await {
            Ok(reply) => match usable(reply.proposals) {
                Some(proposals) => {
                    tracing::info!(conv_id = %state.id, count = proposals.len(), "Using model design proposals");
                    state.proposals = proposals;
                }
                None => {
                    tracing::warn!(conv_id = %state.id, "Model proposals unusable, keeping defaults");
                }
            },
            Err(e) => {
                tracing::warn!(conv_id = %state.id, error = %e, "Model proposals failed, keeping defaults");
            }
        }
    }
}

/// Decode raw proposals, dropping empty and duplicate ones
fn usable(raw: Vec<RawProposal>) -> Option<Vec<DesignProposal>> {
    let mut seen = HashSet::new();
    let proposals: Vec<DesignProposal> = raw
        .into_iter()
        .filter_map(|p| {
            let id = p.id.trim().to_string();
            if id.is_empty() || !seen.insert(id.clone()) {
                return None;
            }
            let proposal = DesignProposal {
                id,
                title: p.title,
                summary: p.summary,
                entities: decode_entities(&p.entities),
                layout: p.layout,
                workflows: p.workflows,
            };
            (!proposal.dimensions().is_empty()).then_some(proposal)
        })
        .collect();
    (proposals.len() >= MIN_PROPOSALS).then_some(proposals)
}
