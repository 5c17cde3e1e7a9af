//! Yes/no consent gate for state-mutating directives
//!
//! Requests are keyed by `(conversation, tool, preview)`. A second identical
//! request while the first is pending waits on the same decision instead of
//! prompting again. Cancelling a conversation denies everything it has
//! pending.

use crate::event_bus::{EventBus, StatusEvent};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const CONSENT_PHASE: &str = "consent";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConsentKey {
    conversation_id: String,
    tool: String,
    preview: String,
}

struct PendingRequest {
    key: ConsentKey,
    decision: watch::Sender<Option<bool>>,
}

#[derive(Default)]
struct Pending {
    by_id: HashMap<String, PendingRequest>,
    by_key: HashMap<ConsentKey, String>,
}

impl Pending {
    fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        let request = self.by_id.remove(request_id)?;
        self.by_key.remove(&request.key);
        Some(request)
    }
}

pub struct ConsentBroker {
    bus: Arc<EventBus>,
    pending: Mutex<Pending>,
}

impl ConsentBroker {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pending: Mutex::new(Pending::default()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the user whether `tool` may run. Resolves to `false` on denial,
    /// on cancellation, or if the request is dropped.
    pub async fn request(
        &self,
        conversation_id: &str,
        tool: &str,
        preview: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let key = ConsentKey {
            conversation_id: conversation_id.to_string(),
            tool: tool.to_string(),
            preview: preview.to_string(),
        };

        let mut rx = {
            let mut pending = self.pending();
            let existing = pending
                .by_key
                .get(&key)
                .and_then(|id| pending.by_id.get(id))
                .map(|request| request.decision.subscribe());

            match existing {
                Some(rx) => {
                    tracing::debug!(conv_id = %conversation_id, tool = %tool, "Joining pending consent request");
                    rx
                }
                None => {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let (tx, rx) = watch::channel(None);
                    pending.by_key.insert(key.clone(), request_id.clone());
                    pending.by_id.insert(
                        request_id.clone(),
                        PendingRequest {
                            key,
                            decision: tx,
                        },
                    );
                    drop(pending);

                    tracing::info!(conv_id = %conversation_id, tool = %tool, request_id = %request_id, "Consent requested");
                    self.bus.publish(
                        conversation_id,
                        StatusEvent::warning(CONSENT_PHASE, format!("Allow: {preview}?"), 0)
                            .with_details(json!({
                                "kind": "consent",
                                "requestId": request_id,
                                "tool": tool,
                                "preview": preview,
                            })),
                    );
                    rx
                }
            }
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => false,
            decision = rx.wait_for(Option::is_some) => {
                decision.ok().and_then(|d| *d).unwrap_or(false)
            }
        }
    }

    /// Record the user's answer; returns false for an unknown or already
    /// resolved request id.
    pub fn resolve(&self, request_id: &str, allow: bool) -> bool {
        let Some(request) = self.pending().take(request_id) else {
            return false;
        };
        tracing::info!(
            conv_id = %request.key.conversation_id,
            tool = %request.key.tool,
            allow,
            "Consent resolved"
        );
        request.decision.send_replace(Some(allow));
        true
    }

    /// Deny and clear every pending request of a conversation
    pub fn cancel_conversation(&self, conversation_id: &str) -> usize {
        let mut pending = self.pending();
        let ids: Vec<String> = pending
            .by_id
            .iter()
            .filter(|(_, r)| r.key.conversation_id == conversation_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(request) = pending.take(id) {
                request.decision.send_replace(Some(false));
            }
        }
        if !ids.is_empty() {
            tracing::info!(conv_id = %conversation_id, denied = ids.len(), "Pending consent cleared");
        }
        ids.len()
    }

    #[cfg(test)]
    pub fn pending_count(&self, conversation_id: &str) -> usize {
        self.pending()
            .by_id
            .values()
            .filter(|r| r.key.conversation_id == conversation_id)
            .count()
    }
}
