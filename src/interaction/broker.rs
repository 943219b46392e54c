//! # Interaction Broker
//!
//! Correlates operator prompts with asynchronous answers. Each session may have at most
//! one pending prompt; a second request while one is outstanding is rejected, not queued.
//! Only the requesting session is suspended while it waits.

use super::types::{
    InteractionPrompt, InteractionRequest, InteractionResponse, PromptKind, ResolveOutcome,
};
use crate::error::{ProvisionerError, Result};
use crate::events::{ProgressEvent, ProgressEventKind, ProgressReporter};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct PendingInteraction {
    correlation_id: String,
    kind: PromptKind,
    responder: oneshot::Sender<String>,
    deadline: DateTime<Utc>,
}

/// Clears the session's pending entry if the waiting future is dropped early
struct PendingGuard<'a> {
    broker: &'a InteractionBroker,
    session_id: &'a str,
    correlation_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker
            .remove_if_current(self.session_id, &self.correlation_id);
    }
}

enum Wake {
    Answer(Option<String>),
    Deadline,
    Cancelled,
}

pub struct InteractionBroker {
    reporter: Arc<ProgressReporter>,
    pending: DashMap<String, PendingInteraction>,
}

impl InteractionBroker {
    pub fn new(reporter: Arc<ProgressReporter>) -> Self {
        Self {
            reporter,
            pending: DashMap::new(),
        }
    }

    /// Ask the operator and wait up to `timeout` for the answer
    pub async fn request(
        &self,
        session_id: &str,
        prompt: &InteractionPrompt,
        timeout: Duration,
    ) -> Result<String> {
        self.request_cancellable(session_id, prompt, timeout, &CancellationToken::new())
            .await
    }

    /// As [`request`](Self::request), also returning `Cancelled` when `cancel` fires
    pub async fn request_cancellable(
        &self,
        session_id: &str,
        prompt: &InteractionPrompt,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let correlation_id = Uuid::new_v4().to_string();
        let deadline = Utc::now()
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let (responder, mut receiver) = oneshot::channel();

        match self.pending.entry(session_id.to_string()) {
            Entry::Occupied(existing) => {
                warn!(
                    session_id = %session_id,
                    pending_correlation_id = %existing.get().correlation_id,
                    "Rejecting second interaction while one is pending"
                );
                return Err(ProvisionerError::InteractionRejected {
                    session_id: session_id.to_string(),
                    reason: "another interaction is already pending".to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingInteraction {
                    correlation_id: correlation_id.clone(),
                    kind: prompt.kind,
                    responder,
                    deadline,
                });
            }
        }
        let _pending = PendingGuard {
            broker: self,
            session_id,
            correlation_id: correlation_id.clone(),
        };

        let request = InteractionRequest {
            session_id: session_id.to_string(),
            correlation_id: correlation_id.clone(),
            kind: prompt.kind,
            prompt: prompt.message.clone(),
            default_value: prompt.default.clone(),
            deadline,
        };
        let payload = serde_json::to_value(&request)?;
        self.reporter
            .publish(
                ProgressEvent::new(session_id, ProgressEventKind::InteractionRequested)
                    .with_message(prompt.message.clone())
                    .with_payload(payload),
            )
            .await;

        info!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            kind = %prompt.kind,
            timeout_ms = timeout.as_millis() as u64,
            "⏸️ Waiting for operator input"
        );

        let wake = tokio::select! {
            answer = &mut receiver => Wake::Answer(answer.ok()),
            _ = tokio::time::sleep(timeout) => Wake::Deadline,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        match wake {
            Wake::Answer(Some(value)) => Ok(value),
            Wake::Answer(None) => Err(ProvisionerError::Cancelled),
            Wake::Deadline => {
                if self.remove_if_current(session_id, &correlation_id).is_none() {
                    // resolve() won the race; its value is already in the channel
                    if let Ok(value) = receiver.try_recv() {
                        return Ok(value);
                    }
                }
                match &prompt.default {
                    Some(default) => {
                        info!(
                            session_id = %session_id,
                            correlation_id = %correlation_id,
                            "Interaction timed out, using default"
                        );
                        Ok(default.clone())
                    }
                    None => Err(ProvisionerError::InteractionTimeout {
                        session_id: session_id.to_string(),
                        correlation_id,
                    }),
                }
            }
            Wake::Cancelled => {
                self.remove_if_current(session_id, &correlation_id);
                debug!(session_id = %session_id, correlation_id = %correlation_id, "Interaction cancelled");
                Err(ProvisionerError::Cancelled)
            }
        }
    }

    fn remove_if_current(
        &self,
        session_id: &str,
        correlation_id: &str,
    ) -> Option<PendingInteraction> {
        self.pending
            .remove_if(session_id, |_, pending| {
                pending.correlation_id == correlation_id
            })
            .map(|(_, pending)| pending)
    }

    /// Deliver an answer; only the first resolve for a correlation id is accepted
    pub fn resolve(&self, session_id: &str, correlation_id: &str, value: String) -> ResolveOutcome {
        let Some(pending) = self.remove_if_current(session_id, correlation_id) else {
            debug!(
                session_id = %session_id,
                correlation_id = %correlation_id,
                "Rejecting answer for unknown or finished interaction"
            );
            return ResolveOutcome::Rejected;
        };

        if Utc::now() > pending.deadline {
            debug!(session_id = %session_id, correlation_id = %correlation_id, "Answer arrived after deadline");
        }

        let kind = pending.kind;
        match pending.responder.send(value) {
            Ok(()) => {
                info!(
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    kind = %kind,
                    "Interaction resolved"
                );
                ResolveOutcome::Accepted
            }
            Err(_) => ResolveOutcome::Rejected,
        }
    }

    pub fn respond(&self, response: InteractionResponse) -> ResolveOutcome {
        self.resolve(
            &response.session_id,
            &response.correlation_id,
            response.value,
        )
    }

    /// Abandon any pending prompt for the session; the waiter observes `Cancelled`
    pub fn cancel_session(&self, session_id: &str) -> bool {
        self.pending.remove(session_id).is_some()
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.pending.contains_key(session_id)
    }

    /// Correlation id of the session's outstanding prompt, if any
    pub fn pending_correlation_id(&self, session_id: &str) -> Option<String> {
        self.pending
            .get(session_id)
            .map(|pending| pending.correlation_id.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
