//! Delivery of progress events to the client connection.

use super::types::ProgressEvent;
use crate::error::ProvisionerError;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

/// Error types for event delivery
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Subscriber for session {0} is gone")]
    SubscriberGone(String),

    #[error("Subscriber for session {0} is not keeping up")]
    Backlogged(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl From<TransportError> for ProvisionerError {
    fn from(error: TransportError) -> Self {
        ProvisionerError::Transport(error.to_string())
    }
}

/// Black-box channel to the client
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    async fn publish(&self, session_id: &str, event: ProgressEvent) -> Result<(), TransportError>;
}

/// In-process transport routing each session's events to its own bounded channel
///
/// Publishing never waits: when a subscriber's channel is full the event is dropped
/// and `Backlogged` is returned.
#[derive(Debug)]
pub struct ChannelTransport {
    capacity: usize,
    subscribers: DashMap<String, mpsc::Sender<ProgressEvent>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: DashMap::new(),
        }
    }

    /// Register the single subscriber for `session_id`, replacing any previous one
    pub fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.insert(session_id.to_string(), sender);
        receiver
    }

    pub fn unsubscribe(&self, session_id: &str) {
        self.subscribers.remove(session_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ProgressTransport for ChannelTransport {
    async fn publish(&self, session_id: &str, event: ProgressEvent) -> Result<(), TransportError> {
        let sender = match self.subscribers.get(session_id) {
            Some(entry) => entry.value().clone(),
            None => {
                // Nobody listening for this session is acceptable
                trace!(session_id = %session_id, kind = %event.kind, "No subscriber for event");
                return Ok(());
            }
        };

        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(TransportError::Backlogged(session_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                self.subscribers.remove(session_id);
                Err(TransportError::SubscriberGone(session_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressEventKind;

    #[tokio::test]
    async fn test_routes_only_to_matching_session() {
        let transport = ChannelTransport::new(8);
        let mut first = transport.subscribe("s-1");
        let mut second = transport.subscribe("s-2");

        transport
            .publish("s-1", ProgressEvent::new("s-1", ProgressEventKind::Started))
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap().session_id, "s-1");
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_subscriber_is_not_an_error() {
        let transport = ChannelTransport::new(8);
        let result = transport
            .publish("nobody", ProgressEvent::new("nobody", ProgressEventKind::Started))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_gone() {
        let transport = ChannelTransport::new(8);
        drop(transport.subscribe("s-1"));

        let result = transport
            .publish("s-1", ProgressEvent::new("s-1", ProgressEventKind::Started))
            .await;
        assert_eq!(result, Err(TransportError::SubscriberGone("s-1".to_string())));
        assert_eq!(transport.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_waiting() {
        let transport = ChannelTransport::new(1);
        let mut receiver = transport.subscribe("s-1");

        transport
            .publish("s-1", ProgressEvent::new("s-1", ProgressEventKind::Started))
            .await
            .unwrap();
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            transport.publish("s-1", ProgressEvent::new("s-1", ProgressEventKind::Completed)),
        )
        .await
        .expect("publish should not wait for the subscriber");

        assert_eq!(result, Err(TransportError::Backlogged("s-1".to_string())));
        assert_eq!(transport.subscriber_count(), 1);
        assert_eq!(receiver.recv().await.unwrap().kind, ProgressEventKind::Started);
        assert!(receiver.try_recv().is_err());
    }
}
