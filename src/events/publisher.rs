use super::transport::ProgressTransport;
use super::types::ProgressEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Best-effort publisher of per-session progress events
///
/// Timestamps are re-stamped at publish time and never go backwards within a session.
/// Delivery failures and slow subscribers are logged and the event is dropped; the
/// execution is never failed because of them. `ChannelTransport` never waits on a full
/// subscriber; `publish_timeout` bounds transports that do.
pub struct ProgressReporter {
    transport: Arc<dyn ProgressTransport>,
    publish_timeout: Duration,
    last_timestamps: DashMap<String, DateTime<Utc>>,
}

impl ProgressReporter {
    pub fn new(transport: Arc<dyn ProgressTransport>, publish_timeout: Duration) -> Self {
        Self {
            transport,
            publish_timeout,
            last_timestamps: DashMap::new(),
        }
    }

    pub async fn publish(&self, mut event: ProgressEvent) {
        event.timestamp = self.next_timestamp(&event.session_id);
        let session_id = event.session_id.clone();
        let kind = event.kind;

        match tokio::time::timeout(
            self.publish_timeout,
            self.transport.publish(&session_id, event),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(session_id = %session_id, kind = %kind, "Progress event published");
            }
            Ok(Err(error)) => {
                warn!(session_id = %session_id, kind = %kind, error = %error, "Dropping progress event");
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    kind = %kind,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "Dropping progress event, transport too slow"
                );
            }
        }
    }

    fn next_timestamp(&self, session_id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        let mut entry = self
            .last_timestamps
            .entry(session_id.to_string())
            .or_insert(now);
        let stamped = std::cmp::max(now, *entry);
        *entry = stamped;
        stamped
    }

    /// Drop per-session bookkeeping once the session's terminal event is out
    pub fn forget_session(&self, session_id: &str) {
        self.last_timestamps.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::transport::TransportError;
    use crate::events::{ChannelTransport, ProgressEventKind};
    use async_trait::async_trait;

    struct StalledTransport;

    #[async_trait]
    impl ProgressTransport for StalledTransport {
        async fn publish(&self, _: &str, _: ProgressEvent) -> Result<(), TransportError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timestamps_are_monotonic_per_session() {
        let transport = Arc::new(ChannelTransport::new(16));
        let mut receiver = transport.subscribe("s-1");
        let reporter = ProgressReporter::new(transport, Duration::from_millis(100));

        for _ in 0..5 {
            reporter
                .publish(ProgressEvent::new("s-1", ProgressEventKind::StepProgress))
                .await;
        }

        let mut previous = None;
        for _ in 0..5 {
            let event = receiver.recv().await.unwrap();
            if let Some(previous) = previous {
                assert!(event.timestamp >= previous);
            }
            previous = Some(event.timestamp);
        }
    }

    #[tokio::test]
    async fn test_stalled_transport_does_not_block() {
        let reporter = ProgressReporter::new(Arc::new(StalledTransport), Duration::from_millis(20));

        let started = std::time::Instant::now();
        reporter
            .publish(ProgressEvent::new("s-1", ProgressEventKind::Started))
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
