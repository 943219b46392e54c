use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Discriminator carried in the `type` field of every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressEventKind {
    Started,
    StepProgress,
    StepCompleted,
    StepFailed,
    InteractionRequested,
    Completed,
    Error,
    Timeout,
}

impl ProgressEventKind {
    /// Terminal kinds close the session's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }
}

impl fmt::Display for ProgressEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Skipped,
    Failed,
    /// Failed, but the step allows failure and the chain continued
    Tolerated,
    Cancelled,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
            Self::Tolerated => write!(f, "tolerated"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Event pushed to the client for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ProgressEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Stamped by the reporter at publish time
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(session_id: impl Into<String>, kind: ProgressEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            step_name: None,
            status: None,
            percentage: None,
            message: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    pub fn started(session_id: impl Into<String>, script_id: &str) -> Self {
        Self::new(session_id, ProgressEventKind::Started)
            .with_message(format!("Executing script {script_id}"))
            .with_percentage(0)
    }

    pub fn step_progress(session_id: impl Into<String>, step_name: &str, percentage: u8) -> Self {
        Self::new(session_id, ProgressEventKind::StepProgress)
            .with_step(step_name)
            .with_status(StepStatus::Running)
            .with_percentage(percentage)
    }

    pub fn step_completed(
        session_id: impl Into<String>,
        step_name: &str,
        status: StepStatus,
        percentage: u8,
    ) -> Self {
        Self::new(session_id, ProgressEventKind::StepCompleted)
            .with_step(step_name)
            .with_status(status)
            .with_percentage(percentage)
    }

    pub fn step_failed(session_id: impl Into<String>, step_name: &str, message: String) -> Self {
        Self::new(session_id, ProgressEventKind::StepFailed)
            .with_step(step_name)
            .with_status(StepStatus::Failed)
            .with_message(message)
    }

    pub fn completed(session_id: impl Into<String>) -> Self {
        Self::new(session_id, ProgressEventKind::Completed)
            .with_percentage(100)
            .with_message("Execution completed".to_string())
    }

    pub fn error(session_id: impl Into<String>, message: String) -> Self {
        Self::new(session_id, ProgressEventKind::Error).with_message(message)
    }

    pub fn timeout(session_id: impl Into<String>, message: String) -> Self {
        Self::new(session_id, ProgressEventKind::Timeout).with_message(message)
    }

    pub fn with_step(mut self, step_name: &str) -> Self {
        self.step_name = Some(step_name.to_string());
        self
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = Some(percentage.min(100));
        self
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_uses_camel_case_and_type_tag() {
        let event = ProgressEvent::step_completed("s-1", "detect_os", StepStatus::Skipped, 50);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["type"], "StepCompleted");
        assert_eq!(value["stepName"], "detect_os");
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["percentage"], 50);
        assert!(value.get("payload").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_payload_round_trips() {
        let event = ProgressEvent::new("s-2", ProgressEventKind::Error)
            .with_payload(json!({"code": "circuit_open"}));
        let text = serde_json::to_string(&event).unwrap();
        let parsed: ProgressEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind, ProgressEventKind::Error);
        assert_eq!(parsed.payload.unwrap()["code"], "circuit_open");
    }
}
