use serde::{Deserialize, Serialize};

/// Events that can trigger execution state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionEvent {
    /// Begin parameter validation
    Validate,
    /// Validation passed and a connection is held
    Start,
    /// A step is waiting on the operator
    AwaitInput,
    /// The operator answered (or the prompt defaulted)
    InputReceived,
    Complete,
    /// Mark execution as failed with error message
    Fail(String),
    Cancel,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Start => "start",
            Self::AwaitInput => "await_input",
            Self::InputReceived => "input_received",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Fail(_) | Self::Cancel)
    }
}
