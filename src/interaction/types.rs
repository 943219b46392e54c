use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Yes/no question; answers are normalised to "true" / "false"
    Confirmation,
    Text,
    /// Free text whose answer is never logged or echoed back
    Password,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmation => write!(f, "confirmation"),
            Self::Text => write!(f, "text"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// What a step wants to ask the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionPrompt {
    pub kind: PromptKind,
    pub message: String,
    /// Used when the deadline passes without an answer
    #[serde(default)]
    pub default: Option<String>,
}

impl InteractionPrompt {
    pub fn confirmation(message: impl Into<String>, default: Option<bool>) -> Self {
        Self {
            kind: PromptKind::Confirmation,
            message: message.into(),
            default: default.map(|d| d.to_string()),
        }
    }

    pub fn text(message: impl Into<String>, default: Option<String>) -> Self {
        Self {
            kind: PromptKind::Text,
            message: message.into(),
            default,
        }
    }

    pub fn password(message: impl Into<String>) -> Self {
        Self {
            kind: PromptKind::Password,
            message: message.into(),
            default: None,
        }
    }
}

/// Request pushed to the client inside an `InteractionRequested` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRequest {
    pub session_id: String,
    pub correlation_id: String,
    pub kind: PromptKind,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub deadline: DateTime<Utc>,
}

/// Answer delivered by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResponse {
    pub session_id: String,
    pub correlation_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Accepted,
    /// Unknown, already resolved or expired correlation id
    Rejected,
}

/// Interpret a confirmation answer
pub fn parse_confirmation(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" | "ok" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = InteractionRequest {
            session_id: "s-1".to_string(),
            correlation_id: "c-1".to_string(),
            kind: PromptKind::Confirmation,
            prompt: "Replace container?".to_string(),
            default_value: Some("false".to_string()),
            deadline: Utc::now(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["correlationId"], "c-1");
        assert_eq!(value["kind"], "confirmation");
        assert_eq!(value["defaultValue"], "false");
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation(" YES "), Some(true));
        assert_eq!(parse_confirmation("n"), Some(false));
        assert_eq!(parse_confirmation("maybe"), None);
    }
}
