//! Error types for the provisioner engine.
//!
//! Every failure surfaced by the engine is a [`ProvisionerError`]. Component-local error
//! types (circuit breaker, configuration, SSH session, transport, state machine) convert
//! into it so callers only ever match on one taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// Why a remote command did not produce a usable result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFailureKind {
    /// The command ran and exited with a non-zero status
    NonZeroExit,
    /// The SSH session dropped while the command was in flight
    ConnectionLost,
    /// The per-command timeout elapsed
    Timeout,
}

impl fmt::Display for CommandFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit => write!(f, "non_zero_exit"),
            Self::ConnectionLost => write!(f, "connection_lost"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// One invalid parameter reported by schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProvisionerError {
    #[error("Connection to {user}@{host}:{port} failed after {attempts} attempt(s): {reason}")]
    Connection {
        host: String,
        port: u16,
        user: String,
        attempts: u32,
        reason: String,
    },

    #[error("Command failed ({kind}) with exit code {exit_code:?}: {stderr}")]
    CommandExecution {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        kind: CommandFailureKind,
    },

    #[error("Parameter validation failed: {}", join_field_errors(.0))]
    ParameterValidation(Vec<FieldError>),

    #[error("Interaction {correlation_id} for session {session_id} timed out without a default")]
    InteractionTimeout {
        session_id: String,
        correlation_id: String,
    },

    #[error("Interaction rejected for session {session_id}: {reason}")]
    InteractionRejected { session_id: String, reason: String },

    #[error("Connection pool exhausted for {key} after waiting {waited:?}")]
    PoolExhausted { key: String, waited: Duration },

    #[error("Circuit breaker open for {key}")]
    CircuitOpen { key: String },

    #[error("Variable '{name}' declared as {declared} but written as {actual}")]
    TypeMismatch {
        name: String,
        declared: String,
        actual: String,
    },

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Invalid script definition: {0}")]
    InvalidScript(String),

    #[error("An execution is already active for session {0}")]
    ExecutionAlreadyActive(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution context has no SSH connection")]
    NotConnected,

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProvisionerError {
    /// Stable machine-readable code carried on terminal `Error` events
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::CommandExecution { .. } => "command_execution_error",
            Self::ParameterValidation(_) => "parameter_validation_error",
            Self::InteractionTimeout { .. } => "interaction_timeout",
            Self::InteractionRejected { .. } => "interaction_rejected",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::ScriptNotFound(_) => "script_not_found",
            Self::InvalidScript(_) => "invalid_script",
            Self::ExecutionAlreadyActive(_) => "execution_already_active",
            Self::Cancelled => "cancelled",
            Self::NotConnected => "not_connected",
            Self::StateTransition(_) => "state_transition_error",
            Self::Configuration(_) => "configuration_error",
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message suitable for showing to the operator
    pub fn user_message(&self) -> String {
        match self {
            Self::PoolExhausted { .. } | Self::CircuitOpen { .. } | Self::Connection { .. } => {
                "Server unreachable, retry later".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True when the SSH session dropped underneath a running command
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::CommandExecution {
                kind: CommandFailureKind::ConnectionLost,
                ..
            }
        )
    }

    /// True for errors raised before any remote work starts
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::ParameterValidation(_)
                | Self::PoolExhausted { .. }
                | Self::CircuitOpen { .. }
                | Self::Connection { .. }
                | Self::ScriptNotFound(_)
                | Self::InvalidScript(_)
                | Self::ExecutionAlreadyActive(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::InteractionTimeout { .. }
                | Self::CommandExecution {
                    kind: CommandFailureKind::Timeout,
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for ProvisionerError {
    fn from(error: serde_json::Error) -> Self {
        ProvisionerError::Internal(format!("JSON serialization error: {error}"))
    }
}

impl From<serde_yaml::Error> for ProvisionerError {
    fn from(error: serde_yaml::Error) -> Self {
        ProvisionerError::InvalidScript(format!("YAML parsing error: {error}"))
    }
}
