use super::step_chain::StepReport;
use crate::context::ContextSnapshot;
use crate::error::{ProvisionerError, Result};
use crate::ssh::ConnectionConfig;
use crate::state_machine::ExecutionState;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One request to run a script on a target host
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub session_id: String,
    pub script_id: String,
    pub connection: ConnectionConfig,
    pub parameters: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn new(
        session_id: impl Into<String>,
        script_id: impl Into<String>,
        connection: ConnectionConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            script_id: script_id.into(),
            connection,
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }
}

/// Final account of one execution
///
/// `execution_id` doubles as the support correlation id carried on the terminal event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub session_id: String,
    pub execution_id: String,
    pub script_id: String,
    pub state: ExecutionState,
    pub steps: Vec<StepReport>,
    pub error: Option<ProvisionerError>,
    pub snapshot: ContextSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn into_result(self) -> Result<ExecutionReport> {
        match (&self.error, self.state) {
            (Some(error), _) => Err(error.clone()),
            (None, ExecutionState::Completed) => Ok(self),
            (None, ExecutionState::Cancelled) => Err(ProvisionerError::Cancelled),
            (None, state) => Err(ProvisionerError::Internal(format!(
                "execution {} ended in state {state}",
                self.execution_id
            ))),
        }
    }
}
