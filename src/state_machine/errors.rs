use crate::error::ProvisionerError;
use thiserror::Error;

pub type StateMachineResult<T> = Result<T, StateMachineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from:?} via {event}")]
    InvalidTransition { from: Option<String>, event: String },

    #[error("Execution already finished in state {state}")]
    AlreadyTerminal { state: String },
}

impl From<StateMachineError> for ProvisionerError {
    fn from(error: StateMachineError) -> Self {
        ProvisionerError::StateTransition(error.to_string())
    }
}
