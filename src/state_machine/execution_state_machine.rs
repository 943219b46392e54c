use super::errors::{StateMachineError, StateMachineResult};
use super::events::ExecutionEvent;
use super::states::ExecutionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// In-memory state machine for one execution
#[derive(Debug, Clone)]
pub struct ExecutionStateMachine {
    execution_id: String,
    current: ExecutionState,
    history: Vec<StateTransition>,
}

impl ExecutionStateMachine {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            current: ExecutionState::Pending,
            history: Vec::new(),
        }
    }

    pub fn current_state(&self) -> ExecutionState {
        self.current
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Apply `event`, returning the new state
    pub fn transition(&mut self, event: ExecutionEvent) -> StateMachineResult<ExecutionState> {
        let target = self.determine_target_state(self.current, &event)?;

        debug!(
            execution_id = %self.execution_id,
            from = %self.current,
            to = %target,
            event = event.event_type(),
            "Execution state transition"
        );

        self.history.push(StateTransition {
            from: self.current,
            to: target,
            event: event.event_type().to_string(),
            at: Utc::now(),
        });
        self.current = target;
        Ok(target)
    }

    fn determine_target_state(
        &self,
        current_state: ExecutionState,
        event: &ExecutionEvent,
    ) -> StateMachineResult<ExecutionState> {
        if current_state.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal {
                state: current_state.to_string(),
            });
        }

        let target = match (current_state, event) {
            (ExecutionState::Pending, ExecutionEvent::Validate) => ExecutionState::Validating,
            (ExecutionState::Validating, ExecutionEvent::Start) => ExecutionState::Running,

            // Interaction round trip
            (ExecutionState::Running, ExecutionEvent::AwaitInput) => {
                ExecutionState::WaitingForInput
            }
            (ExecutionState::WaitingForInput, ExecutionEvent::InputReceived) => {
                ExecutionState::Running
            }

            (ExecutionState::Running, ExecutionEvent::Complete) => ExecutionState::Completed,

            // Failure is possible from every non-terminal state
            (_, ExecutionEvent::Fail(_)) => ExecutionState::Failed,
            (_, ExecutionEvent::Cancel) => ExecutionState::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}
