// Execution state machine
//
// Pending -> Validating -> Running -> {WaitingForInput <-> Running} -> {Completed | Failed | Cancelled}
// Failed and Cancelled are reachable from every non-terminal state.

pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExecutionEvent;
pub use execution_state_machine::{ExecutionStateMachine, StateTransition};
pub use states::ExecutionState;
