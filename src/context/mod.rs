//! # Execution Context
//!
//! Mutable state for one execution: the leased SSH connection, ambient properties,
//! declared variables and template bindings. Writes made by a completed step are visible
//! to every later step of the same chain.

pub mod execution_context;
pub mod template;
pub mod variables;

pub use execution_context::{ContextSnapshot, ExecutionContext};
pub use variables::{VariableStore, VariableType};
