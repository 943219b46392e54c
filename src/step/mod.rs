//! # Steps
//!
//! The unit of remote work run by a step chain. [`Step`] is the trait every operation
//! implements; [`RemoteCommandStep`] and [`PromptStep`] cover the common cases and
//! [`StepSpec`] describes either one in YAML for user-defined scripts.

pub mod condition;
pub mod prompt;
pub mod remote_command;
pub mod spec;
pub mod traits;

pub use condition::StepCondition;
pub use prompt::PromptStep;
pub use remote_command::RemoteCommandStep;
pub use spec::StepSpec;
pub use traits::{Step, StepOutput};
