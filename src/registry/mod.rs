//! # Script Registry
//!
//! Script definitions, their parameter schemas, and where they come from.
//!
//! ## Overview
//!
//! Every executable script is a [`ScriptDefinition`] tagged with a
//! [`ScriptClassification`]:
//!
//! - **STATIC**: no parameters, runs immediately
//! - **CONFIGURABLE**: parameters validated against a [`ParameterSchema`] before any
//!   remote work
//! - **INTERACTIVE**: configurable, with steps that may pause for operator input
//! - **USER_DEFINED**: loaded from a [`ScriptSource`] at resolution time
//!
//! ## Usage
//!
//! ```rust
//! use provisioner_core::registry::{ScriptClassification, ScriptDefinition, ScriptRegistry};
//! use provisioner_core::step::RemoteCommandStep;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ScriptRegistry::new();
//! registry.register(
//!     ScriptDefinition::new("uptime", ScriptClassification::Static)
//!         .with_step(RemoteCommandStep::new("uptime", "uptime")),
//! )?;
//!
//! let definition = registry.resolve("uptime").await?;
//! assert_eq!(definition.steps().len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod definition;
pub mod script_registry;
pub mod source;

pub use definition::{
    ParameterSchema, ParameterSpec, ScriptClassification, ScriptDefinition, ValidatedParameter,
};
pub use script_registry::{ScriptRegistry, ScriptSummary};
pub use source::{
    InMemoryScriptSource, ScriptSource, UserScriptDocument, YamlDirectoryScriptSource,
};
