#![allow(clippy::doc_markdown)] // Allow technical terms like OpenSSH, DaoCloud in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Provisioner Core
//!
//! Remote script orchestration engine: ordered chains of remote operations run over SSH
//! against Linux hosts, with live progress events and mid-execution operator prompts.
//!
//! ## Architecture
//!
//! ```text
//! ExecutionDispatcher
//! ├── ScriptRegistry ── ScriptSource (user-defined YAML scripts)
//! ├── SshConnectionManager ── CircuitBreaker, BackoffPolicy, SshConnector
//! ├── StepChain ── Step (RemoteCommandStep, PromptStep, detection steps)
//! │      └── ExecutionContext (ambient properties, typed variables, template bindings)
//! ├── InteractionBroker ── pending prompts, one per session
//! └── ProgressReporter ── ProgressTransport
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Step chain and execution dispatcher
//! - [`context`] - Per-execution state shared by the steps of one chain
//! - [`step`] - Step trait and the generic command and prompt steps
//! - [`ssh`] - Pooled, retrying SSH connections
//! - [`interaction`] - Operator prompts and their correlation
//! - [`events`] - Progress events and transports
//! - [`registry`] - Script definitions, parameter schemas and sources
//! - [`detection`] - OS and geolocation detection, mirror selection
//! - [`scripts`] - Compiled-in script catalogue
//! - [`resilience`] - Circuit breaker
//! - [`state_machine`] - Execution lifecycle
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provisioner_core::config::ConfigManager;
//! use provisioner_core::detection::GeoOsDetectionService;
//! use provisioner_core::events::{ChannelTransport, ProgressReporter};
//! use provisioner_core::interaction::InteractionBroker;
//! use provisioner_core::orchestration::{ExecutionDispatcher, ExecutionRequest};
//! use provisioner_core::registry::ScriptRegistry;
//! use provisioner_core::scripts::register_builtin_scripts;
//! use provisioner_core::ssh::{ConnectionConfig, Credential, RusshConnector, SshConnectionManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let transport = Arc::new(ChannelTransport::new(config.events.channel_capacity));
//! let reporter = Arc::new(ProgressReporter::new(transport.clone(), config.events.publish_timeout()));
//! let broker = Arc::new(InteractionBroker::new(reporter.clone()));
//! let pool = Arc::new(SshConnectionManager::from_config(Arc::new(RusshConnector::new()), config));
//!
//! let registry = Arc::new(ScriptRegistry::new());
//! register_builtin_scripts(&registry, Arc::new(GeoOsDetectionService::from_config(&config.detection)))?;
//!
//! let dispatcher = ExecutionDispatcher::from_config(registry, pool, broker, reporter, config);
//! let mut events = transport.subscribe("session-1");
//!
//! let target = ConnectionConfig::new(
//!     "10.0.0.5",
//!     22,
//!     "root",
//!     Credential::Password { password: "secret".to_string() },
//! );
//! let report = dispatcher
//!     .execute(ExecutionRequest::new("session-1", "detect-system", target))
//!     .await;
//! while let Ok(event) = events.try_recv() {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! println!("{:?}", report.snapshot.ambient);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod detection;
pub mod error;
pub mod events;
pub mod interaction;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod scripts;
pub mod ssh;
pub mod state_machine;
pub mod step;
pub mod validation;

pub use config::{ConfigManager, ProvisionerConfig};
pub use context::{ContextSnapshot, ExecutionContext, VariableType};
pub use error::{CommandFailureKind, FieldError, ProvisionerError, Result};
pub use events::{ProgressEvent, ProgressEventKind, ProgressReporter, StepStatus};
pub use interaction::{InteractionBroker, InteractionPrompt, InteractionResponse};
pub use orchestration::{ExecutionDispatcher, ExecutionReport, ExecutionRequest, StepChain};
pub use registry::{ScriptClassification, ScriptDefinition, ScriptRegistry};
pub use ssh::{ConnectionConfig, Credential, SshConnectionManager};
pub use state_machine::ExecutionState;
pub use step::{Step, StepOutput};
