//! # Orchestration Engine
//!
//! Runs scripts against remote hosts.
//!
//! ## Core Components
//!
//! - **StepChain**: Ordered, fail-fast execution of a step list against one context,
//!   emitting one completion or failure event per evaluated step
//! - **ExecutionDispatcher**: Entry point that validates parameters per script
//!   classification, leases the SSH connection, runs the chain and publishes exactly one
//!   terminal event per execution
//!
//! ## Concurrency
//!
//! One chain runs per session on a single task; sessions run concurrently and share only
//! the connection pool and the interaction broker. Suspension points are connection
//! acquisition, remote commands and operator prompts, each with its own bound.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provisioner_core::orchestration::{ExecutionDispatcher, ExecutionRequest};
//! use provisioner_core::ssh::{ConnectionConfig, Credential};
//! use std::sync::Arc;
//!
//! # async fn example(dispatcher: Arc<ExecutionDispatcher>) -> Result<(), Box<dyn std::error::Error>> {
//! let target = ConnectionConfig::new(
//!     "10.0.0.5",
//!     22,
//!     "root",
//!     Credential::Password { password: "secret".to_string() },
//! );
//! let request = ExecutionRequest::new("session-1", "install-docker", target)
//!     .with_parameter("docker_version", "latest");
//!
//! let report = dispatcher.execute(request).await.into_result()?;
//! println!("finished in state {}", report.state);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod step_chain;
pub mod types;

pub use dispatcher::ExecutionDispatcher;
pub use step_chain::{ChainOutcome, ChainResult, StepChain, StepReport};
pub use types::{ExecutionReport, ExecutionRequest};
