//! Seams between the pool and the SSH wire library.

use super::types::{CommandResult, ConnectionConfig};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// One authenticated SSH session able to run commands
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Run a command to completion, collecting stdout, stderr and the exit status
    async fn exec(&self, command: &str) -> Result<CommandResult, SessionError>;

    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens authenticated sessions
#[async_trait]
pub trait SshConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError>;
}
