//! Ordered probe cascades.
//!
//! A cascade asks its probes in priority order and stops at the first one that answers
//! with a non-blank value; later probes are never consulted. A probe that errors is
//! skipped, unless the error means the SSH session itself is gone.

use crate::context::ExecutionContext;
use crate::error::{ProvisionerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` or a blank value means "no answer, try the next probe"
    async fn probe(&self, context: &ExecutionContext) -> Result<Option<String>>;
}

/// Probe answering with the stdout of one remote command
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: String,
    command: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Probe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self, context: &ExecutionContext) -> Result<Option<String>> {
        let result = context
            .execute_with_timeout(&self.command, self.timeout)
            .await?;
        if !result.is_success() {
            debug!(probe = %self.name, exit_code = result.exit_code, "Probe command failed");
            return Ok(None);
        }
        Ok(Some(result.stdout))
    }
}

/// Answer from the first probe that produced a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub probe: String,
    pub value: String,
}

#[derive(Clone, Default)]
pub struct ProbeCascade {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeCascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe<P: Probe + 'static>(mut self, probe: P) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// First non-blank answer, trimmed
    pub async fn first_non_blank(&self, context: &ExecutionContext) -> Result<Option<ProbeHit>> {
        for probe in &self.probes {
            match probe.probe(context).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    debug!(probe = %probe.name(), "Probe answered");
                    return Ok(Some(ProbeHit {
                        probe: probe.name().to_string(),
                        value: value.trim().to_string(),
                    }));
                }
                Ok(_) => {
                    debug!(probe = %probe.name(), "Probe had no answer");
                }
                Err(error) if is_fatal(&error) => return Err(error),
                Err(error) => {
                    debug!(probe = %probe.name(), error = %error, "Probe errored, trying next");
                }
            }
        }
        Ok(None)
    }

    /// Every probe in order, each answer passed to `accept` until it returns `true`
    ///
    /// Used when several probes contribute fields to one result.
    pub async fn until<F>(&self, context: &ExecutionContext, mut accept: F) -> Result<()>
    where
        F: FnMut(&str, &str) -> bool + Send,
    {
        for probe in &self.probes {
            match probe.probe(context).await {
                Ok(Some(value)) if !value.trim().is_empty() => {
                    if accept(probe.name(), value.trim()) {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(error) if is_fatal(&error) => return Err(error),
                Err(error) => {
                    debug!(probe = %probe.name(), error = %error, "Probe errored, trying next");
                }
            }
        }
        Ok(())
    }
}

fn is_fatal(error: &ProvisionerError) -> bool {
    error.is_connection_lost()
        || matches!(
            error,
            ProvisionerError::Cancelled | ProvisionerError::NotConnected
        )
}

impl std::fmt::Debug for ProbeCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.probes.iter().map(|p| p.name().to_string()))
            .finish()
    }
}
