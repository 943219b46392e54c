//! # Step Trait
//!
//! A step is one unit of remote work. Steps are immutable descriptors: all state they
//! read or produce lives in the [`ExecutionContext`] they are handed.

use crate::context::ExecutionContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a step reports back on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl StepOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Trait for remote operations executed by a step chain
///
/// # Contract
///
/// * `should_execute` is evaluated immediately before `execute`, against the context as
///   left by all earlier steps. Returning `false` skips the step.
/// * `execute` may read and write any context scope. Its writes become visible to later
///   steps once it returns, whether it succeeded or failed.
/// * An `Err` from `execute` aborts the chain unless `tolerates_failure` is `true`.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name reported in progress events
    fn name(&self) -> &str;

    /// Decide whether the step runs for this context
    ///
    /// Default implementation always runs.
    fn should_execute(&self, context: &ExecutionContext) -> bool {
        let _ = context;
        true
    }

    /// Perform the step's remote work
    ///
    /// # Returns
    ///
    /// * `Ok(StepOutput)` - The step finished; the output is attached to its completion event
    /// * `Err` - The step failed; the error is reported on the `StepFailed` event
    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput>;

    /// Whether a failure of this step lets the chain continue
    fn tolerates_failure(&self) -> bool {
        false
    }
}
