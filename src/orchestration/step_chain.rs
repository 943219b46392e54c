//! # Step Chain
//!
//! Sequential, fail-fast execution of an ordered step list against one
//! [`ExecutionContext`].
//!
//! ## Event contract
//!
//! Every step that is evaluated produces exactly one `StepCompleted` or `StepFailed`
//! event:
//!
//! ```text
//! should_execute == false  ->  StepCompleted{skipped}
//! execute Ok               ->  StepProgress{running}, StepCompleted{success}
//! execute Err, tolerated   ->  StepProgress{running}, StepCompleted{tolerated}
//! execute Err              ->  StepProgress{running}, StepFailed        (chain stops)
//! cancelled mid-step       ->  StepProgress{running}, StepFailed{cancelled}
//! ```
//!
//! Cancellation is checked between steps; a step already executing is never preempted.
//! When a step fails because its SSH session dropped, the chain reconnects once and runs
//! that step again. Later steps are never retried.

use crate::context::ExecutionContext;
use crate::error::{ProvisionerError, Result};
use crate::events::{ProgressEvent, ProgressReporter, StepStatus};
use crate::log_step;
use crate::state_machine::{ExecutionEvent, ExecutionState};
use crate::step::{Step, StepOutput};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one evaluated step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub message: Option<String>,
    pub duration: Duration,
    /// 2 when the step was re-run after a reconnect
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Completed,
    Failed {
        step: String,
        error: ProvisionerError,
    },
    /// `step` is the step interrupted by the cancel, `None` when it landed between steps
    Cancelled { step: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainResult {
    pub outcome: ChainOutcome,
    pub steps: Vec<StepReport>,
}

impl ChainResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ChainOutcome::Completed
    }

    pub fn evaluated(&self) -> usize {
        self.steps.len()
    }

    pub fn error(&self) -> Option<&ProvisionerError> {
        match &self.outcome {
            ChainOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct StepChain {
    reporter: Arc<ProgressReporter>,
    reconnect_on_drop: bool,
}

impl StepChain {
    pub fn new(reporter: Arc<ProgressReporter>) -> Self {
        Self {
            reporter,
            reconnect_on_drop: true,
        }
    }

    pub fn with_reconnect_on_drop(mut self, enabled: bool) -> Self {
        self.reconnect_on_drop = enabled;
        self
    }

    /// Run `steps` in order against `context`
    ///
    /// Moves the context's state machine into `Running` first if it has not got there yet.
    /// Terminal state transitions are left to the caller.
    pub async fn run(&self, steps: &[Arc<dyn Step>], context: &mut ExecutionContext) -> ChainResult {
        let mut reports = Vec::with_capacity(steps.len());

        if let Err(error) = ensure_running(context) {
            return ChainResult {
                outcome: ChainOutcome::Failed {
                    step: String::new(),
                    error,
                },
                steps: reports,
            };
        }

        let total = steps.len();
        let mut outcome = ChainOutcome::Completed;

        for (index, step) in steps.iter().enumerate() {
            if context.is_cancelled() {
                info!(
                    session_id = %context.session_id(),
                    next_step = %step.name(),
                    "Cancellation observed between steps"
                );
                outcome = ChainOutcome::Cancelled { step: None };
                break;
            }

            let name = step.name().to_string();
            let started_pct = percentage(index, total);
            let finished_pct = percentage(index + 1, total);
            context.set_current_step(Some(name.clone()));

            if !step.should_execute(context) {
                log_step!(debug, "Step skipped", step_name: name, session_id: context.session_id());
                self.reporter
                    .publish(ProgressEvent::step_completed(
                        context.session_id(),
                        &name,
                        StepStatus::Skipped,
                        finished_pct,
                    ))
                    .await;
                reports.push(StepReport {
                    name,
                    status: StepStatus::Skipped,
                    message: None,
                    duration: Duration::ZERO,
                    attempts: 0,
                });
                continue;
            }

            self.reporter
                .publish(ProgressEvent::step_progress(
                    context.session_id(),
                    &name,
                    started_pct,
                ))
                .await;

            let started = Instant::now();
            let (result, attempts) = self.execute_step(step.as_ref(), context).await;
            let duration = started.elapsed();

            match result {
                Ok(output) => {
                    log_step!(info, "Step completed",
                        step_name: name,
                        session_id: context.session_id(),
                        duration_ms: duration.as_millis() as u64,
                        attempts: attempts
                    );
                    let message = output.message.clone();
                    self.reporter
                        .publish(completion_event(
                            context.session_id(),
                            &name,
                            finished_pct,
                            output,
                        ))
                        .await;
                    reports.push(StepReport {
                        name,
                        status: StepStatus::Success,
                        message,
                        duration,
                        attempts,
                    });
                }
                Err(ProvisionerError::Cancelled) => {
                    log_step!(info, "Step cancelled", step_name: name, session_id: context.session_id());
                    self.reporter
                        .publish(
                            ProgressEvent::step_failed(
                                context.session_id(),
                                &name,
                                "Execution cancelled".to_string(),
                            )
                            .with_status(StepStatus::Cancelled),
                        )
                        .await;
                    reports.push(StepReport {
                        name: name.clone(),
                        status: StepStatus::Cancelled,
                        message: None,
                        duration,
                        attempts,
                    });
                    outcome = ChainOutcome::Cancelled { step: Some(name) };
                    break;
                }
                Err(error) if step.tolerates_failure() => {
                    log_step!(warn, "Step failed, continuing",
                        step_name: name,
                        session_id: context.session_id(),
                        error: error.to_string()
                    );
                    self.reporter
                        .publish(
                            ProgressEvent::step_completed(
                                context.session_id(),
                                &name,
                                StepStatus::Tolerated,
                                finished_pct,
                            )
                            .with_message(error.to_string())
                            .with_payload(json!({ "code": error.error_code() })),
                        )
                        .await;
                    reports.push(StepReport {
                        name,
                        status: StepStatus::Tolerated,
                        message: Some(error.to_string()),
                        duration,
                        attempts,
                    });
                }
                Err(error) => {
                    log_step!(error, "Step failed",
                        step_name: name,
                        session_id: context.session_id(),
                        error: error.to_string()
                    );
                    self.reporter
                        .publish(
                            ProgressEvent::step_failed(
                                context.session_id(),
                                &name,
                                error.to_string(),
                            )
                            .with_payload(json!({ "code": error.error_code() })),
                        )
                        .await;
                    reports.push(StepReport {
                        name: name.clone(),
                        status: StepStatus::Failed,
                        message: Some(error.to_string()),
                        duration,
                        attempts,
                    });
                    outcome = ChainOutcome::Failed { step: name, error };
                    break;
                }
            }
        }

        context.set_current_step(None);
        ChainResult {
            outcome,
            steps: reports,
        }
    }

    /// Execute one step, re-running it once on a fresh connection if the session dropped
    async fn execute_step(
        &self,
        step: &dyn Step,
        context: &mut ExecutionContext,
    ) -> (Result<StepOutput>, u32) {
        let first = step.execute(context).await;
        let error = match first {
            Err(error)
                if error.is_connection_lost()
                    && self.reconnect_on_drop
                    && !context.is_cancelled() =>
            {
                error
            }
            other => return (other, 1),
        };

        warn!(
            session_id = %context.session_id(),
            step = %step.name(),
            error = %error,
            "🔌 Connection lost mid-step, reconnecting once"
        );

        if let Err(reconnect_error) = context.reconnect().await {
            warn!(
                session_id = %context.session_id(),
                step = %step.name(),
                error = %reconnect_error,
                "Reconnect failed"
            );
            return (Err(error), 1);
        }

        (step.execute(context).await, 2)
    }
}

fn ensure_running(context: &ExecutionContext) -> Result<()> {
    loop {
        match context.state() {
            ExecutionState::Pending => {
                context.transition(ExecutionEvent::Validate)?;
            }
            ExecutionState::Validating => {
                context.transition(ExecutionEvent::Start)?;
            }
            ExecutionState::Running => return Ok(()),
            other => {
                return Err(ProvisionerError::StateTransition(format!(
                    "cannot run steps while execution is {other}"
                )))
            }
        }
    }
}

fn percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

fn completion_event(
    session_id: &str,
    step_name: &str,
    percentage: u8,
    output: StepOutput,
) -> ProgressEvent {
    let mut event =
        ProgressEvent::step_completed(session_id, step_name, StepStatus::Success, percentage);
    if let Some(message) = output.message {
        event = event.with_message(message);
    }
    if let Some(payload) = output.payload {
        event = event.with_payload(payload);
    }
    event
}
