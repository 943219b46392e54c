//! # Execution Dispatcher
//!
//! Top-level entry point: resolves the script, validates parameters for its
//! classification, builds the context, leases a connection, runs the chain and reports
//! the outcome.
//!
//! ## Lifecycle per execution
//!
//! ```text
//! Pending -> Validating ──(invalid params / unknown script / pool error)──> Failed
//!                │
//!                └─> Running <-> WaitingForInput -> Completed | Failed | Cancelled
//! ```
//!
//! Exactly one terminal event is published per execution:
//!
//! | Outcome                     | Event       |
//! |-----------------------------|-------------|
//! | chain completed             | `Completed` |
//! | interaction deadline passed | `Timeout`   |
//! | any other error             | `Error` with `code` and `correlationId` |
//! | cancelled                   | `Error` with status `cancelled` |
//!
//! The leased connection is always handed back to the pool before the terminal event.

use super::step_chain::{ChainOutcome, StepChain, StepReport};
use super::types::{ExecutionReport, ExecutionRequest};
use crate::config::ProvisionerConfig;
use crate::context::{ContextSnapshot, ExecutionContext};
use crate::error::{FieldError, ProvisionerError, Result};
use crate::events::{ProgressEvent, ProgressReporter, StepStatus};
use crate::interaction::{InteractionBroker, InteractionResponse, ResolveOutcome};
use crate::log_execution;
use crate::registry::{ScriptDefinition, ScriptRegistry, ValidatedParameter};
use crate::ssh::SshConnectionManager;
use crate::state_machine::{ExecutionEvent, ExecutionState, ExecutionStateMachine};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ActiveExecution {
    execution_id: String,
    cancel: CancellationToken,
    state: Arc<Mutex<ExecutionStateMachine>>,
}

/// Removes the session from the active table when the execution ends, however it ends
struct ActiveGuard {
    active: Arc<DashMap<String, ActiveExecution>>,
    session_id: String,
    execution_id: String,
    cancel: CancellationToken,
    state: Arc<Mutex<ExecutionStateMachine>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let execution_id = &self.execution_id;
        self.active
            .remove_if(&self.session_id, |_, active| &active.execution_id == execution_id);
    }
}

/// Where an execution stopped, before its terminal event is published
enum Finish {
    Completed,
    Failed(ProvisionerError),
    Cancelled,
}

pub struct ExecutionDispatcher {
    registry: Arc<ScriptRegistry>,
    pool: Arc<SshConnectionManager>,
    broker: Arc<InteractionBroker>,
    reporter: Arc<ProgressReporter>,
    chain: StepChain,
    interaction_timeout: Duration,
    active: Arc<DashMap<String, ActiveExecution>>,
}

impl ExecutionDispatcher {
    pub fn new(
        registry: Arc<ScriptRegistry>,
        pool: Arc<SshConnectionManager>,
        broker: Arc<InteractionBroker>,
        reporter: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            registry,
            pool,
            broker,
            chain: StepChain::new(Arc::clone(&reporter)),
            reporter,
            interaction_timeout: crate::constants::DEFAULT_INTERACTION_TIMEOUT,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(
        registry: Arc<ScriptRegistry>,
        pool: Arc<SshConnectionManager>,
        broker: Arc<InteractionBroker>,
        reporter: Arc<ProgressReporter>,
        config: &ProvisionerConfig,
    ) -> Self {
        Self::new(registry, pool, broker, reporter)
            .with_interaction_timeout(config.interaction.default_timeout())
            .with_reconnect_on_drop(config.execution.reconnect_on_drop)
    }

    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout = timeout;
        self
    }

    pub fn with_reconnect_on_drop(mut self, enabled: bool) -> Self {
        self.chain = self.chain.with_reconnect_on_drop(enabled);
        self
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    /// Run one execution to completion
    ///
    /// Failures are reported through the returned report and the session's terminal
    /// event; use [`ExecutionReport::into_result`] for `?`-style handling.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionReport {
        match self.register(&request.session_id) {
            Ok(guard) => self.run_registered(request, guard).await,
            Err(error) => rejected_report(&request, error),
        }
    }

    /// Run an execution on its own Tokio task
    ///
    /// The session is registered before the task starts, so a second `spawn` for the same
    /// session is rejected even if the first has not been polled yet.
    pub fn spawn(self: &Arc<Self>, request: ExecutionRequest) -> JoinHandle<ExecutionReport> {
        let registered = self.register(&request.session_id);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match registered {
                Ok(guard) => dispatcher.run_registered(request, guard).await,
                Err(error) => rejected_report(&request, error),
            }
        })
    }

    /// Request cooperative cancellation, `false` when the session has no execution
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(active) => {
                info!(
                    session_id = %session_id,
                    execution_id = %active.execution_id,
                    "🛑 Cancellation requested"
                );
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, session_id: &str) -> Option<ExecutionState> {
        self.active
            .get(session_id)
            .map(|active| active.state.lock().current_state())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        sessions.sort();
        sessions
    }

    /// Deliver an operator's answer coming back from the transport
    pub fn respond(&self, response: InteractionResponse) -> ResolveOutcome {
        self.broker.respond(response)
    }

    fn register(&self, session_id: &str) -> Result<ActiveGuard> {
        match self.active.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(ProvisionerError::ExecutionAlreadyActive(
                session_id.to_string(),
            )),
            Entry::Vacant(slot) => {
                let execution_id = Uuid::new_v4().to_string();
                let cancel = CancellationToken::new();
                let state = Arc::new(Mutex::new(ExecutionStateMachine::new(
                    execution_id.clone(),
                )));
                slot.insert(ActiveExecution {
                    execution_id: execution_id.clone(),
                    cancel: cancel.clone(),
                    state: Arc::clone(&state),
                });
                Ok(ActiveGuard {
                    active: Arc::clone(&self.active),
                    session_id: session_id.to_string(),
                    execution_id,
                    cancel,
                    state,
                })
            }
        }
    }

    async fn run_registered(&self, request: ExecutionRequest, guard: ActiveGuard) -> ExecutionReport {
        let started_at = Utc::now();
        let session_id = request.session_id.clone();
        let execution_id = guard.execution_id.clone();

        log_execution!(info, "Execution accepted",
            session_id: session_id,
            execution_id: execution_id,
            script_id: request.script_id
        );

        let mut steps: Vec<StepReport> = Vec::new();
        let mut snapshot = ContextSnapshot::default();

        let finish = match self.prepare(&request, &guard).await {
            Err(ProvisionerError::Cancelled) => Finish::Cancelled,
            Err(error) => Finish::Failed(error),
            Ok((definition, mut context)) => {
                let finish = self.run_chain(&definition, &mut context, &mut steps).await;
                if let Some(connection) = context.take_connection() {
                    self.pool.release(connection).await;
                }
                snapshot = context.snapshot();
                finish
            }
        };

        let state = self.finish(&session_id, &execution_id, &guard, &finish).await;
        self.reporter.forget_session(&session_id);

        let error = match finish {
            Finish::Completed => None,
            Finish::Failed(error) => Some(error),
            Finish::Cancelled => Some(ProvisionerError::Cancelled),
        };

        drop(guard);

        ExecutionReport {
            session_id,
            execution_id,
            script_id: request.script_id,
            state,
            steps,
            error,
            snapshot,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Everything before the first step: resolve, validate, seed, connect
    async fn prepare(
        &self,
        request: &ExecutionRequest,
        guard: &ActiveGuard,
    ) -> Result<(Arc<ScriptDefinition>, ExecutionContext)> {
        guard.state.lock().transition(ExecutionEvent::Validate)?;

        let definition = self.registry.resolve(&request.script_id).await?;
        let parameters = validate_parameters(&definition, request)?;

        let mut context = ExecutionContext::new(
            &request.session_id,
            &guard.execution_id,
            request.connection.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.broker),
        )
        .with_interaction_timeout(self.interaction_timeout)
        .with_cancellation(guard.cancel.clone())
        .with_state(Arc::clone(&guard.state))
        .with_interaction_allowed(definition.classification().allows_interaction());

        for parameter in parameters {
            context.declare_variable(&parameter.name, parameter.ty)?;
            if let Some(value) = parameter.value {
                context.set_variable(&parameter.name, value)?;
            }
        }

        let connection = tokio::select! {
            biased;
            _ = guard.cancel.cancelled() => return Err(ProvisionerError::Cancelled),
            acquired = self.pool.acquire(&request.connection) => acquired?,
        };
        context.attach_connection(connection);

        context.transition(ExecutionEvent::Start)?;
        self.reporter
            .publish(
                ProgressEvent::started(&request.session_id, definition.id()).with_payload(json!({
                    "executionId": guard.execution_id,
                    "scriptId": definition.id(),
                    "classification": definition.classification(),
                    "steps": definition.step_names(),
                })),
            )
            .await;

        Ok((definition, context))
    }

    async fn run_chain(
        &self,
        definition: &ScriptDefinition,
        context: &mut ExecutionContext,
        steps: &mut Vec<StepReport>,
    ) -> Finish {
        let result = self.chain.run(definition.steps(), context).await;
        *steps = result.steps;
        match result.outcome {
            ChainOutcome::Completed => Finish::Completed,
            ChainOutcome::Failed { error, .. } => Finish::Failed(error),
            ChainOutcome::Cancelled { .. } => Finish::Cancelled,
        }
    }

    /// Record the terminal state and publish the single terminal event
    async fn finish(
        &self,
        session_id: &str,
        execution_id: &str,
        guard: &ActiveGuard,
        finish: &Finish,
    ) -> ExecutionState {
        let event = match finish {
            Finish::Completed => ExecutionEvent::Complete,
            Finish::Failed(error) => ExecutionEvent::Fail(error.to_string()),
            Finish::Cancelled => ExecutionEvent::Cancel,
        };

        let state = {
            let mut machine = guard.state.lock();
            if let Err(e) = machine.transition(event) {
                warn!(execution_id = %execution_id, error = %e, "Terminal transition rejected");
            }
            machine.current_state()
        };

        let terminal = match finish {
            Finish::Completed => {
                log_execution!(info, "✅ Execution completed",
                    session_id: session_id,
                    execution_id: execution_id
                );
                ProgressEvent::completed(session_id)
                    .with_payload(json!({ "executionId": execution_id }))
            }
            Finish::Failed(error) if matches!(error, ProvisionerError::InteractionTimeout { .. }) => {
                log_execution!(warn, "⏰ Execution timed out waiting for input",
                    session_id: session_id,
                    execution_id: execution_id
                );
                ProgressEvent::timeout(session_id, error.user_message()).with_payload(json!({
                    "code": error.error_code(),
                    "correlationId": execution_id,
                }))
            }
            Finish::Failed(error) => {
                log_execution!(error, "❌ Execution failed",
                    session_id: session_id,
                    execution_id: execution_id,
                    code: error.error_code(),
                    error: error.to_string()
                );
                let mut payload = json!({
                    "code": error.error_code(),
                    "correlationId": execution_id,
                });
                if let ProvisionerError::ParameterValidation(fields) = error {
                    payload["fields"] = json!(fields
                        .iter()
                        .map(|f: &FieldError| json!({ "field": f.field, "message": f.message }))
                        .collect::<Vec<_>>());
                }
                ProgressEvent::error(session_id, error.user_message()).with_payload(payload)
            }
            Finish::Cancelled => {
                log_execution!(info, "🛑 Execution cancelled",
                    session_id: session_id,
                    execution_id: execution_id
                );
                ProgressEvent::error(session_id, "Execution cancelled".to_string())
                    .with_status(StepStatus::Cancelled)
                    .with_payload(json!({
                        "code": ProvisionerError::Cancelled.error_code(),
                        "correlationId": execution_id,
                    }))
            }
        };

        self.reporter.publish(terminal).await;
        debug!(session_id = %session_id, state = %state, "Terminal event published");
        state
    }
}

fn validate_parameters(
    definition: &ScriptDefinition,
    request: &ExecutionRequest,
) -> Result<Vec<ValidatedParameter>> {
    if !definition.classification().accepts_parameters() {
        if request.parameters.is_empty() {
            return Ok(Vec::new());
        }
        let mut names: Vec<&String> = request.parameters.keys().collect();
        names.sort();
        return Err(ProvisionerError::ParameterValidation(
            names
                .into_iter()
                .map(|name| FieldError::new(name.as_str(), "script takes no parameters"))
                .collect(),
        ));
    }

    definition
        .schema()
        .validate(&request.parameters)
        .map_err(ProvisionerError::ParameterValidation)
}

/// Report for a request turned away before it was registered
fn rejected_report(request: &ExecutionRequest, error: ProvisionerError) -> ExecutionReport {
    warn!(
        session_id = %request.session_id,
        script_id = %request.script_id,
        error = %error,
        "Execution rejected"
    );
    let now = Utc::now();
    ExecutionReport {
        session_id: request.session_id.clone(),
        execution_id: String::new(),
        script_id: request.script_id.clone(),
        state: ExecutionState::Failed,
        steps: Vec::new(),
        error: Some(error),
        snapshot: ContextSnapshot::default(),
        started_at: now,
        finished_at: now,
    }
}

impl std::fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDispatcher")
            .field("registry", &self.registry)
            .field("active", &self.active.len())
            .field("interaction_timeout", &self.interaction_timeout)
            .finish()
    }
}
