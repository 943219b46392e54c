use super::template;
use super::variables::{VariableStore, VariableType};
use crate::constants::{command_preview, REDACTED};
use crate::error::{ProvisionerError, Result};
use crate::interaction::{InteractionBroker, InteractionPrompt, PromptKind};
use crate::log_execution;
use crate::ssh::{CommandResult, Connection, ConnectionConfig, SshConnectionManager};
use crate::state_machine::{ExecutionEvent, ExecutionState, ExecutionStateMachine};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Diagnostic copy of the context's scopes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub ambient: BTreeMap<String, Value>,
    pub variables: BTreeMap<String, Value>,
}

/// Per-execution state shared by every step of one chain
///
/// Holds the leased SSH connection and three scopes: untyped ambient properties, typed
/// declared variables and plain template bindings. Created when an execution starts and
/// dropped when its chain finishes.
pub struct ExecutionContext {
    session_id: String,
    execution_id: String,
    connection_config: ConnectionConfig,
    connection: Option<Connection>,
    pool: Arc<SshConnectionManager>,
    broker: Arc<InteractionBroker>,
    command_timeout: Duration,
    interaction_timeout: Duration,
    ambient: HashMap<String, Value>,
    variables: VariableStore,
    bindings: HashMap<String, String>,
    /// Variables whose values are masked in snapshots
    secrets: HashSet<String>,
    cancel: CancellationToken,
    state: Arc<Mutex<ExecutionStateMachine>>,
    current_step: Option<String>,
    /// False for scripts whose classification forbids operator prompts
    interaction_allowed: bool,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        execution_id: impl Into<String>,
        connection_config: ConnectionConfig,
        pool: Arc<SshConnectionManager>,
        broker: Arc<InteractionBroker>,
    ) -> Self {
        let execution_id = execution_id.into();
        let command_timeout = pool.command_timeout();
        Self {
            session_id: session_id.into(),
            state: Arc::new(Mutex::new(ExecutionStateMachine::new(execution_id.clone()))),
            execution_id,
            connection_config,
            connection: None,
            pool,
            broker,
            command_timeout,
            interaction_timeout: crate::constants::DEFAULT_INTERACTION_TIMEOUT,
            ambient: HashMap::new(),
            variables: VariableStore::new(),
            bindings: HashMap::new(),
            secrets: HashSet::new(),
            cancel: CancellationToken::new(),
            current_step: None,
            interaction_allowed: true,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.interaction_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_interaction_allowed(mut self, allowed: bool) -> Self {
        self.interaction_allowed = allowed;
        self
    }

    /// Share the state machine with an external observer (the dispatcher)
    pub fn with_state(mut self, state: Arc<Mutex<ExecutionStateMachine>>) -> Self {
        self.state = state;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn interaction_timeout(&self) -> Duration {
        self.interaction_timeout
    }

    // Ambient properties

    pub fn set_ambient(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.ambient.insert(key.into(), value.into());
    }

    pub fn get_ambient(&self, key: &str) -> Option<&Value> {
        self.ambient.get(key)
    }

    pub fn ambient_str(&self, key: &str) -> Option<&str> {
        self.ambient.get(key).and_then(Value::as_str)
    }

    // Declared variables

    pub fn declare_variable(&mut self, name: &str, ty: VariableType) -> Result<()> {
        self.variables.declare(name, ty)
    }

    /// Write a variable; the first write or declaration fixes its type
    pub fn set_variable(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.variables.set(name, value.into())
    }

    pub fn get_variable(&self, name: &str, ty: VariableType) -> Result<Option<&Value>> {
        self.variables.get(name, ty)
    }

    pub fn get_string(&self, name: &str) -> Result<Option<&str>> {
        Ok(self
            .variables
            .get(name, VariableType::String)?
            .and_then(Value::as_str))
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        Ok(self
            .variables
            .get(name, VariableType::Bool)?
            .and_then(Value::as_bool))
    }

    pub fn get_int(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .variables
            .get(name, VariableType::Int)?
            .and_then(Value::as_i64))
    }

    /// Mask `name` in snapshots, command logs and error reports
    pub fn mark_secret(&mut self, name: &str) {
        self.secrets.insert(name.to_string());
    }

    /// Untyped read used by step conditions
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.value(name)
    }

    // Template bindings

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Substitute `${name}` from bindings, then variables, then ambient properties
    pub fn bind_template(&self, text: &str) -> String {
        template::render(text, |name| self.lookup(name))
    }

    /// As [`bind_template`](Self::bind_template), with secret variables masked
    pub fn redacted_template(&self, text: &str) -> String {
        template::render(text, |name| {
            if self.secrets.contains(name) {
                Some(REDACTED.to_string())
            } else {
                self.lookup(name)
            }
        })
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.bindings
            .get(name)
            .cloned()
            .or_else(|| self.variables.value(name).map(template::value_to_text))
            .or_else(|| self.ambient.get(name).map(template::value_to_text))
    }

    // Remote execution

    pub fn attach_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    pub fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Render and run `script`, returning its result whatever the exit code
    pub async fn execute(&self, script: &str) -> Result<CommandResult> {
        self.execute_with_timeout(script, self.command_timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.execute_rendered(script, timeout).await
    }

    /// Render and run `script`, failing on a non-zero exit
    pub async fn run_script(&self, script: &str) -> Result<CommandResult> {
        self.run_script_with_timeout(script, self.command_timeout)
            .await
    }

    pub async fn run_script_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.execute_rendered(script, timeout)
            .await?
            .ensure_success(&self.redacted_template(script))
    }

    /// Render `script` and run it; only the redacted rendering is ever logged
    async fn execute_rendered(&self, script: &str, timeout: Duration) -> Result<CommandResult> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(ProvisionerError::NotConnected)?;

        let command = self.bind_template(script);
        let preview = command_preview(&self.redacted_template(script));

        log_execution!(debug, "Remote execute",
            session_id: self.session_id,
            execution_id: self.execution_id,
            step: self.current_step,
            command: preview
        );

        self.pool
            .execute_with_preview(connection, &command, &preview, timeout)
            .await
    }

    /// Replace a dropped connection with a fresh one from the pool
    pub async fn reconnect(&mut self) -> Result<()> {
        if let Some(dead) = self.connection.take() {
            self.pool.evict(dead).await;
        }

        log_execution!(info, "Reconnecting",
            session_id: self.session_id,
            execution_id: self.execution_id,
            step: self.current_step
        );

        let fresh = self.pool.acquire(&self.connection_config).await?;
        self.connection = Some(fresh);
        Ok(())
    }

    // Interaction

    /// Ask the operator, suspending this execution until answered, defaulted or cancelled
    pub async fn prompt(&mut self, mut prompt: InteractionPrompt) -> Result<String> {
        if !self.interaction_allowed {
            return Err(ProvisionerError::InteractionRejected {
                session_id: self.session_id.clone(),
                reason: "script is not interactive".to_string(),
            });
        }

        prompt.message = self.bind_template(&prompt.message);
        self.transition(ExecutionEvent::AwaitInput)?;

        let answer = self
            .broker
            .request_cancellable(
                &self.session_id,
                &prompt,
                self.interaction_timeout,
                &self.cancel,
            )
            .await?;

        self.transition(ExecutionEvent::InputReceived)?;

        if prompt.kind == PromptKind::Password {
            log_execution!(debug, "Interaction answered",
                session_id: self.session_id,
                kind: prompt.kind.to_string()
            );
        } else {
            log_execution!(debug, "Interaction answered",
                session_id: self.session_id,
                kind: prompt.kind.to_string(),
                answer: answer
            );
        }
        Ok(answer)
    }

    // Lifecycle

    pub fn transition(&self, event: ExecutionEvent) -> Result<ExecutionState> {
        Ok(self.state.lock().transition(event)?)
    }

    pub fn state(&self) -> ExecutionState {
        self.state.lock().current_state()
    }

    pub fn state_handle(&self) -> Arc<Mutex<ExecutionStateMachine>> {
        Arc::clone(&self.state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_current_step(&mut self, step: Option<String>) {
        self.current_step = step;
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            ambient: self
                .ambient
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            variables: self
                .variables
                .values()
                .iter()
                .map(|(k, v)| {
                    if self.secrets.contains(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect(),
        }
    }
}
