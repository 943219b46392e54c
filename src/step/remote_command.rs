use super::condition::StepCondition;
use super::traits::{Step, StepOutput};
use crate::context::{ExecutionContext, VariableType};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Runs one templated shell script on the target host
#[derive(Debug, Clone)]
pub struct RemoteCommandStep {
    name: String,
    script: String,
    condition: StepCondition,
    timeout: Option<Duration>,
    tolerate_failure: bool,
    capture: Option<String>,
}

impl RemoteCommandStep {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            condition: StepCondition::Always,
            timeout: None,
            tolerate_failure: false,
            capture: None,
        }
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Override the context's per-command timeout for this step
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    /// Store trimmed stdout into the named string variable
    pub fn capture_into(mut self, variable: impl Into<String>) -> Self {
        self.capture = Some(variable.into());
        self
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

#[async_trait]
impl Step for RemoteCommandStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_execute(&self, context: &ExecutionContext) -> bool {
        self.condition.evaluate(context)
    }

    async fn execute(&self, context: &mut ExecutionContext) -> Result<StepOutput> {
        if let Some(variable) = &self.capture {
            context.declare_variable(variable, VariableType::String)?;
        }

        let timeout = self.timeout.unwrap_or_else(|| context.command_timeout());
        let result = context.run_script_with_timeout(&self.script, timeout).await?;

        if let Some(variable) = &self.capture {
            context.set_variable(variable, result.stdout_trimmed())?;
        }

        let last_line = result
            .stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string());

        Ok(StepOutput {
            message: last_line,
            payload: Some(json!({ "exitCode": result.exit_code })),
        })
    }

    fn tolerates_failure(&self) -> bool {
        self.tolerate_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::error::{CommandFailureKind, ProvisionerError};
    use crate::events::{ChannelTransport, ProgressReporter};
    use crate::interaction::InteractionBroker;
    use crate::ssh::{
        CommandResult, ConnectionConfig, Credential, SessionError, SshConnectionManager,
        SshConnector, SshSession,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Answers every command with the same result and remembers what it ran
    struct FixedSession {
        result: CommandResult,
        ran: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SshSession for FixedSession {
        async fn exec(&self, command: &str) -> std::result::Result<CommandResult, SessionError> {
            if command == crate::constants::HEALTH_CHECK_COMMAND {
                return Ok(CommandResult::success(crate::constants::HEALTH_CHECK_EXPECTED));
            }
            self.ran.lock().push(command.to_string());
            Ok(self.result.clone())
        }

        async fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct FixedConnector {
        result: CommandResult,
        ran: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SshConnector for FixedConnector {
        async fn connect(
            &self,
            _config: &ConnectionConfig,
            _timeout: Duration,
        ) -> std::result::Result<Box<dyn SshSession>, SessionError> {
            Ok(Box::new(FixedSession {
                result: self.result.clone(),
                ran: Arc::clone(&self.ran),
            }))
        }
    }

    async fn connected_context(
        result: CommandResult,
    ) -> (ExecutionContext, Arc<Mutex<Vec<String>>>) {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let config = ProvisionerConfig::default();
        let reporter = Arc::new(ProgressReporter::new(
            Arc::new(ChannelTransport::new(8)),
            Duration::from_millis(50),
        ));
        let pool = Arc::new(SshConnectionManager::from_config(
            Arc::new(FixedConnector {
                result,
                ran: Arc::clone(&ran),
            }),
            &config,
        ));
        let broker = Arc::new(InteractionBroker::new(reporter));
        let target = ConnectionConfig::new(
            "10.0.0.5",
            22,
            "root",
            Credential::Password {
                password: "pw".to_string(),
            },
        );

        let connection = pool.acquire(&target).await.unwrap();
        let mut context = ExecutionContext::new("s-1", "e-1", target, pool, broker);
        context.attach_connection(connection);
        (context, ran)
    }

    #[tokio::test]
    async fn test_script_is_template_bound_and_stdout_captured() {
        let (mut context, ran) = connected_context(CommandResult::success("active\n")).await;
        context.set_variable("service", "nginx").unwrap();

        let step = RemoteCommandStep::new("status", "systemctl is-active ${service}")
            .capture_into("state");
        let output = step.execute(&mut context).await.unwrap();

        assert_eq!(ran.lock().as_slice(), ["systemctl is-active nginx"]);
        assert_eq!(context.get_string("state").unwrap(), Some("active"));
        assert_eq!(output.message.as_deref(), Some("active"));
        assert_eq!(output.payload.unwrap()["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_the_step() {
        let (mut context, _ran) = connected_context(CommandResult::failure(2, "no such unit")).await;

        let error = RemoteCommandStep::new("status", "systemctl status ghost")
            .execute(&mut context)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ProvisionerError::CommandExecution {
                kind: CommandFailureKind::NonZeroExit,
                exit_code: Some(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_execute_without_connection() {
        let (mut context, _ran) = connected_context(CommandResult::success("")).await;
        context.take_connection();

        let error = RemoteCommandStep::new("uptime", "uptime")
            .execute(&mut context)
            .await
            .unwrap_err();
        assert_eq!(error, ProvisionerError::NotConnected);
    }

    #[test]
    fn test_builder_flags() {
        let step = RemoteCommandStep::new("cleanup", "rm -rf /tmp/stage").tolerate_failure();
        assert!(step.tolerates_failure());
        assert_eq!(step.script(), "rm -rf /tmp/stage");
        assert!(!RemoteCommandStep::new("a", "true").tolerates_failure());
    }
}
