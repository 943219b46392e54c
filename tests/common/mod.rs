//! Shared fixtures for integration tests
//!
//! `FakeHost` stands in for a remote Linux machine: commands are answered from scripted
//! rules matched by substring, every command is recorded, and connects can be made to
//! fail or sessions to drop on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::config::ProvisionerConfig;
use provisioner_core::constants::{HEALTH_CHECK_COMMAND, HEALTH_CHECK_EXPECTED};
use provisioner_core::events::{ChannelTransport, ProgressEvent, ProgressEventKind, ProgressReporter};
use provisioner_core::interaction::InteractionBroker;
use provisioner_core::orchestration::ExecutionDispatcher;
use provisioner_core::registry::ScriptRegistry;
use provisioner_core::ssh::{
    CommandResult, ConnectionConfig, Credential, SessionError, SshConnectionManager,
    SshConnector, SshSession,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Rule {
    pattern: String,
    result: CommandResult,
    delay: Option<Duration>,
}

/// Scripted remote host shared by every session it hands out
#[derive(Default)]
pub struct FakeHost {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    failing_connects: AtomicU32,
    reject_auth: AtomicBool,
    unhealthy: AtomicBool,
    drop_on: Mutex<Option<String>>,
    connect_delay: Mutex<Option<Duration>>,
    connects: AtomicU32,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer any command containing `pattern`; earlier rules win
    pub fn respond(&self, pattern: &str, result: CommandResult) -> &Self {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            result,
            delay: None,
        });
        self
    }

    pub fn respond_after(&self, pattern: &str, delay: Duration, result: CommandResult) -> &Self {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            result,
            delay: Some(delay),
        });
        self
    }

    /// Fail the next `count` connects with a network error
    pub fn fail_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn reject_auth(&self) {
        self.reject_auth.store(true, Ordering::SeqCst);
    }

    /// Make every open session fail the pool's health check
    pub fn fail_health_checks(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Drop the session the first time a command containing `pattern` runs
    pub fn drop_once_on(&self, pattern: &str) {
        *self.drop_on.lock() = Some(pattern.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands.lock().iter().any(|c| c.contains(pattern))
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live_sessions(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn lookup(&self, command: &str) -> (CommandResult, Option<Duration>) {
        self.rules
            .lock()
            .iter()
            .find(|rule| command.contains(&rule.pattern))
            .map(|rule| (rule.result.clone(), rule.delay))
            .unwrap_or_else(|| (CommandResult::success(""), None))
    }
}

pub struct FakeSession {
    host: Arc<FakeHost>,
    dropped: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl SshSession for FakeSession {
    async fn exec(&self, command: &str) -> Result<CommandResult, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Transport("session closed".to_string()));
        }
        if command == HEALTH_CHECK_COMMAND {
            if self.host.unhealthy.load(Ordering::SeqCst) {
                return Ok(CommandResult::failure(1, "fork: Resource temporarily unavailable"));
            }
            return Ok(CommandResult::success(HEALTH_CHECK_EXPECTED));
        }

        self.host.commands.lock().push(command.to_string());

        let dropped = {
            let mut drop_on = self.host.drop_on.lock();
            match drop_on.as_deref() {
                Some(pattern) if command.contains(pattern) => {
                    drop_on.take();
                    true
                }
                _ => false,
            }
        };
        if dropped {
            self.dropped.store(true, Ordering::SeqCst);
            return Err(SessionError::Transport("connection reset by peer".to_string()));
        }

        let (result, delay) = self.host.lookup(command);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(result)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.host.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.dropped.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConnector {
    host: Arc<FakeHost>,
}

impl FakeConnector {
    pub fn new(host: Arc<FakeHost>) -> Arc<Self> {
        Arc::new(Self { host })
    }
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
        _timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError> {
        self.host.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.host.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.host.reject_auth.load(Ordering::SeqCst) {
            return Err(SessionError::Auth("permission denied".to_string()));
        }
        let failing = self.host.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.host
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(SessionError::Connect("connection refused".to_string()));
        }

        let live = self.host.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.host.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            host: Arc::clone(&self.host),
            dropped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

pub fn target() -> ConnectionConfig {
    ConnectionConfig::new(
        "10.0.0.5",
        22,
        "root",
        Credential::Password {
            password: "secret".to_string(),
        },
    )
}

/// Defaults tuned so retries and backoff finish in milliseconds
pub fn fast_config() -> ProvisionerConfig {
    let mut config = ProvisionerConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.ssh.acquire_timeout_ms = 200;
    config
}

pub fn pool_for(host: &Arc<FakeHost>, config: &ProvisionerConfig) -> Arc<SshConnectionManager> {
    Arc::new(SshConnectionManager::from_config(
        FakeConnector::new(Arc::clone(host)),
        config,
    ))
}

/// Full dispatcher stack over a fake host
pub struct Harness {
    pub host: Arc<FakeHost>,
    pub transport: Arc<ChannelTransport>,
    pub reporter: Arc<ProgressReporter>,
    pub broker: Arc<InteractionBroker>,
    pub pool: Arc<SshConnectionManager>,
    pub registry: Arc<ScriptRegistry>,
    pub dispatcher: Arc<ExecutionDispatcher>,
}

impl Harness {
    pub fn new(registry: ScriptRegistry) -> Self {
        Self::with_interaction_timeout(registry, Duration::from_secs(5))
    }

    pub fn with_interaction_timeout(registry: ScriptRegistry, timeout: Duration) -> Self {
        let config = fast_config();
        let host = FakeHost::new();
        let transport = Arc::new(ChannelTransport::new(256));
        let reporter = Arc::new(ProgressReporter::new(
            transport.clone(),
            Duration::from_millis(200),
        ));
        let broker = Arc::new(InteractionBroker::new(Arc::clone(&reporter)));
        let pool = pool_for(&host, &config);
        let registry = Arc::new(registry);
        let dispatcher = Arc::new(
            ExecutionDispatcher::from_config(
                Arc::clone(&registry),
                Arc::clone(&pool),
                Arc::clone(&broker),
                Arc::clone(&reporter),
                &config,
            )
            .with_interaction_timeout(timeout),
        );

        Self {
            host,
            transport,
            reporter,
            broker,
            pool,
            registry,
            dispatcher,
        }
    }
}

/// Everything already delivered to `receiver`
pub fn drain(receiver: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the next event of `kind`, discarding others
pub async fn next_of_kind(
    receiver: &mut mpsc::Receiver<ProgressEvent>,
    kind: ProgressEventKind,
) -> ProgressEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match receiver.recv().await {
                Some(event) if event.kind == kind => return event,
                Some(_) => continue,
                None => panic!("event stream closed before {kind}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} event within 5s"))
}

pub fn kinds(events: &[ProgressEvent]) -> Vec<ProgressEventKind> {
    events.iter().map(|e| e.kind).collect()
}

pub fn terminal_count(events: &[ProgressEvent]) -> usize {
    events.iter().filter(|e| e.kind.is_terminal()).count()
}
