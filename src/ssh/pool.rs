//! # SSH Connection Manager
//!
//! Bounded, per-key pool of SSH sessions keyed by (host, port, user).
//!
//! Each key owns a semaphore sized to `max_connections_per_key`. A leased connection holds
//! one permit; idle connections hold none, and a new session is only opened when no idle
//! one is available, so live sessions per key never exceed the bound. Callers beyond the
//! bound queue for up to `acquire_timeout`, and at most `max_waiters_per_key` may queue.
//!
//! New sessions are opened with exponential backoff and jitter. Each key has its own
//! circuit breaker: once open, `acquire` fails immediately with `CircuitOpen`.
//! Connection errors are retried here only. A session that drops while a command runs is
//! reported as `CommandExecution { kind: ConnectionLost }` and never retried by the pool.

use super::backoff::BackoffPolicy;
use super::connection::Connection;
use super::session::{SessionError, SshConnector};
use super::types::{CommandResult, ConnectionConfig, PoolKey};
use crate::config::{CircuitBreakerSettings, ProvisionerConfig, RetryConfig, SshConfig};
use crate::constants::{command_preview, HEALTH_CHECK_COMMAND, HEALTH_CHECK_EXPECTED};
use crate::error::{CommandFailureKind, ProvisionerError, Result};
use crate::log_ssh;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct KeyPool {
    idle: Mutex<VecDeque<Connection>>,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    breaker: Option<CircuitBreaker>,
}

/// Decrements the waiter count when the queued caller leaves, however it leaves
struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time view of one key's pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub key: PoolKey,
    pub idle: usize,
    pub leased: usize,
    pub waiting: usize,
    pub circuit_state: Option<CircuitState>,
}

pub struct SshConnectionManager {
    connector: Arc<dyn SshConnector>,
    config: SshConfig,
    backoff: BackoffPolicy,
    breaker_settings: CircuitBreakerSettings,
    pools: DashMap<PoolKey, Arc<KeyPool>>,
    shut_down: AtomicBool,
}

impl SshConnectionManager {
    pub fn new(
        connector: Arc<dyn SshConnector>,
        config: SshConfig,
        retry: &RetryConfig,
        breaker_settings: CircuitBreakerSettings,
    ) -> Self {
        info!(
            max_connections_per_key = config.max_connections_per_key,
            max_waiters_per_key = config.max_waiters_per_key,
            retry_attempts = retry.max_attempts,
            circuit_breaker_enabled = breaker_settings.enabled,
            "🔌 SSH connection manager initialized"
        );

        Self {
            connector,
            config,
            backoff: retry.to_backoff_policy(),
            breaker_settings,
            pools: DashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn from_config(connector: Arc<dyn SshConnector>, config: &ProvisionerConfig) -> Self {
        Self::new(
            connector,
            config.ssh.clone(),
            &config.retry,
            config.circuit_breaker.clone(),
        )
    }

    fn pool_for(&self, key: &PoolKey) -> Arc<KeyPool> {
        self.pools
            .entry(key.clone())
            .or_insert_with(|| {
                let breaker = self.breaker_settings.enabled.then(|| {
                    CircuitBreaker::new(
                        key.to_string(),
                        self.breaker_settings.to_resilience_config(),
                    )
                });
                Arc::new(KeyPool {
                    idle: Mutex::new(VecDeque::new()),
                    permits: Arc::new(Semaphore::new(self.config.max_connections_per_key)),
                    waiting: AtomicUsize::new(0),
                    breaker,
                })
            })
            .clone()
    }

    /// Lease a healthy connection for `config`, reusing an idle one when possible
    pub async fn acquire(&self, config: &ConnectionConfig) -> Result<Connection> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ProvisionerError::Internal(
                "SSH connection manager is shut down".to_string(),
            ));
        }

        let key = config.pool_key();
        let pool = self.pool_for(&key);

        if let Some(breaker) = &pool.breaker {
            if !breaker.allow_request() {
                log_ssh!(warn, "Acquire rejected, circuit open", key: key);
                return Err(ProvisionerError::CircuitOpen {
                    key: key.to_string(),
                });
            }
        }

        let permit = match pool.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = pool.waiting.fetch_add(1, Ordering::AcqRel);
                let _guard = WaiterGuard(&pool.waiting);
                if queued >= self.config.max_waiters_per_key {
                    log_ssh!(warn, "Acquire rejected, wait queue full", key: key, waiting: queued);
                    return Err(ProvisionerError::PoolExhausted {
                        key: key.to_string(),
                        waited: Duration::ZERO,
                    });
                }

                let started = Instant::now();
                match tokio::time::timeout(
                    self.config.acquire_timeout(),
                    pool.permits.clone().acquire_owned(),
                )
                .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(ProvisionerError::Internal(format!(
                            "connection pool for {key} was closed"
                        )))
                    }
                    Err(_) => {
                        log_ssh!(warn, "Acquire timed out", key: key, waited_ms: started.elapsed().as_millis());
                        return Err(ProvisionerError::PoolExhausted {
                            key: key.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        };

        while let Some(candidate) = self.pop_idle(&pool) {
            if candidate.idle_for() > self.config.idle_ttl() || !candidate.is_connected() {
                self.close_connection(candidate, "expired while idle").await;
                continue;
            }
            if self.config.test_on_acquire && !self.test_connection(&candidate).await {
                self.close_connection(candidate, "failed health check").await;
                continue;
            }

            let mut connection = candidate;
            connection.permit = Some(permit);
            connection.touch();
            log_ssh!(debug, "Reusing idle connection", key: key, connection_id: connection.id());
            return Ok(connection);
        }

        let mut connection = self.connect_with_retry(config, &pool).await?;
        connection.permit = Some(permit);
        Ok(connection)
    }

    fn pop_idle(&self, pool: &KeyPool) -> Option<Connection> {
        pool.idle.lock().pop_back()
    }

    async fn connect_with_retry(
        &self,
        config: &ConnectionConfig,
        pool: &KeyPool,
    ) -> Result<Connection> {
        let key = config.pool_key();
        let timeout = self.config.connect_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match &pool.breaker {
                Some(breaker) => {
                    breaker
                        .call(|| self.connector.connect(config, timeout))
                        .await
                }
                None => self
                    .connector
                    .connect(config, timeout)
                    .await
                    .map_err(CircuitBreakerError::OperationFailed),
            };

            let error = match outcome {
                Ok(session) => {
                    let connection = Connection::new(key.clone(), session);
                    log_ssh!(info, "SSH connection established", key: key, attempt: attempt, connection_id: connection.id());
                    return Ok(connection);
                }
                Err(CircuitBreakerError::CircuitOpen { component }) => {
                    return Err(ProvisionerError::CircuitOpen { key: component });
                }
                Err(CircuitBreakerError::OperationFailed(error)) => error,
            };

            let retryable = !matches!(error, SessionError::Auth(_));
            if !retryable || !self.backoff.should_retry(attempt) {
                log_ssh!(warn, "SSH connection failed", key: key, attempts: attempt, error: error.to_string());
                return Err(ProvisionerError::Connection {
                    host: config.host.clone(),
                    port: config.port,
                    user: config.username.clone(),
                    attempts: attempt,
                    reason: error.to_string(),
                });
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            log_ssh!(debug, "SSH connection attempt failed, backing off", key: key, attempt: attempt, delay_ms: delay.as_millis(), error: error.to_string());
            tokio::time::sleep(delay).await;
        }
    }

    /// Return a leased connection; healthy ones go back to the idle set
    pub async fn release(&self, mut connection: Connection) {
        connection.permit.take();

        if self.shut_down.load(Ordering::Acquire) {
            self.close_connection(connection, "manager shut down").await;
            return;
        }
        if !connection.is_connected() {
            self.close_connection(connection, "released disconnected").await;
            return;
        }

        connection.touch();
        let pool = self.pool_for(connection.key());
        debug!(connection_id = %connection.id(), key = %connection.key(), "Connection returned to pool");
        pool.idle.lock().push_back(connection);
    }

    /// Close a connection instead of returning it to the pool
    pub async fn evict(&self, mut connection: Connection) {
        connection.permit.take();
        self.close_connection(connection, "evicted").await;
    }

    async fn close_connection(&self, connection: Connection, reason: &str) {
        connection.mark_disconnected();
        connection.session.close().await;
        debug!(
            connection_id = %connection.id(),
            key = %connection.key(),
            reason = reason,
            "Connection closed"
        );
    }

    /// Run a trivial command within the health-check timeout
    pub async fn test_connection(&self, connection: &Connection) -> bool {
        if !connection.is_connected() {
            return false;
        }

        let healthy = matches!(
            tokio::time::timeout(
                self.config.health_check_timeout(),
                connection.session.exec(HEALTH_CHECK_COMMAND),
            )
            .await,
            Ok(Ok(ref result)) if result.is_success() && result.stdout_trimmed() == HEALTH_CHECK_EXPECTED
        );

        connection.record_health_check();
        if !healthy {
            connection.mark_disconnected();
            log_ssh!(debug, "Connection failed health check", key: connection.key());
        }
        healthy
    }

    /// Run `command` on `connection`, bounded by `timeout`
    ///
    /// A non-zero exit is returned as a normal [`CommandResult`]; only timeouts and
    /// transport failures are errors.
    pub async fn execute(
        &self,
        connection: &Connection,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.execute_with_preview(connection, command, &command_preview(command), timeout)
            .await
    }

    /// As [`execute`](Self::execute), logging and reporting `preview` instead of `command`
    ///
    /// Callers whose command carries secrets pass a masked preview; the raw command is only
    /// sent to the remote host.
    pub async fn execute_with_preview(
        &self,
        connection: &Connection,
        command: &str,
        preview: &str,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let preview = preview.to_string();

        if !connection.is_connected() {
            return Err(ProvisionerError::CommandExecution {
                command: preview,
                exit_code: None,
                stderr: "connection is not open".to_string(),
                kind: CommandFailureKind::ConnectionLost,
            });
        }

        log_ssh!(info, "Executing remote command", key: connection.key(), command: preview);
        let started = Instant::now();

        match tokio::time::timeout(timeout, connection.session.exec(command)).await {
            Ok(Ok(result)) => {
                connection.touch();
                log_ssh!(debug, "Remote command finished", key: connection.key(), exit_code: result.exit_code, duration_ms: started.elapsed().as_millis());
                Ok(result)
            }
            Ok(Err(error)) => {
                connection.mark_disconnected();
                warn!(key = %connection.key(), error = %error, command = %preview, "Connection lost during command");
                Err(ProvisionerError::CommandExecution {
                    command: preview,
                    exit_code: None,
                    stderr: error.to_string(),
                    kind: CommandFailureKind::ConnectionLost,
                })
            }
            Err(_) => {
                warn!(key = %connection.key(), timeout_ms = timeout.as_millis() as u64, command = %preview, "Remote command timed out");
                Err(ProvisionerError::CommandExecution {
                    command: preview,
                    exit_code: None,
                    stderr: format!("timed out after {timeout:?}"),
                    kind: CommandFailureKind::Timeout,
                })
            }
        }
    }

    /// Close idle connections past the TTL, returning how many were closed
    pub async fn sweep_idle(&self) -> usize {
        let ttl = self.config.idle_ttl();
        let mut expired = Vec::new();

        for entry in self.pools.iter() {
            let mut idle = entry.value().idle.lock();
            let (keep, stale): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|c: &Connection| c.is_connected() && c.idle_for() <= ttl);
            *idle = VecDeque::from(keep);
            expired.extend(stale);
        }

        let count = expired.len();
        for connection in expired {
            self.close_connection(connection, "idle ttl exceeded").await;
        }
        if count > 0 {
            info!(closed = count, "🧹 Idle SSH connections swept");
        }
        count
    }

    /// Run `sweep_idle` every `sweep_interval` until `cancel` fires
    pub fn spawn_idle_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Idle sweeper stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.sweep_idle().await;
                    }
                }
            }
        })
    }

    /// Close every idle connection; connections released afterwards are closed too
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut drained = Vec::new();
        for entry in self.pools.iter() {
            drained.extend(entry.value().idle.lock().drain(..));
        }
        let count = drained.len();
        for connection in drained {
            self.close_connection(connection, "manager shut down").await;
        }
        info!(closed = count, "SSH connection manager shut down");
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|entry| {
                let pool = entry.value();
                PoolStats {
                    key: entry.key().clone(),
                    idle: pool.idle.lock().len(),
                    leased: self
                        .config
                        .max_connections_per_key
                        .saturating_sub(pool.permits.available_permits()),
                    waiting: pool.waiting.load(Ordering::Acquire),
                    circuit_state: pool.breaker.as_ref().map(CircuitBreaker::state),
                }
            })
            .collect()
    }

    pub fn circuit_state(&self, key: &PoolKey) -> Option<CircuitState> {
        self.pools
            .get(key)
            .and_then(|pool| pool.breaker.as_ref().map(CircuitBreaker::state))
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.command_timeout()
    }
}
