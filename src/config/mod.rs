//! # Configuration
//!
//! Layered configuration for the provisioner engine. Every field carries a serde default,
//! so an empty document (or no document at all) yields a valid configuration.
//!
//! Durations are stored as integer `_secs` / `_ms` fields so they read naturally in YAML
//! and environment variables; accessor methods return [`Duration`]s.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::DEFAULT_GEO_ENDPOINTS;
use crate::resilience::CircuitBreakerConfig;
use crate::ssh::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub ssh: SshConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub interaction: InteractionConfig,
    pub events: EventsConfig,
    pub execution: ExecutionConfig,
    pub detection: DetectionConfig,
    pub scripts: ScriptsConfig,
}

/// SSH pool and command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub health_check_timeout_secs: u64,
    /// Upper bound on live connections per (host, port, user)
    pub max_connections_per_key: usize,
    /// Callers allowed to queue for a connection before `PoolExhausted`
    pub max_waiters_per_key: usize,
    pub acquire_timeout_ms: u64,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub test_on_acquire: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            health_check_timeout_secs: 5,
            max_connections_per_key: 4,
            max_waiters_per_key: 16,
            acquire_timeout_ms: 30_000,
            idle_ttl_secs: 300,
            sweep_interval_secs: 60,
            test_on_acquire: true,
        }
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Connection retry policy applied at acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn to_backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Per-key circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub cool_down_secs: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            window_secs: 60,
            cool_down_secs: 30,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            window: Duration::from_secs(self.window_secs),
            cool_down: Duration::from_secs(self.cool_down_secs),
            success_threshold: self.success_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub default_timeout_secs: u64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 120,
        }
    }
}

impl InteractionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Upper bound on a single publish before the event is dropped
    pub publish_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: 250,
            channel_capacity: 256,
        }
    }
}

impl EventsConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Retry a step once on a fresh connection when the session drops mid-command
    pub reconnect_on_drop: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            reconnect_on_drop: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub probe_timeout_secs: u64,
    pub geo_endpoints: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 5,
            geo_endpoints: DEFAULT_GEO_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl DetectionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Directory holding user-defined scripts as `<id>.yaml`
    pub directory: Option<PathBuf>,
}

impl ProvisionerConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("ssh.connect_timeout_secs", self.ssh.connect_timeout_secs),
            ("ssh.command_timeout_secs", self.ssh.command_timeout_secs),
            (
                "ssh.health_check_timeout_secs",
                self.ssh.health_check_timeout_secs,
            ),
            ("ssh.acquire_timeout_ms", self.ssh.acquire_timeout_ms),
            ("ssh.idle_ttl_secs", self.ssh.idle_ttl_secs),
            ("ssh.sweep_interval_secs", self.ssh.sweep_interval_secs),
            (
                "ssh.max_connections_per_key",
                self.ssh.max_connections_per_key as u64,
            ),
            ("retry.max_attempts", self.retry.max_attempts as u64),
            (
                "circuit_breaker.failure_threshold",
                self.circuit_breaker.failure_threshold as u64,
            ),
            (
                "circuit_breaker.success_threshold",
                self.circuit_breaker.success_threshold as u64,
            ),
            (
                "interaction.default_timeout_secs",
                self.interaction.default_timeout_secs,
            ),
            ("events.publish_timeout_ms", self.events.publish_timeout_ms),
            ("events.channel_capacity", self.events.channel_capacity as u64),
            (
                "detection.probe_timeout_secs",
                self.detection.probe_timeout_secs,
            ),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than 0",
                ));
            }
        }

        if self.retry.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.retry.multiplier,
                "must be at least 1.0",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.retry.jitter_factor,
                "must be between 0.0 and 1.0",
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.retry.base_delay_ms,
                "must not exceed retry.max_delay_ms",
            ));
        }

        Ok(())
    }
}
