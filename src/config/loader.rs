//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers, lowest precedence first:
//!
//! 1. `provisioner.yaml` in the configuration directory
//! 2. `provisioner.{environment}.yaml` in the same directory
//! 3. Environment variables `PROVISIONER__SECTION__KEY` (e.g. `PROVISIONER__SSH__IDLE_TTL_SECS`)
//!
//! Missing files are skipped. The merged result is validated before it is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::ProvisionerConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_NAME: &str = "provisioner";
const ENV_PREFIX: &str = "PROVISIONER";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: ProvisionerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            config_directory = %config_directory.display(),
            max_connections_per_key = config.ssh.max_connections_per_key,
            retry_attempts = config.retry.max_attempts,
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: ProvisionerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment
    pub fn detect_environment() -> String {
        env::var("PROVISIONER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("PROVISIONER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<ProvisionerConfig> {
        if environment.trim().is_empty() {
            return Err(ConfigurationError::EnvironmentConfigError {
                environment: environment.to_string(),
                error: "environment name must not be blank".to_string(),
            });
        }

        let base_path = config_directory.join(format!("{BASE_FILE_NAME}.yaml"));
        let env_path = config_directory.join(format!("{BASE_FILE_NAME}.{environment}.yaml"));

        debug!(
            base = %base_path.display(),
            base_exists = base_path.is_file(),
            overlay = %env_path.display(),
            overlay_exists = env_path.is_file(),
            "Resolving configuration layers"
        );

        let merged = Config::builder()
            .add_source(File::from(base_path).required(false))
            .add_source(File::from(env_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        merged
            .try_deserialize::<ProvisionerConfig>()
            .map_err(|e| ConfigurationError::load_error(config_directory.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().join("absent")),
            "test",
        )
        .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().ssh.idle_ttl_secs, 300);
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("provisioner.yaml"),
            "ssh:\n  idle_ttl_secs: 120\n  sweep_interval_secs: 30\nretry:\n  max_attempts: 4\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("provisioner.production.yaml"),
            "ssh:\n  idle_ttl_secs: 600\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "production")
                .unwrap();
        let config = manager.config();

        assert_eq!(config.ssh.idle_ttl_secs, 600);
        assert_eq!(config.ssh.sweep_interval_secs, 30);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("provisioner.yaml"),
            "events:\n  publish_timeout_ms: 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "events.publish_timeout_ms"
        ));
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("provisioner.yaml"),
            "events:\n  channel_capacity: 32\n",
        )
        .unwrap();

        env::set_var("PROVISIONER__EVENTS__CHANNEL_CAPACITY", "64");
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        env::remove_var("PROVISIONER__EVENTS__CHANNEL_CAPACITY");

        assert_eq!(manager.unwrap().config().events.channel_capacity, 64);
    }
}
