//! Connection configuration, credentials and command results.

use crate::error::{CommandFailureKind, FieldError, ProvisionerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Authentication material for one SSH login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    Password {
        password: String,
    },
    /// PEM/OpenSSH encoded private key text
    PrivateKey {
        pem: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
    KeyFile {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password { .. } => "password",
            Credential::PrivateKey { .. } => "private_key",
            Credential::KeyFile { .. } => "key_file",
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Credential::Password { password } => password.is_empty(),
            Credential::PrivateKey { pem, .. } => pem.trim().is_empty(),
            Credential::KeyFile { path, .. } => path.as_os_str().is_empty(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"[REDACTED]")
                .finish(),
            Credential::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("pem", &"[REDACTED]")
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Target host and login for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

fn default_port() -> u16 {
    crate::constants::DEFAULT_SSH_PORT
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            credential,
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }

    /// Reject blank host, user or credential and a zero port
    pub fn validate(&self) -> Result<(), ProvisionerError> {
        let mut errors = Vec::new();
        if self.host.trim().is_empty() {
            errors.push(FieldError::new("host", "must not be empty"));
        }
        if self.port == 0 {
            errors.push(FieldError::new("port", "must be between 1 and 65535"));
        }
        if self.username.trim().is_empty() {
            errors.push(FieldError::new("username", "must not be empty"));
        }
        if self.credential.is_blank() {
            errors.push(FieldError::new("credential", "must not be empty"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProvisionerError::ParameterValidation(errors))
        }
    }
}

/// Pool identity of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into a `CommandExecution` error
    pub fn ensure_success(self, command: &str) -> Result<Self, ProvisionerError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProvisionerError::CommandExecution {
                command: crate::constants::command_preview(command),
                exit_code: Some(self.exit_code),
                stderr: self.stderr.trim().to_string(),
                kind: CommandFailureKind::NonZeroExit,
            })
        }
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::Password {
            password: "hunter2".to_string(),
        };
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_validate_collects_every_blank_field() {
        let config = ConnectionConfig::new(
            " ",
            0,
            "",
            Credential::Password {
                password: String::new(),
            },
        );

        match config.validate() {
            Err(ProvisionerError::ParameterValidation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["host", "port", "username", "credential"]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_pool_key_display() {
        let config = ConnectionConfig::new(
            "10.0.0.5",
            2222,
            "deploy",
            Credential::Password {
                password: "x".to_string(),
            },
        );
        assert_eq!(config.pool_key().to_string(), "deploy@10.0.0.5:2222");
    }

    #[test]
    fn test_ensure_success_maps_exit_code() {
        let error = CommandResult::failure(127, "command not found\n")
            .ensure_success("dockr ps")
            .unwrap_err();
        assert_eq!(
            error,
            ProvisionerError::CommandExecution {
                command: "dockr ps".to_string(),
                exit_code: Some(127),
                stderr: "command not found".to_string(),
                kind: CommandFailureKind::NonZeroExit,
            }
        );
    }

    #[test]
    fn test_credential_deserializes_tagged() {
        let credential: Credential =
            serde_json::from_str(r#"{"type":"key_file","path":"/home/ops/.ssh/id_ed25519"}"#)
                .unwrap();
        assert_eq!(credential.kind(), "key_file");
    }
}
