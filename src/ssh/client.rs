//! `russh` implementation of the session seams.

use super::session::{SessionError, SshConnector, SshSession};
use super::types::{CommandResult, ConnectionConfig, Credential};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::key::{KeyPair, PublicKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Client handler that accepts any host key and logs its fingerprint
struct AcceptingHandler {
    host: String,
}

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct RusshConnector {
    inactivity_timeout: Option<Duration>,
}

impl RusshConnector {
    pub fn new() -> Self {
        Self {
            inactivity_timeout: Some(Duration::from_secs(3600)),
        }
    }

    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    fn load_key(credential: &Credential) -> Result<Option<KeyPair>, SessionError> {
        match credential {
            Credential::Password { .. } => Ok(None),
            Credential::PrivateKey { pem, passphrase } => {
                russh_keys::decode_secret_key(pem, passphrase.as_deref())
                    .map(Some)
                    .map_err(|e| SessionError::Auth(format!("invalid private key: {e}")))
            }
            Credential::KeyFile { path, passphrase } => {
                russh_keys::load_secret_key(path, passphrase.as_deref())
                    .map(Some)
                    .map_err(|e| {
                        SessionError::Auth(format!(
                            "cannot load key file {}: {e}",
                            path.display()
                        ))
                    })
            }
        }
    }

    async fn authenticate(
        handle: &mut Handle<AcceptingHandler>,
        config: &ConnectionConfig,
    ) -> Result<(), SessionError> {
        let accepted = match &config.credential {
            Credential::Password { password } => handle
                .authenticate_password(config.username.as_str(), password.as_str())
                .await
                .map_err(|e| SessionError::Auth(e.to_string()))?,
            other => {
                let key = Self::load_key(other)?
                    .ok_or_else(|| SessionError::Auth("missing key material".to_string()))?;
                handle
                    .authenticate_publickey(config.username.as_str(), Arc::new(key))
                    .await
                    .map_err(|e| SessionError::Auth(e.to_string()))?
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(SessionError::Auth(format!(
                "server rejected {} credential for {}",
                config.credential.kind(),
                config.username
            )))
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError> {
        let client_config = Arc::new(client::Config {
            inactivity_timeout: self.inactivity_timeout,
            ..Default::default()
        });
        let handler = AcceptingHandler {
            host: config.host.clone(),
        };

        let connect = client::connect(
            client_config,
            (config.host.as_str(), config.port),
            handler,
        );
        let mut handle = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| SessionError::Connect(format!("timed out after {timeout:?}")))?
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        Self::authenticate(&mut handle, config).await?;

        Ok(Box::new(RusshSession {
            handle: Mutex::new(handle),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Collects channel messages for one `exec` request
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

impl ExecOutput {
    fn accept(&mut self, message: ChannelMsg) {
        match message {
            ChannelMsg::Data { ref data } => self.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                self.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_code = Some(exit_status as i32);
            }
            // The remote process died; report it like a shell would
            ChannelMsg::ExitSignal {
                signal_name,
                core_dumped,
                error_message,
                ..
            } => {
                let (name, number) = signal_info(&signal_name);
                if !self.stderr.is_empty() && !self.stderr.ends_with(b"\n") {
                    self.stderr.push(b'\n');
                }
                let mut note = format!("killed by signal SIG{name}");
                if core_dumped {
                    note.push_str(" (core dumped)");
                }
                if !error_message.is_empty() {
                    note.push_str(": ");
                    note.push_str(&error_message);
                }
                self.stderr.extend_from_slice(note.as_bytes());
                self.exit_code = Some(number.map_or(255, |n| 128 + n));
            }
            _ => {}
        }
    }

    /// `None` when the channel closed without an exit status or signal
    fn finish(self) -> Option<CommandResult> {
        let exit_code = self.exit_code?;
        Some(CommandResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code,
        })
    }
}

/// Signal name without the `SIG` prefix and its Linux number
fn signal_info(signal: &Sig) -> (&str, Option<i32>) {
    match signal {
        Sig::HUP => ("HUP", Some(1)),
        Sig::INT => ("INT", Some(2)),
        Sig::QUIT => ("QUIT", Some(3)),
        Sig::ILL => ("ILL", Some(4)),
        Sig::ABRT => ("ABRT", Some(6)),
        Sig::FPE => ("FPE", Some(8)),
        Sig::KILL => ("KILL", Some(9)),
        Sig::USR1 => ("USR1", Some(10)),
        Sig::SEGV => ("SEGV", Some(11)),
        Sig::PIPE => ("PIPE", Some(13)),
        Sig::ALRM => ("ALRM", Some(14)),
        Sig::TERM => ("TERM", Some(15)),
        Sig::Custom(name) => (name.as_str(), None),
    }
}

pub struct RusshSession {
    handle: Mutex<Handle<AcceptingHandler>>,
    closed: AtomicBool,
}

impl RusshSession {
    fn transport_error(&self, error: impl ToString) -> SessionError {
        self.closed.store(true, Ordering::Release);
        SessionError::Transport(error.to_string())
    }
}

#[async_trait]
impl SshSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<CommandResult, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Transport("session is closed".to_string()));
        }

        let mut channel = {
            let handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(|e| self.transport_error(e))?
        };

        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error(e))?;

        let mut output = ExecOutput::default();
        while let Some(message) = channel.wait().await {
            output.accept(message);
        }

        output
            .finish()
            .ok_or_else(|| self.transport_error("channel closed before exit status"))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("Error during disconnect: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
