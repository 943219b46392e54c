//! # SSH Transport
//!
//! Connection configuration, the session seams, the `russh` client and the pooled,
//! retrying [`SshConnectionManager`].

pub mod backoff;
pub mod client;
pub mod connection;
pub mod pool;
pub mod session;
pub mod types;

pub use backoff::BackoffPolicy;
pub use client::{RusshConnector, RusshSession};
pub use connection::Connection;
pub use pool::{PoolStats, SshConnectionManager};
pub use session::{SessionError, SshConnector, SshSession};
pub use types::{CommandResult, ConnectionConfig, Credential, PoolKey};
