//! # Resilience Module
//!
//! Circuit breakers that short-circuit repeated connection attempts to a target that is
//! known to be failing. The SSH pool keeps one breaker per (host, port, user) key.
//!
//! A breaker opens after `failure_threshold` consecutive failures that all fall inside the
//! rolling `window`, rejects calls for `cool_down`, then lets probe calls through in the
//! half-open state until `success_threshold` of them succeed.
//!
//! ```rust,no_run
//! use provisioner_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     window: Duration::from_secs(60),
//!     cool_down: Duration::from_secs(30),
//!     success_threshold: 1,
//! };
//!
//! let breaker = CircuitBreaker::new("root@10.0.0.5:22".to_string(), config);
//! let banner = breaker
//!     .call(|| async { Ok::<&str, std::io::Error>("SSH-2.0-OpenSSH_9.6") })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
