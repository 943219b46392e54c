//! # Progress Events
//!
//! Lifecycle, step and interaction events pushed to the client for each session.
//! `ProgressReporter` stamps and forwards events; `ProgressTransport` is the seam to the
//! actual client connection.

pub mod publisher;
pub mod transport;
pub mod types;

pub use publisher::ProgressReporter;
pub use transport::{ChannelTransport, ProgressTransport, TransportError};
pub use types::{ProgressEvent, ProgressEventKind, StepStatus};
