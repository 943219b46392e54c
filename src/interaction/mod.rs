//! # Operator Interaction
//!
//! Mid-execution prompts: the wire types exchanged with the client and the
//! [`InteractionBroker`] that suspends a session until its prompt is answered.

pub mod broker;
pub mod types;

pub use broker::InteractionBroker;
pub use types::{
    parse_confirmation, InteractionPrompt, InteractionRequest, InteractionResponse, PromptKind,
    ResolveOutcome,
};
