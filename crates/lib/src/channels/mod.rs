//! Chat platform channel: webhook envelope decoding, signature verification,
//! conversation classification and the handler contract.
//!
//! Handlers implement [`Handler`] and are collected in a [`HandlerRegistry`];
//! the gateway fans every decoded [`Event`] out to all of them.

mod events;
mod handler;
mod registry;
pub mod signature;
mod source;

pub use events::{CallbackEnvelope, Event, EventKind, MessageContent};
pub use handler::{Handler, HandlerResult};
pub use registry::HandlerRegistry;
pub use source::{classify, ChatType, ConversationContext, Source};
