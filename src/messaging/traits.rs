//! Messaging transport traits.

use crate::{InboundMessage, OutboundMessage};
use futures::Stream;
use std::pin::Pin;

/// Stream of messages arriving from the transport.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A messaging transport. One adapter per backend; the core consumes the
/// inbound stream and pushes outbound text without knowing which one it is.
pub trait Messaging: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Start receiving. Returns the inbound stream; the adapter owns any
    /// polling or connection machinery behind it.
    fn start(&self) -> impl Future<Output = crate::Result<InboundStream>> + Send;

    /// Deliver a message to a chat, solicited or not.
    fn send(&self, message: OutboundMessage) -> impl Future<Output = crate::Result<()>> + Send;
}
