//! Messaging adapters.

pub mod telegram;
pub mod traits;

pub use telegram::TelegramAdapter;
pub use traits::{InboundStream, Messaging};
