//! Conversation history and context management.

pub mod history;

pub use history::{ConversationHistory, ConversationTurn, TurnRole};
