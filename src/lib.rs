//! pacebot: a proactive study-pace assistant.
//!
//! Bridges a Telegram conversation, an OpenAI-style chat model, and a
//! spreadsheet-exported roster of student progress. Each chat is gated
//! behind email verification; once verified, free text flows through the
//! model with a bounded history window, and periodic roster refreshes push
//! unsolicited pace check-ins when a student's metric moves.

pub mod config;
pub mod conversation;
pub mod db;
pub mod dialog;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod progress;
pub mod refresh;
pub mod verification;

pub use error::Result;

use chrono::{DateTime, Utc};

/// Telegram chat id addressing a single conversation.
pub type ChannelId = i64;

/// Telegram user id of the message author.
pub type UserId = i64;

/// Telegram message id, monotonic within a chat.
pub type MessageId = i64;

/// A text message received from the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// The single recognized entry command; everything else is free text.
    pub fn is_start_command(&self) -> bool {
        self.text.trim() == "/start"
    }
}

/// A text message to deliver to a chat, solicited or not.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel_id: ChannelId,
    pub text: String,
}
