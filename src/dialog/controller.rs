//! Per-channel dialog state machine.
//!
//! A channel is in one of two states, derived from the verification
//! registry on every message rather than cached: `UNVERIFIED` (free text is
//! treated as a candidate email) and `VERIFIED` (free text flows through
//! the model with a bounded history window). Every dependency failure is
//! converted here into a user-facing message plus an operator log record —
//! nothing propagates far enough to kill the channel loop.

use crate::conversation::{ConversationHistory, TurnRole};
use crate::error::VerifyError;
use crate::llm::{ChatClient, ChatMessage};
use crate::progress::{ProgressDelta, ProgressStore, SeverityTier, normalize_identity};
use crate::verification::VerificationRegistry;
use crate::{ChannelId, InboundMessage, OutboundMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Persona for the pre-verification greeting.
const GREETING_PROMPT: &str = "You are a friendly course assistant meeting a new student. \
Greet them warmly and ask for the email they enrolled with, so their course progress can be \
looked up.";

/// Canned greeting when the model is unavailable.
const FALLBACK_GREETING: &str = "Hello! I'm your course assistant. Send me the email you \
enrolled with and I'll look up your progress.";

const NOT_FOUND_REPLY: &str = "I couldn't find that email in the course roster. Check the \
spelling and try again.";

const IDENTITY_TAKEN_REPLY: &str = "That email is already registered from another chat.";

const MODEL_RETRY_REPLY: &str = "Something went wrong on my side. Please try again later.";

fn already_verified_reply(identity: &str) -> String {
    format!("This chat is already verified as {identity}. The binding can't be changed.")
}

fn welcome_fallback(tier: SeverityTier) -> String {
    format!(
        "You're verified! Current standing: {}. Ask me anything about the course.",
        tier.label()
    )
}

/// Everything a channel task needs, bundled for cheap cloning into spawns.
pub struct DialogDeps<C: ChatClient> {
    pub registry: VerificationRegistry,
    pub history: ConversationHistory,
    pub progress: Arc<ProgressStore>,
    pub llm: Arc<C>,
    /// Base persona for verified chat turns.
    pub persona: Arc<str>,
    /// History turns fed to the model context window.
    pub tail: usize,
    pub temperature: f32,
    pub outbound_tx: mpsc::Sender<OutboundMessage>,
}

impl<C: ChatClient> Clone for DialogDeps<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            history: self.history.clone(),
            progress: self.progress.clone(),
            llm: self.llm.clone(),
            persona: self.persona.clone(),
            tail: self.tail,
            temperature: self.temperature,
            outbound_tx: self.outbound_tx.clone(),
        }
    }
}

/// Work items delivered through a channel's mailbox. Progress notifications
/// ride the same mailbox as inbound messages so a channel never runs two
/// transitions at once.
#[derive(Debug)]
pub enum ChannelEvent {
    Inbound(InboundMessage),
    ProgressChanged(ProgressDelta),
}

/// One channel's dialog driver.
pub struct DialogController<C: ChatClient> {
    channel_id: ChannelId,
    deps: DialogDeps<C>,
}

impl<C: ChatClient> DialogController<C> {
    pub fn new(channel_id: ChannelId, deps: DialogDeps<C>) -> Self {
        Self { channel_id, deps }
    }

    /// Drain the mailbox until every sender is gone. Errors are logged and
    /// answered with a generic retry message; the loop itself never exits
    /// on them.
    pub async fn run(self, mut events: mpsc::Receiver<ChannelEvent>) {
        tracing::info!(channel_id = self.channel_id, "dialog channel started");

        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Inbound(message) => {
                    if let Err(error) = self.handle_message(message).await {
                        tracing::error!(
                            %error,
                            channel_id = self.channel_id,
                            "error handling inbound message"
                        );
                        let _ = self.send(MODEL_RETRY_REPLY).await;
                    }
                }
                ChannelEvent::ProgressChanged(delta) => {
                    // Unsolicited; a failure here must stay invisible to the user.
                    if let Err(error) = self.notify_progress_change(delta).await {
                        tracing::error!(
                            %error,
                            channel_id = self.channel_id,
                            "error handling progress notification"
                        );
                    }
                }
            }
        }

        tracing::info!(channel_id = self.channel_id, "dialog channel stopped");
    }

    #[tracing::instrument(skip(self, message), fields(channel_id = self.channel_id, message_id = message.message_id))]
    pub async fn handle_message(&self, message: InboundMessage) -> crate::Result<()> {
        let record = self.deps.registry.lookup_by_channel(self.channel_id).await?;

        match (message.is_start_command(), record) {
            (true, Some(record)) => self.send(already_verified_reply(&record.identity)).await,
            (true, None) => self.greet().await,
            (false, Some(_)) => self.chat_turn(&message).await,
            (false, None) => self.try_verify(&message).await,
        }
    }

    /// `/start` from an unverified chat: model-generated greeting with a
    /// canned fallback. The chat stays unverified either way.
    async fn greet(&self) -> crate::Result<()> {
        let messages = [ChatMessage::system(GREETING_PROMPT)];
        match self.deps.llm.complete(&messages, self.deps.temperature).await {
            Ok(text) => self.send(text).await,
            Err(error) => {
                tracing::warn!(
                    %error,
                    channel_id = self.channel_id,
                    "greeting completion failed, using canned greeting"
                );
                self.send(FALLBACK_GREETING).await
            }
        }
    }

    /// Free text from an unverified chat is a candidate email.
    async fn try_verify(&self, message: &InboundMessage) -> crate::Result<()> {
        let identity = normalize_identity(&message.text);

        // Bound elsewhere? The bind below still decides any race; this just
        // answers the common case without touching the roster.
        if let Some(existing) = self.deps.registry.lookup_by_identity(&identity).await?
            && existing.channel_id != self.channel_id
        {
            return self.send(IDENTITY_TAKEN_REPLY).await;
        }

        let Some(student) = self.deps.progress.get(&identity) else {
            tracing::info!(
                channel_id = self.channel_id,
                "verification attempt for unknown identity"
            );
            return self.send(NOT_FOUND_REPLY).await;
        };

        let record = match self.deps.registry.bind(self.channel_id, &identity).await {
            Ok(record) => record,
            Err(VerifyError::IdentityTaken) => {
                tracing::info!(
                    channel_id = self.channel_id,
                    "lost verification race for identity"
                );
                return self.send(IDENTITY_TAKEN_REPLY).await;
            }
            Err(VerifyError::AlreadyVerified) => {
                let identity = self
                    .deps
                    .registry
                    .lookup_by_channel(self.channel_id)
                    .await?
                    .map(|record| record.identity)
                    .unwrap_or_default();
                return self.send(already_verified_reply(&identity)).await;
            }
            Err(VerifyError::Storage(error)) => return Err(error.into()),
        };

        let tier = SeverityTier::classify(student.expected_result);
        tracing::info!(
            channel_id = self.channel_id,
            identity = %record.identity,
            metric = student.expected_result,
            tier = tier.label(),
            "channel verified"
        );

        let messages = [
            ChatMessage::system(tier.persona_prompt()),
            ChatMessage::user(format!(
                "The student just verified their identity. Their current expected result \
                 is {:.2}. Write them a short welcome message that reflects their pace.",
                student.expected_result
            )),
        ];
        match self.deps.llm.complete(&messages, self.deps.temperature).await {
            Ok(text) => self.send(format!("{}\n\n{text}", tier.label())).await,
            Err(error) => {
                tracing::warn!(
                    %error,
                    channel_id = self.channel_id,
                    "welcome completion failed, using flat welcome"
                );
                self.send(welcome_fallback(tier)).await
            }
        }
    }

    /// Free text from a verified chat: record, complete, record, reply.
    async fn chat_turn(&self, message: &InboundMessage) -> crate::Result<()> {
        self.deps
            .history
            .append(self.channel_id, message.message_id, TurnRole::User, &message.text)
            .await?;

        let context = self.build_context().await?;

        match self.deps.llm.complete(&context, self.deps.temperature).await {
            Ok(text) => {
                self.deps
                    .history
                    .append(
                        self.channel_id,
                        message.message_id + 1,
                        TurnRole::Assistant,
                        &text,
                    )
                    .await?;
                self.send(text).await
            }
            Err(error) => {
                // The user turn stays recorded; the exchange is not retried.
                tracing::warn!(
                    %error,
                    channel_id = self.channel_id,
                    "chat completion failed"
                );
                self.send(MODEL_RETRY_REPLY).await
            }
        }
    }

    /// Base persona plus the last `tail` turns, oldest first.
    async fn build_context(&self) -> crate::Result<Vec<ChatMessage>> {
        let turns = self.deps.history.tail(self.channel_id, self.deps.tail).await?;

        let mut context = Vec::with_capacity(turns.len() + 1);
        context.push(ChatMessage::system(self.deps.persona.as_ref()));
        for turn in turns {
            context.push(match turn.role {
                TurnRole::User => ChatMessage::user(turn.content),
                TurnRole::Assistant => ChatMessage::assistant(turn.content),
            });
        }
        Ok(context)
    }

    /// Push an unsolicited pace update. A model failure is logged and
    /// swallowed — no canned text for a message the user never asked for.
    pub async fn notify_progress_change(&self, delta: ProgressDelta) -> crate::Result<()> {
        let tier = SeverityTier::classify(delta.current);
        tracing::info!(
            channel_id = self.channel_id,
            identity = %delta.identity,
            current = delta.current,
            previous = delta.previous,
            tier = tier.label(),
            "pushing progress update"
        );

        let request = match delta.previous {
            Some(previous) => format!(
                "Automatic progress update: the student's expected result moved from {previous:.2} \
                 to {:.2}. Write a short unprompted check-in message that reflects their pace.",
                delta.current
            ),
            None => format!(
                "Automatic progress update: the student's expected result is now {:.2}. Write a \
                 short unprompted check-in message that reflects their pace.",
                delta.current
            ),
        };
        let messages = [ChatMessage::system(tier.persona_prompt()), ChatMessage::user(request)];

        match self.deps.llm.complete(&messages, self.deps.temperature).await {
            Ok(text) => self.send(text).await,
            Err(error) => {
                tracing::warn!(
                    %error,
                    channel_id = self.channel_id,
                    "progress update completion failed, skipping notification"
                );
                Ok(())
            }
        }
    }

    async fn send(&self, text: impl Into<String>) -> crate::Result<()> {
        self.deps
            .outbound_tx
            .send(OutboundMessage {
                channel_id: self.channel_id,
                text: text.into(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("outbound mailbox closed"))
    }
}
