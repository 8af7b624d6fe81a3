//! Telegram messaging adapter over the Bot API (long polling).
//!
//! No SDK — getUpdates/sendMessage are two JSON endpoints and reqwest
//! covers them. The poll loop runs in its own task and feeds the inbound
//! stream; a poll failure backs off and retries rather than tearing the
//! adapter down.

use crate::config::TelegramConfig;
use crate::{InboundMessage, OutboundMessage};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{InboundStream, Messaging};

/// Pause after a failed poll before trying again.
const POLL_BACKOFF_SECS: u64 = 5;

pub struct TelegramAdapter {
    http_client: reqwest::Client,
    /// `<api_base>/bot<token>`, the prefix of every method URL.
    bot_url: String,
    poll_timeout_secs: u64,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Incoming>,
}

#[derive(Deserialize)]
struct Incoming {
    message_id: i64,
    date: i64,
    text: Option<String>,
    chat: Chat,
    from: Option<Author>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Deserialize)]
struct Author {
    id: i64,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> crate::Result<Self> {
        if config.token.is_empty() {
            anyhow::bail!(
                "telegram.token is not configured (set TELEGRAM_BOT_TOKEN or the config field)"
            );
        }

        // Long polls hold the connection open for poll_timeout_secs; give
        // the client timeout headroom on top of that.
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|error| anyhow::anyhow!("failed to build HTTP client: {error}"))?;

        Ok(Self {
            http_client,
            bot_url: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.token),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    async fn get_updates(&self, offset: i64) -> crate::Result<Vec<Update>> {
        let envelope: ApiEnvelope<Vec<Update>> = self
            .http_client
            .get(format!("{}/getUpdates", self.bot_url))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !envelope.ok {
            anyhow::bail!(
                "getUpdates rejected: {}",
                envelope.description.as_deref().unwrap_or("no description")
            );
        }
        Ok(envelope.result.unwrap_or_default())
    }

    fn into_inbound(update: Incoming) -> Option<InboundMessage> {
        let text = update.text?;
        if text.is_empty() {
            return None;
        }
        Some(InboundMessage {
            channel_id: update.chat.id,
            user_id: update.from.map(|author| author.id).unwrap_or_default(),
            message_id: update.message_id,
            text,
            timestamp: DateTime::from_timestamp(update.date, 0).unwrap_or_else(Utc::now),
        })
    }
}

impl Messaging for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    fn start(&self) -> impl Future<Output = crate::Result<InboundStream>> + Send {
        let http_client = self.http_client.clone();
        let bot_url = self.bot_url.clone();
        let poll_timeout_secs = self.poll_timeout_secs;

        async move {
            let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(256);

            tokio::spawn(async move {
                let poller = TelegramAdapter {
                    http_client,
                    bot_url,
                    poll_timeout_secs,
                };
                let mut offset = 0i64;

                loop {
                    match poller.get_updates(offset).await {
                        Ok(updates) => {
                            for update in updates {
                                offset = offset.max(update.update_id + 1);
                                let Some(message) =
                                    update.message.and_then(TelegramAdapter::into_inbound)
                                else {
                                    continue;
                                };
                                if inbound_tx.send(message).await.is_err() {
                                    tracing::info!("inbound consumer gone, stopping telegram poll");
                                    return;
                                }
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "telegram poll failed, backing off");
                            tokio::time::sleep(std::time::Duration::from_secs(POLL_BACKOFF_SECS))
                                .await;
                        }
                    }
                }
            });

            let stream = futures::stream::unfold(inbound_rx, |mut inbound_rx| async move {
                inbound_rx.recv().await.map(|message| (message, inbound_rx))
            });
            Ok(Box::pin(stream) as InboundStream)
        }
    }

    fn send(&self, message: OutboundMessage) -> impl Future<Output = crate::Result<()>> + Send {
        let request = self
            .http_client
            .post(format!("{}/sendMessage", self.bot_url))
            .json(&serde_json::json!({
                "chat_id": message.channel_id,
                "text": message.text,
            }))
            .send();

        async move {
            let envelope: ApiEnvelope<serde_json::Value> = request.await?.json().await?;
            if !envelope.ok {
                anyhow::bail!(
                    "sendMessage rejected: {}",
                    envelope.description.as_deref().unwrap_or("no description")
                );
            }
            Ok(())
        }
    }
}

impl std::fmt::Debug for TelegramAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramAdapter").finish_non_exhaustive()
    }
}
