//! Channel fan-out: one mailbox and one controller task per chat.
//!
//! Messages for a chat go through its mailbox and are handled strictly in
//! arrival order; chats proceed concurrently and independently. A slow
//! model call only ever stalls its own chat.

use crate::ChannelId;
use crate::InboundMessage;
use crate::dialog::controller::{ChannelEvent, DialogController, DialogDeps};
use crate::llm::ChatClient;
use crate::progress::ProgressDelta;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};

/// Mailbox depth per chat. Telegram chats are low-volume; backpressure past
/// this just slows the poller down.
const MAILBOX_DEPTH: usize = 64;

pub struct DialogRouter<C: ChatClient> {
    deps: DialogDeps<C>,
    channels: Mutex<HashMap<ChannelId, mpsc::Sender<ChannelEvent>>>,
}

impl<C: ChatClient> DialogRouter<C> {
    pub fn new(deps: DialogDeps<C>) -> Self {
        Self {
            deps,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Route an inbound message to its chat's mailbox, spawning the chat's
    /// controller task on first contact.
    pub async fn dispatch(&self, message: InboundMessage) {
        let channel_id = message.channel_id;
        let mailbox = self.ensure_channel(channel_id).await;
        if mailbox.send(ChannelEvent::Inbound(message)).await.is_err() {
            tracing::warn!(channel_id, "channel mailbox closed, dropping inbound message");
        }
    }

    /// Queue an unsolicited progress update behind whatever the chat is
    /// already processing.
    pub async fn notify(&self, channel_id: ChannelId, delta: ProgressDelta) {
        let mailbox = self.ensure_channel(channel_id).await;
        if mailbox
            .send(ChannelEvent::ProgressChanged(delta))
            .await
            .is_err()
        {
            tracing::warn!(channel_id, "channel mailbox closed, dropping progress update");
        }
    }

    async fn ensure_channel(&self, channel_id: ChannelId) -> mpsc::Sender<ChannelEvent> {
        let mut channels = self.channels.lock().await;
        if let Some(mailbox) = channels.get(&channel_id)
            && !mailbox.is_closed()
        {
            return mailbox.clone();
        }

        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_DEPTH);
        let controller = DialogController::new(channel_id, self.deps.clone());
        tokio::spawn(controller.run(mailbox_rx));
        channels.insert(channel_id, mailbox_tx.clone());
        mailbox_tx
    }
}

impl<C: ChatClient> std::fmt::Debug for DialogRouter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogRouter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationHistory;
    use crate::db::Db;
    use crate::llm::testing::MockClient;
    use crate::OutboundMessage;
    use crate::progress::ProgressStore;
    use crate::verification::VerificationRegistry;
    use chrono::Utc;
    use std::sync::Arc;

    async fn router_harness() -> (
        DialogRouter<MockClient>,
        mpsc::Receiver<OutboundMessage>,
    ) {
        let db = Db::connect_in_memory().await;
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let deps = DialogDeps {
            registry: VerificationRegistry::new(db.pool.clone()),
            history: ConversationHistory::new(db.pool.clone()),
            progress: Arc::new(ProgressStore::new()),
            llm: Arc::new(MockClient::replying("ok")),
            persona: Arc::from("persona"),
            tail: 6,
            temperature: 0.5,
            outbound_tx,
        };
        (DialogRouter::new(deps), outbound_rx)
    }

    fn inbound(channel_id: ChannelId, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id,
            user_id: 1,
            message_id: 1,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_answers_each_channel_on_its_own_mailbox() {
        let (router, mut outbound_rx) = router_harness().await;

        router.dispatch(inbound(1, "/start")).await;
        router.dispatch(inbound(2, "/start")).await;

        let mut seen = Vec::new();
        for _ in 0..2 {
            let message = outbound_rx
                .recv()
                .await
                .expect("both channels should answer");
            seen.push(message.channel_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn repeated_dispatch_reuses_the_channel_task() {
        let (router, mut outbound_rx) = router_harness().await;

        router.dispatch(inbound(9, "/start")).await;
        router.dispatch(inbound(9, "/start")).await;

        for _ in 0..2 {
            let message = outbound_rx.recv().await.expect("replies should arrive");
            assert_eq!(message.channel_id, 9);
        }
        assert_eq!(router.channels.lock().await.len(), 1);
    }
}
