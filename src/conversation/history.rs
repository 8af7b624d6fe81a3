//! Conversation turn persistence (SQLite).

use crate::ChannelId;
use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};

/// Role of a recorded turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One persisted conversation turn.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// Total order within the chat (AUTOINCREMENT row id).
    pub id: i64,
    pub channel_id: ChannelId,
    /// Transport message id; an assistant turn carries its triggering user
    /// turn's seq plus one, pairing the exchange.
    pub seq: i64,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only per-chat turn log.
///
/// Writes are awaited, not fire-and-forget: the controller must know the
/// user turn is durable before it calls the model, and an assistant turn is
/// only recorded when the model call succeeded.
#[derive(Clone)]
pub struct ConversationHistory {
    pool: SqlitePool,
}

impl ConversationHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a turn. Returns its id once the insert is durable.
    pub async fn append(
        &self,
        channel_id: ChannelId,
        seq: i64,
        role: TurnRole,
        content: &str,
    ) -> crate::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO conversation_turns (chat_id, seq, role, content) VALUES (?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(seq)
        .bind(role.as_str())
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        Ok(result.last_insert_rowid())
    }

    /// Load the last `limit` turns for a chat, oldest first.
    pub async fn tail(
        &self,
        channel_id: ChannelId,
        limit: usize,
    ) -> crate::Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, seq, role, content, created_at \
             FROM conversation_turns \
             WHERE chat_id = ? \
             ORDER BY id DESC \
             LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        let mut turns = rows
            .into_iter()
            .map(|row| {
                let role_text: String = row.try_get("role")?;
                let role = TurnRole::from_str(&role_text).ok_or(sqlx::Error::RowNotFound)?;
                Ok(ConversationTurn {
                    id: row.try_get("id")?,
                    channel_id: row.try_get("chat_id")?,
                    seq: row.try_get("seq")?,
                    role,
                    content: row.try_get("content")?,
                    created_at: row
                        .try_get("created_at")
                        .unwrap_or_else(|_| chrono::Utc::now()),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| anyhow::anyhow!("failed to decode conversation turn: {e}"))?;

        // Reverse to chronological order
        turns.reverse();
        Ok(turns)
    }
}

impl std::fmt::Debug for ConversationHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHistory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[tokio::test]
    async fn turns_come_back_in_append_order() {
        let db = Db::connect_in_memory().await;
        let history = ConversationHistory::new(db.pool.clone());

        history
            .append(7, 1, TurnRole::User, "first question")
            .await
            .expect("append should succeed");
        history
            .append(7, 2, TurnRole::Assistant, "first answer")
            .await
            .expect("append should succeed");
        history
            .append(7, 3, TurnRole::User, "second question")
            .await
            .expect("append should succeed");

        let turns = history.tail(7, 10).await.expect("tail should succeed");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "first question");
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].content, "first answer");
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].content, "second question");
        assert!(turns[0].id < turns[1].id && turns[1].id < turns[2].id);
    }

    #[tokio::test]
    async fn tail_is_bounded_and_keeps_the_latest_turns() {
        let db = Db::connect_in_memory().await;
        let history = ConversationHistory::new(db.pool.clone());

        for i in 0..10 {
            history
                .append(7, i, TurnRole::User, &format!("turn {i}"))
                .await
                .expect("append should succeed");
        }

        let turns = history.tail(7, 4).await.expect("tail should succeed");
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].content, "turn 6");
        assert_eq!(turns[3].content, "turn 9");
    }

    #[tokio::test]
    async fn channels_do_not_leak_into_each_other() {
        let db = Db::connect_in_memory().await;
        let history = ConversationHistory::new(db.pool.clone());

        history
            .append(1, 1, TurnRole::User, "channel one")
            .await
            .expect("append should succeed");
        history
            .append(2, 1, TurnRole::User, "channel two")
            .await
            .expect("append should succeed");

        let turns = history.tail(1, 10).await.expect("tail should succeed");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "channel one");
        assert_eq!(turns[0].channel_id, 1);
    }

    #[tokio::test]
    async fn empty_channel_has_an_empty_tail() {
        let db = Db::connect_in_memory().await;
        let history = ConversationHistory::new(db.pool.clone());

        let turns = history.tail(42, 6).await.expect("tail should succeed");
        assert!(turns.is_empty());
    }
}
