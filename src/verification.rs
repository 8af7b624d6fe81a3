//! Verified chat-to-student bindings (SQLite).
//!
//! One row per verified chat, unique on both the chat id and the email.
//! Rows are written once and never mutated: a chat cannot re-verify or
//! change its email, and an email cannot move to another chat. Concurrent
//! binds racing for the same email are decided by the UNIQUE constraint, so
//! exactly one wins no matter how the tasks interleave.

use crate::ChannelId;
use crate::error::VerifyError;
use crate::progress::normalize_identity;
use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};

/// A durable verified binding between a chat and a student identity.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub channel_id: ChannelId,
    pub identity: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct VerificationRegistry {
    pool: SqlitePool,
}

impl VerificationRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bind a chat to an identity. Persists before returning.
    ///
    /// Fails `AlreadyVerified` when the chat already holds a record
    /// (regardless of identity) and `IdentityTaken` when the identity
    /// belongs to a different chat.
    pub async fn bind(
        &self,
        channel_id: ChannelId,
        identity: &str,
    ) -> Result<VerificationRecord, VerifyError> {
        let identity = normalize_identity(identity);

        if self.lookup_by_channel(channel_id).await?.is_some() {
            return Err(VerifyError::AlreadyVerified);
        }

        let insert = sqlx::query("INSERT INTO verifications (chat_id, email, verified) VALUES (?, ?, 1)")
            .bind(channel_id)
            .bind(&identity)
            .execute(&self.pool)
            .await;

        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Either the email lost a race to another chat, or this chat
                // raced itself through a recovery path. Look again to tell.
                if self.lookup_by_channel(channel_id).await?.is_some() {
                    return Err(VerifyError::AlreadyVerified);
                }
                return Err(VerifyError::IdentityTaken);
            }
            Err(error) => return Err(VerifyError::Storage(error)),
        }

        let record = self
            .lookup_by_channel(channel_id)
            .await?
            .ok_or_else(|| VerifyError::Storage(sqlx::Error::RowNotFound))?;

        tracing::info!(
            channel_id,
            identity = %record.identity,
            "verification binding persisted"
        );
        Ok(record)
    }

    pub async fn lookup_by_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<VerificationRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT chat_id, email, verified, created_at FROM verifications WHERE chat_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_record).transpose()
    }

    pub async fn lookup_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<VerificationRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT chat_id, email, verified, created_at FROM verifications WHERE email = ?",
        )
        .bind(normalize_identity(identity))
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_record).transpose()
    }

    pub async fn is_verified(&self, channel_id: ChannelId) -> Result<bool, sqlx::Error> {
        Ok(self
            .lookup_by_channel(channel_id)
            .await?
            .is_some_and(|record| record.verified))
    }
}

fn decode_record(row: sqlx::sqlite::SqliteRow) -> Result<VerificationRecord, sqlx::Error> {
    Ok(VerificationRecord {
        channel_id: row.try_get("chat_id")?,
        identity: row.try_get("email")?,
        verified: row.try_get::<i64, _>("verified")? != 0,
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

impl std::fmt::Debug for VerificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationRegistry").finish_non_exhaustive()
    }
}
