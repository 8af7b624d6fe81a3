//! Error taxonomy.
//!
//! Domain errors are typed so callers can branch on them; everything else
//! rides the anyhow boundary. No error here is allowed to take down a
//! channel loop — the dialog controller converts all of them into a
//! user-facing message plus an operator log record.

/// Crate-wide result alias.
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Chat-model call failures. Recovered locally with a canned reply.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("model response carried no completion text")]
    EmptyCompletion,
}

/// Progress-source failures. A failed refresh keeps the previous snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("progress source unreachable: {0}")]
    Unreachable(String),

    #[error("progress export malformed: {0}")]
    Malformed(String),
}

/// Verification binding failures. The first two are user-visible and
/// non-retryable without operator intervention.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("channel already holds a verified record")]
    AlreadyVerified,

    #[error("identity is already bound to another channel")]
    IdentityTaken,

    #[error("verification storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}
