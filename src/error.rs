//! Error types for the chat gateway.
//!
//! `ChatError` is the boundary-conversion type the Session Handler uses per
//! spec.md §7: the validator and the admission gates are the only things
//! that ever reject a frame back to the client, and both convert into this
//! type before becoming an error frame. Internal failures (persistence,
//! media, LLM) are recovered closer to their own boundary in `processor.rs`,
//! which never lets them escape as a `ChatError` — it already swallows them
//! into a synthetic reply per spec.md §7's processor clause.

/// Main error type for chat gateway operations.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    /// Inbound frame failed classification or content validation. Display
    /// is the bare reason, matching the wire error frame's `message` field.
    #[error("{0}")]
    Validation(String),

    /// An admission gate rejected the frame. Display is the bare reason.
    #[error("{0}")]
    Registry(String),

    /// Persistence port failed after exhausting retries
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Media port failed to save a blob
    #[error("media error: {0}")]
    Media(String),

    /// LLM port failed to produce a reply
    #[error("llm error: {0}")]
    Llm(String),

    /// Transport-level failure, generally indistinguishable from a disconnect
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error from `SQLx`
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP client error calling the external LLM
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<crate::validator::ValidationError> for ChatError {
    fn from(err: crate::validator::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type ChatResult<T> = Result<T, ChatError>;
