//! Abstract collaborators the core pipeline depends on.
//!
//! Each port is a trait plus a production implementation and, where useful
//! for tests, an in-memory stub, following the same split the rest of this
//! crate uses for its storage and routing traits.

mod llm;
mod media;
mod persistence;

pub use llm::{LlmError, LlmPort, LlmStatus, OpenAiClient};
pub use media::{FilesystemMedia, MediaContent, MediaError, MediaKind, MediaPort};
pub use persistence::{HistoryPage, MessageRecord, PersistenceError, PersistencePort, ReplyRecord, SqlitePersistence};
