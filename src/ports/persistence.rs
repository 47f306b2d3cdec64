//! Persistence Port: client upsert, message/reply insert, history read.
//!
//! The production implementation sits on the embedded `SQLite` pool from
//! [`crate::database`]; writes retry up to 3 times with linear backoff when
//! the driver reports the database is locked, mirroring the original
//! implementation's `database.py` retry loop.

use crate::domain_types::{ClientId, ClientTimezone, MessageId, ReplyId};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::warn;

/// Failure from a persistence operation.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The underlying database returned an error after retries were exhausted.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// A message row to be inserted, already validated by the Message Validator.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Owning client.
    pub client_id: ClientId,
    /// One of `text`, `image`, `video`, `voice`, or `system`.
    pub message_type: String,
    /// Client-declared filename, for media kinds.
    pub filename: Option<String>,
    /// Text body, or the stored media path.
    pub content_ref: Option<String>,
    /// Wall-clock instant the client reported.
    pub client_timestamp: String,
    /// Whether the message passed time-of-day policy.
    pub accepted: bool,
}

/// A reply row to be inserted.
#[derive(Debug, Clone)]
pub struct ReplyRecord {
    /// The message this reply answers.
    pub message_id: MessageId,
    /// The client the reply is delivered to.
    pub client_id: ClientId,
    /// One of `text`, `image`, `voice`.
    pub reply_type: String,
    /// Text body, for text replies.
    pub body: Option<String>,
    /// Media URL, for media replies.
    pub media_ref: Option<String>,
    /// Position within this message's reply fan-out, starting at 0.
    pub sequence: i64,
}

/// One page of chat history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Matching rows, most recent first.
    pub messages: Vec<StoredMessage>,
    /// Total rows for this client, ignoring pagination.
    pub total: i64,
    /// Whether more rows exist past this page.
    pub has_more: bool,
}

/// A message row as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Row id.
    pub id: MessageId,
    /// One of `text`, `image`, `video`, `voice`, or `system`.
    pub message_type: String,
    /// Text body, or the stored media path.
    pub content_ref: Option<String>,
    /// Wall-clock instant the client reported.
    pub client_timestamp: String,
    /// Whether the message passed time-of-day policy.
    pub accepted: bool,
}

/// Abstract contract for durable storage, the way the core depends on it.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Creates the client row if absent, otherwise refreshes its timezone
    /// and `last_seen_at`.
    async fn upsert_client(
        &self,
        client_id: &ClientId,
        timezone: &ClientTimezone,
    ) -> Result<(), PersistenceError>;

    /// Inserts a message row and returns its assigned id.
    async fn insert_message(&self, record: MessageRecord) -> Result<MessageId, PersistenceError>;

    /// Inserts a reply row and returns its assigned id.
    async fn insert_reply(&self, record: ReplyRecord) -> Result<ReplyId, PersistenceError>;

    /// Counts all messages ever recorded for a client.
    async fn count_messages(&self, client_id: &ClientId) -> Result<i64, PersistenceError>;

    /// Reads a page of history ordered by `client_timestamp` descending.
    async fn history(
        &self,
        client_id: &ClientId,
        limit: i64,
        offset: i64,
    ) -> Result<HistoryPage, PersistenceError>;
}

const MAX_WRITE_ATTEMPTS: u32 = 3;

fn is_locked_error(err: &sqlx::Error) -> bool {
    err.to_string().to_lowercase().contains("database is locked")
}

async fn retry_write<F, Fut, T>(mut op: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_locked_error(&err) && attempt < MAX_WRITE_ATTEMPTS => {
                warn!(attempt, "database locked, retrying write");
                tokio::time::sleep(std::time::Duration::from_millis(100 * u64::from(attempt)))
                    .await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// `SQLite`-backed implementation of [`PersistencePort`].
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Wraps an already-initialized connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistencePort for SqlitePersistence {
    async fn upsert_client(
        &self,
        client_id: &ClientId,
        timezone: &ClientTimezone,
    ) -> Result<(), PersistenceError> {
        let id = client_id.as_ref().to_string();
        let tz = timezone.as_ref().to_string();
        retry_write(|| {
            let pool = &self.pool;
            let id = id.clone();
            let tz = tz.clone();
            async move {
                sqlx::query(
                    "INSERT INTO clients (client_id, timezone, first_seen_at, last_seen_at)
                     VALUES (?, ?, datetime('now'), datetime('now'))
                     ON CONFLICT(client_id) DO UPDATE SET
                         timezone = excluded.timezone,
                         last_seen_at = datetime('now')",
                )
                .bind(id)
                .bind(tz)
                .execute(pool)
                .await
                .map(|_| ())
            }
        })
        .await
    }

    async fn insert_message(&self, record: MessageRecord) -> Result<MessageId, PersistenceError> {
        let id = retry_write(|| {
            let pool = &self.pool;
            let record = record.clone();
            async move {
                let row = sqlx::query(
                    "INSERT INTO messages
                        (client_id, message_type, filename, content_ref, client_timestamp, received_at, accepted)
                     VALUES (?, ?, ?, ?, ?, datetime('now'), ?)
                     RETURNING id",
                )
                .bind(record.client_id.as_ref())
                .bind(&record.message_type)
                .bind(&record.filename)
                .bind(&record.content_ref)
                .bind(&record.client_timestamp)
                .bind(record.accepted)
                .fetch_one(pool)
                .await?;
                Ok(row.get::<i64, _>("id"))
            }
        })
        .await?;
        MessageId::try_new(id).map_err(|e| PersistenceError::Database(e.to_string()))
    }

    async fn insert_reply(&self, record: ReplyRecord) -> Result<ReplyId, PersistenceError> {
        let id = retry_write(|| {
            let pool = &self.pool;
            let record = record.clone();
            async move {
                let row = sqlx::query(
                    "INSERT INTO replies
                        (message_id, client_id, reply_type, body, media_ref, sequence, sent_at)
                     VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
                     RETURNING id",
                )
                .bind(i64::from(record.message_id))
                .bind(record.client_id.as_ref())
                .bind(&record.reply_type)
                .bind(&record.body)
                .bind(&record.media_ref)
                .bind(record.sequence)
                .fetch_one(pool)
                .await?;
                Ok(row.get::<i64, _>("id"))
            }
        })
        .await?;
        ReplyId::try_new(id).map_err(|e| PersistenceError::Database(e.to_string()))
    }

    async fn count_messages(&self, client_id: &ClientId) -> Result<i64, PersistenceError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE client_id = ?")
            .bind(client_id.as_ref())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn history(
        &self,
        client_id: &ClientId,
        limit: i64,
        offset: i64,
    ) -> Result<HistoryPage, PersistenceError> {
        let total = self.count_messages(client_id).await?;

        let rows = sqlx::query(
            "SELECT id, message_type, content_ref, client_timestamp, accepted
             FROM messages WHERE client_id = ?
             ORDER BY client_timestamp DESC
             LIMIT ? OFFSET ?",
        )
        .bind(client_id.as_ref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .filter_map(|row| {
                let id: i64 = row.get("id");
                MessageId::try_new(id).ok().map(|id| StoredMessage {
                    id,
                    message_type: row.get("message_type"),
                    content_ref: row.get("content_ref"),
                    client_timestamp: row.get("client_timestamp"),
                    accepted: row.get("accepted"),
                })
            })
            .collect::<Vec<_>>();

        let has_more = offset + i64::try_from(messages.len()).unwrap_or(0) < total;

        Ok(HistoryPage {
            messages,
            total,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConfig, DatabaseConnection, DatabasePath};
    use tempfile::tempdir;

    async fn test_store() -> (SqlitePersistence, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = DatabasePath::new(dir.path().join("test.db")).unwrap();
        let config = DatabaseConfig::for_testing(path);
        let conn = DatabaseConnection::initialize(config).await.unwrap();
        (SqlitePersistence::new(conn.pool().clone()), dir)
    }

    #[tokio::test]
    async fn message_precedes_its_reply() {
        let (store, _dir) = test_store().await;
        let client = ClientId::try_new("alice".to_string()).unwrap();
        let tz = ClientTimezone::utc();
        store.upsert_client(&client, &tz).await.unwrap();

        let message_id = store
            .insert_message(MessageRecord {
                client_id: client.clone(),
                message_type: "text".to_string(),
                filename: None,
                content_ref: Some("hi".to_string()),
                client_timestamp: "2026-01-01T12:00:00Z".to_string(),
                accepted: true,
            })
            .await
            .unwrap();

        let reply_id = store
            .insert_reply(ReplyRecord {
                message_id,
                client_id: client.clone(),
                reply_type: "text".to_string(),
                body: Some("hello back".to_string()),
                media_ref: None,
                sequence: 0,
            })
            .await
            .unwrap();

        assert!(i64::from(reply_id) > 0);
        assert_eq!(store.count_messages(&client).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn history_orders_descending_and_reports_has_more() {
        let (store, _dir) = test_store().await;
        let client = ClientId::try_new("bob".to_string()).unwrap();
        let tz = ClientTimezone::utc();
        store.upsert_client(&client, &tz).await.unwrap();

        for (i, ts) in [
            "2026-01-01T10:00:00Z",
            "2026-01-01T11:00:00Z",
            "2026-01-01T12:00:00Z",
        ]
        .into_iter()
        .enumerate()
        {
            store
                .insert_message(MessageRecord {
                    client_id: client.clone(),
                    message_type: "text".to_string(),
                    filename: None,
                    content_ref: Some(format!("msg {i}")),
                    client_timestamp: ts.to_string(),
                    accepted: true,
                })
                .await
                .unwrap();
        }

        let page = store.history(&client, 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.messages[0].client_timestamp, "2026-01-01T12:00:00Z");
    }
}
