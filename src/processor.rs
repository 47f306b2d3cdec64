//! Message Processor: save -> policy check -> LLM or static reply ->
//! media reply fan-out -> persist replies.

use crate::domain_types::{ClientId, Filename, MessageId};
use crate::ports::{LlmPort, MediaContent, MediaKind, MediaPort, MessageRecord, PersistencePort, ReplyRecord};
use crate::time_provider::SharedTimeProvider;
use crate::validator::{ContentRecord, MessageKind};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// One outbound reply the Session Handler must write, in emission order.
#[derive(Debug, Clone)]
pub struct ProcessedReply {
    /// Database id of the persisted reply row, if persistence succeeded.
    pub id: Option<i64>,
    /// Text body, or a media URL.
    pub content: String,
    /// One of `text`, `voice`, `image`.
    pub reply_type: &'static str,
    /// Filename, for media replies.
    pub filename: Option<&'static str>,
    /// MIME type, for media replies.
    pub mime_type: Option<&'static str>,
}

const STATIC_VOICE_REPLY: (&str, &str, &str) =
    ("/media/static_replies/reply.mp3", "reply.mp3", "audio/mpeg");
const STATIC_IMAGE_REPLY: (&str, &str, &str) =
    ("/media/static_replies/reply.png", "reply.png", "image/png");

fn processing_latency(kind: MessageKind) -> Duration {
    let mut rng = rand::thread_rng();
    let millis = match kind {
        MessageKind::Text => rng.gen_range(0..1000),
        MessageKind::Voice => rng.gen_range(1000..2000),
        MessageKind::Image | MessageKind::Video => rng.gen_range(2000..3000),
    };
    Duration::from_millis(millis)
}

fn media_kind_of(kind: MessageKind) -> Option<MediaKind> {
    match kind {
        MessageKind::Image => Some(MediaKind::Image),
        MessageKind::Video => Some(MediaKind::Video),
        MessageKind::Voice => Some(MediaKind::Voice),
        MessageKind::Text => None,
    }
}

fn canned_reply(kind: MessageKind) -> String {
    format!("Received your {} message", kind.as_str())
}

fn llm_prompt(content: &str) -> String {
    format!(
        "You are a friendly chat assistant. Please provide a natural and helpful response: \"{content}\""
    )
}

/// Orchestrates the full processor sequence for one validated content
/// record, returning the ordered reply list. Never propagates an error to
/// the caller: any internal failure becomes a single synthetic error reply.
pub async fn process(
    record: ContentRecord,
    client_id: &ClientId,
    persistence: &Arc<dyn PersistencePort>,
    media: &Arc<dyn MediaPort>,
    llm: &Arc<dyn LlmPort>,
    time_provider: &SharedTimeProvider,
) -> Vec<ProcessedReply> {
    match process_inner(record, client_id, persistence, media, llm, time_provider).await {
        Ok(replies) => replies,
        Err(err) => {
            error!(%err, "message processor failed");
            vec![ProcessedReply {
                id: None,
                content: format!("Error processing message: {err}"),
                reply_type: "text",
                filename: None,
                mime_type: None,
            }]
        }
    }
}

async fn process_inner(
    record: ContentRecord,
    client_id: &ClientId,
    persistence: &Arc<dyn PersistencePort>,
    media: &Arc<dyn MediaPort>,
    llm: &Arc<dyn LlmPort>,
    time_provider: &SharedTimeProvider,
) -> Result<Vec<ProcessedReply>, ProcessorError> {
    let mut content_ref = record.content.clone();

    if !record.is_accepted {
        let message_id = persist_message(persistence, client_id, &record, None).await?;
        let reply = persist_text_reply(persistence, client_id, message_id, &record.status_message, 0).await?;
        return Ok(vec![reply]);
    }

    if let Some(kind) = media_kind_of(record.kind) {
        let media_content = match (&record.binary_content, &record.content) {
            (Some(bytes), _) => MediaContent::Bytes(bytes.clone()),
            (None, Some(base64_text)) => MediaContent::Base64(base64_text.clone()),
            (None, None) => {
                return Err(ProcessorError::MediaSaveFailed(
                    "no binary payload or inline base64 content attached".to_string(),
                ))
            }
        };
        let filename_raw = record
            .filename
            .clone()
            .ok_or(ProcessorError::MediaSaveFailed("no filename attached".to_string()))?;
        let filename = Filename::try_new(filename_raw)
            .map_err(|e| ProcessorError::MediaSaveFailed(e.to_string()))?;

        let saved_path = media
            .save(media_content, kind, &filename)
            .await
            .map_err(|e| ProcessorError::MediaSaveFailed(e.to_string()))?;
        content_ref = Some(saved_path);
    }

    let message_id = persist_message(persistence, client_id, &record, content_ref.clone()).await?;

    time_provider.sleep(processing_latency(record.kind)).await;

    let status = llm.status();
    let mut replies = Vec::new();

    if status.rate_limited {
        let minutes = status.seconds_remaining.map(|secs| secs.div_euclid(60) + 1).unwrap_or(1).max(1);
        let preview: String = record.content.as_deref().unwrap_or_default().chars().take(30).collect();
        let body = format!(
            "System is currently busy. Please try again in {minutes} minutes. (Original message: {preview}...)"
        );
        replies.push(persist_text_reply(persistence, client_id, message_id, &body, 0).await?);
        return Ok(replies);
    }

    let text_body = match record.kind {
        MessageKind::Text => {
            let prompt = llm_prompt(content_ref.as_deref().unwrap_or_default());
            match llm.generate(&prompt).await {
                Ok(text) => text,
                Err(err) => {
                    info!(%err, "LLM call failed, falling back to canned reply");
                    let preview: String = content_ref
                        .as_deref()
                        .unwrap_or_default()
                        .chars()
                        .take(30)
                        .collect();
                    format!("Sorry, I couldn't process your request at the moment. (Received: {preview}…)")
                }
            }
        }
        _ => canned_reply(record.kind),
    };

    replies.push(persist_text_reply(persistence, client_id, message_id, &text_body, 0).await?);

    let mut sequence = 1;
    if matches!(record.kind, MessageKind::Voice | MessageKind::Video | MessageKind::Image) {
        replies.push(
            persist_media_reply(
                persistence,
                client_id,
                message_id,
                "voice",
                STATIC_VOICE_REPLY,
                sequence,
            )
            .await?,
        );
        sequence += 1;
    }
    if matches!(record.kind, MessageKind::Video | MessageKind::Image) {
        replies.push(
            persist_media_reply(
                persistence,
                client_id,
                message_id,
                "image",
                STATIC_IMAGE_REPLY,
                sequence,
            )
            .await?,
        );
    }

    Ok(replies)
}

async fn persist_message(
    persistence: &Arc<dyn PersistencePort>,
    client_id: &ClientId,
    record: &ContentRecord,
    content_ref: Option<String>,
) -> Result<MessageId, ProcessorError> {
    persistence
        .insert_message(MessageRecord {
            client_id: client_id.clone(),
            message_type: record.kind.as_str().to_string(),
            filename: record.filename.clone(),
            content_ref,
            client_timestamp: record.client_timestamp.to_rfc3339(),
            accepted: record.is_accepted,
        })
        .await
        .map_err(|e| ProcessorError::Persistence(e.to_string()))
}

async fn persist_text_reply(
    persistence: &Arc<dyn PersistencePort>,
    client_id: &ClientId,
    message_id: MessageId,
    body: &str,
    sequence: i64,
) -> Result<ProcessedReply, ProcessorError> {
    let id = persistence
        .insert_reply(ReplyRecord {
            message_id,
            client_id: client_id.clone(),
            reply_type: "text".to_string(),
            body: Some(body.to_string()),
            media_ref: None,
            sequence,
        })
        .await
        .map_err(|e| ProcessorError::Persistence(e.to_string()))?;

    Ok(ProcessedReply {
        id: Some(i64::from(id)),
        content: body.to_string(),
        reply_type: "text",
        filename: None,
        mime_type: None,
    })
}

async fn persist_media_reply(
    persistence: &Arc<dyn PersistencePort>,
    client_id: &ClientId,
    message_id: MessageId,
    reply_type: &'static str,
    (url, filename, mime): (&'static str, &'static str, &'static str),
    sequence: i64,
) -> Result<ProcessedReply, ProcessorError> {
    let id = persistence
        .insert_reply(ReplyRecord {
            message_id,
            client_id: client_id.clone(),
            reply_type: reply_type.to_string(),
            body: None,
            media_ref: Some(url.to_string()),
            sequence,
        })
        .await
        .map_err(|e| ProcessorError::Persistence(e.to_string()))?;

    Ok(ProcessedReply {
        id: Some(i64::from(id)),
        content: url.to_string(),
        reply_type,
        filename: Some(filename),
        mime_type: Some(mime),
    })
}

#[derive(thiserror::Error, Debug)]
enum ProcessorError {
    #[error("media save failed: {0}")]
    MediaSaveFailed(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}
