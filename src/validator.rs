//! Message Validator: classifies an inbound frame and applies the
//! per-type time-of-day acceptance policy.

use crate::domain_types::ClientTimezone;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// The message kinds a content frame may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text body.
    Text,
    /// Still image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Voice/audio attachment.
    Voice,
}

impl MessageKind {
    /// The wire string this kind serializes to, and the value persisted in
    /// the `messages.message_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Voice => "voice",
        }
    }

    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }

    fn requires_filename(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Raw inbound frame as decoded from wire JSON, before classification.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InboundFrame {
    /// Present on system/heartbeat frames.
    #[serde(rename = "type")]
    pub frame_type: Option<String>,
    /// Truthy on system frames that omit an explicit `type`.
    #[serde(default)]
    pub is_system: bool,
    /// Declared content kind for content frames.
    pub message_type: Option<String>,
    /// Text body, or base64 media content.
    pub content: Option<String>,
    /// Client-declared filename, required for non-text content.
    pub filename: Option<String>,
    /// ISO-8601 timestamp the client reports.
    pub timestamp: Option<String>,
}

/// A classified, policy-checked record ready for the processor.
#[derive(Debug, Clone)]
pub enum ValidatedRecord {
    /// A system/heartbeat sentinel; not persisted, carries no policy check.
    System,
    /// A content frame that passed classification (policy result attached).
    Content(ContentRecord),
}

/// A classified content frame.
#[derive(Debug, Clone)]
pub struct ContentRecord {
    /// The declared message kind.
    pub kind: MessageKind,
    /// Text body for text messages; for media messages with no preceding
    /// binary frame, the inline base64 payload instead.
    pub content: Option<String>,
    /// Binary payload from a preceding binary frame, present for media
    /// messages that arrived that way. Takes priority over `content` when
    /// both are present.
    pub binary_content: Option<Vec<u8>>,
    /// Sanitized filename, present for media messages.
    pub filename: Option<String>,
    /// The timestamp used for policy evaluation (parsed, or substituted).
    pub client_timestamp: DateTime<Utc>,
    /// Whether the message passed the time-of-day policy.
    pub is_accepted: bool,
    /// Rejection reason, or an acknowledgement string when accepted.
    pub status_message: String,
}

/// Classification failure: the frame is structurally invalid, not just
/// policy-rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `message_type` was present but not one of the recognized kinds.
    #[error("invalid message type: {0}")]
    InvalidType(String),
    /// A media kind omitted the required filename.
    #[error("filename is required for {0} messages")]
    MissingFilename(&'static str),
    /// A text message had empty content.
    #[error("content must not be empty")]
    EmptyContent,
    /// A media kind arrived with neither a binary frame nor inline content.
    #[error("{0} messages require either a binary frame or base64 content")]
    MissingMediaPayload(&'static str),
}

fn is_system_frame(frame: &InboundFrame) -> bool {
    frame.is_system
        || matches!(frame.frame_type.as_deref(), Some("system") | Some("heartbeat"))
}

/// Classifies and policy-checks an inbound frame.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the frame fails structural
/// classification (wrong type, missing filename, empty content). Policy
/// rejection is not an error: it is encoded in `is_accepted`/`status_message`
/// on the returned [`ContentRecord`].
pub fn validate(
    frame: InboundFrame,
    binary_content: Option<Vec<u8>>,
    timezone: &ClientTimezone,
) -> Result<ValidatedRecord, ValidationError> {
    if is_system_frame(&frame) {
        return Ok(ValidatedRecord::System);
    }

    let kind = frame
        .message_type
        .as_deref()
        .and_then(MessageKind::from_str)
        .ok_or_else(|| {
            ValidationError::InvalidType(frame.message_type.clone().unwrap_or_default())
        })?;

    let (content, binary_content) = if kind.requires_filename() {
        if frame.filename.is_none() {
            return Err(ValidationError::MissingFilename(kind.as_str()));
        }
        if binary_content.is_some() {
            (None, binary_content)
        } else {
            // No separate binary frame preceded this one; the media payload
            // may still have arrived inline as base64 text in `content`.
            let inline = frame.content.filter(|c| !c.is_empty());
            if inline.is_none() {
                return Err(ValidationError::MissingMediaPayload(kind.as_str()));
            }
            (inline, None)
        }
    } else {
        let content = frame.content.filter(|c| !c.is_empty());
        if content.is_none() {
            return Err(ValidationError::EmptyContent);
        }
        (content, None)
    };

    let client_timestamp = parse_timestamp(frame.timestamp.as_deref());
    let (is_accepted, status_message) = apply_time_policy(kind, client_timestamp, timezone);

    Ok(ValidatedRecord::Content(ContentRecord {
        kind,
        content,
        binary_content,
        filename: frame.filename,
        client_timestamp,
        is_accepted,
        status_message,
    }))
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| {
        let normalized = if let Some(stripped) = s.strip_suffix('Z') {
            format!("{stripped}+00:00")
        } else {
            s.to_string()
        };
        DateTime::parse_from_rfc3339(&normalized)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
    .unwrap_or_else(|| {
        warn!(raw = ?raw, "failed to parse client timestamp, substituting current time");
        Utc::now()
    })
}

fn local_hour(timestamp: DateTime<Utc>, timezone: &ClientTimezone) -> u32 {
    match timezone.parse() {
        Ok(tz) => timestamp.with_timezone(&tz).hour(),
        Err(reason) => {
            warn!(%reason, "falling back to machine local time for policy check");
            chrono::Local
                .from_utc_datetime(&timestamp.naive_utc())
                .hour()
        }
    }
}

fn apply_time_policy(
    kind: MessageKind,
    timestamp: DateTime<Utc>,
    timezone: &ClientTimezone,
) -> (bool, String) {
    let hour = local_hour(timestamp, timezone);
    match kind {
        MessageKind::Text if (5..24).contains(&hour) => (true, "accepted".to_string()),
        MessageKind::Text => (
            false,
            "Text messages are only accepted between 5 AM and midnight".to_string(),
        ),
        MessageKind::Voice if (8..12).contains(&hour) => (true, "accepted".to_string()),
        MessageKind::Voice => (
            false,
            "Voice messages are only accepted between 8 AM and 12 PM".to_string(),
        ),
        MessageKind::Video if (20..24).contains(&hour) => (true, "accepted".to_string()),
        MessageKind::Video => (
            false,
            "Video messages are only accepted between 8 PM and midnight".to_string(),
        ),
        MessageKind::Image => (true, "accepted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_tz() -> ClientTimezone {
        ClientTimezone::utc()
    }

    #[test]
    fn system_frame_short_circuits_classification() {
        let frame = InboundFrame {
            frame_type: Some("heartbeat".to_string()),
            ..Default::default()
        };
        let result = validate(frame, None, &utc_tz()).unwrap();
        assert!(matches!(result, ValidatedRecord::System));
    }

    #[test]
    fn unknown_message_type_is_invalid() {
        let frame = InboundFrame {
            message_type: Some("sticker".to_string()),
            ..Default::default()
        };
        let err = validate(frame, None, &utc_tz()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType(_)));
    }

    #[test]
    fn media_without_filename_is_rejected() {
        let frame = InboundFrame {
            message_type: Some("voice".to_string()),
            ..Default::default()
        };
        let err = validate(frame, Some(vec![1, 2, 3]), &utc_tz()).unwrap_err();
        assert_eq!(err, ValidationError::MissingFilename("voice"));
    }

    #[test]
    fn text_without_content_is_rejected() {
        let frame = InboundFrame {
            message_type: Some("text".to_string()),
            ..Default::default()
        };
        let err = validate(frame, None, &utc_tz()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyContent);
    }

    #[test]
    fn text_message_at_noon_is_accepted() {
        let frame = InboundFrame {
            message_type: Some("text".to_string()),
            content: Some("hi".to_string()),
            timestamp: Some("2026-01-01T12:00:00Z".to_string()),
            ..Default::default()
        };
        let result = validate(frame, None, &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => assert!(record.is_accepted),
            ValidatedRecord::System => panic!("expected content record"),
        }
    }

    #[test]
    fn text_message_at_3am_is_rejected_with_reason() {
        let frame = InboundFrame {
            message_type: Some("text".to_string()),
            content: Some("hi".to_string()),
            timestamp: Some("2026-01-01T03:00:00Z".to_string()),
            ..Default::default()
        };
        let result = validate(frame, None, &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => {
                assert!(!record.is_accepted);
                assert_eq!(
                    record.status_message,
                    "Text messages are only accepted between 5 AM and midnight"
                );
            }
            ValidatedRecord::System => panic!("expected content record"),
        }
    }

    #[test]
    fn unparseable_timestamp_substitutes_current_time() {
        let frame = InboundFrame {
            message_type: Some("text".to_string()),
            content: Some("hi".to_string()),
            timestamp: Some("not-a-date".to_string()),
            ..Default::default()
        };
        let before = Utc::now();
        let result = validate(frame, None, &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => assert!(record.client_timestamp >= before),
            ValidatedRecord::System => panic!("expected content record"),
        }
    }

    #[test]
    fn media_without_binary_frame_falls_back_to_inline_content() {
        let frame = InboundFrame {
            message_type: Some("voice".to_string()),
            filename: Some("a.mp3".to_string()),
            content: Some("base64-encoded-audio".to_string()),
            timestamp: Some("2026-01-01T10:00:00Z".to_string()),
            ..Default::default()
        };
        let result = validate(frame, None, &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => {
                assert_eq!(record.content.as_deref(), Some("base64-encoded-audio"));
                assert!(record.binary_content.is_none());
            }
            ValidatedRecord::System => panic!("expected content record"),
        }
    }

    #[test]
    fn media_with_binary_frame_ignores_inline_content() {
        let frame = InboundFrame {
            message_type: Some("voice".to_string()),
            filename: Some("a.mp3".to_string()),
            content: Some("stale-inline-text".to_string()),
            timestamp: Some("2026-01-01T10:00:00Z".to_string()),
            ..Default::default()
        };
        let result = validate(frame, Some(vec![1, 2, 3]), &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => {
                assert!(record.content.is_none());
                assert_eq!(record.binary_content, Some(vec![1, 2, 3]));
            }
            ValidatedRecord::System => panic!("expected content record"),
        }
    }

    #[test]
    fn media_with_neither_binary_nor_inline_content_is_rejected() {
        let frame = InboundFrame {
            message_type: Some("voice".to_string()),
            filename: Some("a.mp3".to_string()),
            timestamp: Some("2026-01-01T10:00:00Z".to_string()),
            ..Default::default()
        };
        let err = validate(frame, None, &utc_tz()).unwrap_err();
        assert_eq!(err, ValidationError::MissingMediaPayload("voice"));
    }

    #[test]
    fn voice_message_within_window_is_accepted() {
        let frame = InboundFrame {
            message_type: Some("voice".to_string()),
            filename: Some("a.mp3".to_string()),
            timestamp: Some("2026-01-01T10:00:00Z".to_string()),
            ..Default::default()
        };
        let result = validate(frame, Some(vec![1]), &utc_tz()).unwrap();
        match result {
            ValidatedRecord::Content(record) => assert!(record.is_accepted),
            ValidatedRecord::System => panic!("expected content record"),
        }
    }
}
