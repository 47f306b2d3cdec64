//! End-to-end scenarios against the processor and registry directly,
//! bypassing the websocket transport (that layer is exercised in
//! `session.rs`'s own unit tests; these assert the persisted-state and
//! reply-list contracts the transport just forwards).

use async_trait::async_trait;
use chat_gateway::domain_types::{ClientId, ClientTimezone, MaxProcessing, MaxSending};
use chat_gateway::ports::{
    HistoryPage, LlmError, LlmPort, LlmStatus, MediaContent, MediaError, MediaKind, MediaPort,
    MessageRecord, PersistenceError, PersistencePort, ReplyRecord,
};
use chat_gateway::processor;
use chat_gateway::registry::ConnectionRegistry;
use chat_gateway::time_provider::test_time_provider;
use chat_gateway::validator::{self, ContentRecord, InboundFrame, ValidatedRecord};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;

struct InMemoryPersistence {
    next_message_id: AtomicI64,
    next_reply_id: AtomicI64,
    messages: std::sync::Mutex<Vec<MessageRecord>>,
    replies: std::sync::Mutex<Vec<ReplyRecord>>,
}

impl InMemoryPersistence {
    fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            next_reply_id: AtomicI64::new(1),
            messages: std::sync::Mutex::new(Vec::new()),
            replies: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn upsert_client(
        &self,
        _client_id: &ClientId,
        _timezone: &ClientTimezone,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn insert_message(
        &self,
        record: MessageRecord,
    ) -> Result<chat_gateway::domain_types::MessageId, PersistenceError> {
        self.messages.lock().unwrap().push(record);
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        Ok(chat_gateway::domain_types::MessageId::try_new(id).unwrap())
    }

    async fn insert_reply(
        &self,
        record: ReplyRecord,
    ) -> Result<chat_gateway::domain_types::ReplyId, PersistenceError> {
        self.replies.lock().unwrap().push(record);
        let id = self.next_reply_id.fetch_add(1, Ordering::SeqCst);
        Ok(chat_gateway::domain_types::ReplyId::try_new(id).unwrap())
    }

    async fn count_messages(&self, _client_id: &ClientId) -> Result<i64, PersistenceError> {
        Ok(self.messages.lock().unwrap().len() as i64)
    }

    async fn history(
        &self,
        _client_id: &ClientId,
        _limit: i64,
        _offset: i64,
    ) -> Result<HistoryPage, PersistenceError> {
        Ok(HistoryPage {
            messages: vec![],
            total: 0,
            has_more: false,
        })
    }
}

struct StubMedia;

#[async_trait]
impl MediaPort for StubMedia {
    async fn save(
        &self,
        _content: MediaContent,
        kind: MediaKind,
        filename: &chat_gateway::domain_types::Filename,
    ) -> Result<String, MediaError> {
        Ok(format!("/media/stub/{kind:?}/{}", filename.as_ref()))
    }
}

struct StubLlm {
    rate_limited: bool,
}

#[async_trait]
impl LlmPort for StubLlm {
    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("hello from the assistant".to_string())
    }

    fn status(&self) -> LlmStatus {
        LlmStatus {
            rate_limited: self.rate_limited,
            seconds_remaining: if self.rate_limited { Some(1500) } else { None },
        }
    }
}

fn utc_client() -> (ClientId, ClientTimezone) {
    (
        ClientId::try_new("scenario-client".to_string()).unwrap(),
        ClientTimezone::utc(),
    )
}

fn classify(frame: InboundFrame, binary: Option<Vec<u8>>, tz: &ClientTimezone) -> ContentRecord {
    match validator::validate(frame, binary, tz).unwrap() {
        ValidatedRecord::Content(record) => record,
        ValidatedRecord::System => panic!("expected a content record"),
    }
}

#[tokio::test]
async fn text_message_at_noon_is_accepted_and_persists_one_reply() {
    let (client_id, tz) = utc_client();
    let frame = InboundFrame {
        message_type: Some("text".to_string()),
        content: Some("hi".to_string()),
        timestamp: Some("2026-01-01T12:00:00Z".to_string()),
        ..Default::default()
    };
    let record = classify(frame, None, &tz);

    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let media: Arc<dyn MediaPort> = Arc::new(StubMedia);
    let llm: Arc<dyn LlmPort> = Arc::new(StubLlm { rate_limited: false });

    let replies = processor::process(record, &client_id, &persistence, &media, &llm, &test_time_provider()).await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].reply_type, "text");
    assert!(!replies[0].content.is_empty());
}

#[tokio::test]
async fn text_message_at_3am_is_rejected_with_policy_reason() {
    let (client_id, tz) = utc_client();
    let frame = InboundFrame {
        message_type: Some("text".to_string()),
        content: Some("hi".to_string()),
        timestamp: Some("2026-01-01T03:00:00Z".to_string()),
        ..Default::default()
    };
    let record = classify(frame, None, &tz);

    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let media: Arc<dyn MediaPort> = Arc::new(StubMedia);
    let llm: Arc<dyn LlmPort> = Arc::new(StubLlm { rate_limited: false });

    let replies = processor::process(record, &client_id, &persistence, &media, &llm, &test_time_provider()).await;

    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].content,
        "Text messages are only accepted between 5 AM and midnight"
    );
}

#[tokio::test]
async fn voice_message_at_10am_emits_text_then_voice_reply() {
    let (client_id, tz) = utc_client();
    let frame = InboundFrame {
        message_type: Some("voice".to_string()),
        filename: Some("a.mp3".to_string()),
        timestamp: Some("2026-01-01T10:00:00Z".to_string()),
        ..Default::default()
    };
    let record = classify(frame, Some(vec![1, 2, 3]), &tz);

    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let media: Arc<dyn MediaPort> = Arc::new(StubMedia);
    let llm: Arc<dyn LlmPort> = Arc::new(StubLlm { rate_limited: false });

    let replies = processor::process(record, &client_id, &persistence, &media, &llm, &test_time_provider()).await;

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].reply_type, "text");
    assert_eq!(replies[1].reply_type, "voice");
    assert_eq!(replies[1].content, "/media/static_replies/reply.mp3");
}

#[tokio::test]
async fn video_message_at_10pm_emits_text_voice_image_in_order() {
    let (client_id, tz) = utc_client();
    let frame = InboundFrame {
        message_type: Some("video".to_string()),
        filename: Some("a.mp4".to_string()),
        timestamp: Some("2026-01-01T22:00:00Z".to_string()),
        ..Default::default()
    };
    let record = classify(frame, Some(vec![1, 2, 3]), &tz);

    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let media: Arc<dyn MediaPort> = Arc::new(StubMedia);
    let llm: Arc<dyn LlmPort> = Arc::new(StubLlm { rate_limited: false });

    let replies = processor::process(record, &client_id, &persistence, &media, &llm, &test_time_provider()).await;

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0].reply_type, "text");
    assert_eq!(replies[1].reply_type, "voice");
    assert_eq!(replies[2].reply_type, "image");
    assert_eq!(replies[2].content, "/media/static_replies/reply.png");
}

#[tokio::test]
async fn llm_rate_limited_yields_single_busy_reply_with_minutes() {
    let (client_id, tz) = utc_client();
    let frame = InboundFrame {
        message_type: Some("text".to_string()),
        content: Some("hi".to_string()),
        timestamp: Some("2026-01-01T12:00:00Z".to_string()),
        ..Default::default()
    };
    let record = classify(frame, None, &tz);

    let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
    let media: Arc<dyn MediaPort> = Arc::new(StubMedia);
    let llm: Arc<dyn LlmPort> = Arc::new(StubLlm { rate_limited: true });

    let replies = processor::process(record, &client_id, &persistence, &media, &llm, &test_time_provider()).await;

    assert_eq!(replies.len(), 1);
    assert!(replies[0]
        .content
        .starts_with("System is currently busy. Please try again in 26 minutes"));
}

#[tokio::test]
async fn sending_gate_rejects_the_51st_concurrent_intake() {
    let registry = ConnectionRegistry::new(
        MaxSending::try_new(50).unwrap(),
        MaxProcessing::try_new(500).unwrap(),
        test_time_provider(),
    );

    for i in 0..50 {
        let (tx, _rx) = unbounded_channel();
        let client_id = format!("client-{i}");
        registry.connect(&client_id, ClientTimezone::utc(), tx);
        assert!(registry.start_sending(&client_id));
    }

    let (tx, _rx) = unbounded_channel();
    registry.connect("client-50", ClientTimezone::utc(), tx);
    assert!(!registry.start_sending("client-50"));
    assert_eq!(registry.sending_count(), 50);
}
