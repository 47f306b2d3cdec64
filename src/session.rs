//! Session Handler: per-connection state machine, built on
//! `axum::extract::ws`.
//!
//! ```text
//! ACCEPTED --handshake--> IDENTIFIED --registry.connect--> RUNNING
//! RUNNING --content frame--> ADMIT --gates pass--> PROCESS --> RUNNING
//! RUNNING --transport disconnect--> CLOSING --registry.disconnect--> TERMINAL
//! ```

use crate::domain_types::{ClientId, ClientTimezone};
use crate::error::{ChatError, ChatResult};
use crate::processor;
use crate::server::AppState;
use crate::validator::{self, InboundFrame, ValidatedRecord};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};

/// A frame queued for delivery to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    /// Sent once, immediately after a successful handshake.
    #[serde(rename = "system")]
    System {
        /// Human-readable confirmation.
        data: SystemData,
        /// Present and `true` on system frames, per the wire contract.
        is_system: bool,
    },
    /// A client-visible rejection that does not close the session.
    #[serde(rename = "error")]
    Error {
        /// Error payload.
        data: ErrorData,
    },
    /// A persisted reply.
    #[serde(rename = "message")]
    Message {
        /// Reply payload.
        data: MessageData,
    },
    /// A liveness ping.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        /// Ping body.
        message: String,
        /// Timestamp the ping was sent at.
        timestamp: String,
    },
}

/// Body of a system frame.
#[derive(Debug, Clone, Serialize)]
pub struct SystemData {
    /// Confirmation message.
    pub message: String,
}

/// Body of an error frame.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    /// Human-readable rejection reason.
    pub message: String,
}

/// Body of a reply frame.
#[derive(Debug, Clone, Serialize)]
pub struct MessageData {
    /// Database id of the persisted reply, if known.
    pub id: Option<i64>,
    /// Text body, or a media URL.
    pub content: String,
    /// One of `text`, `voice`, `image`.
    pub reply_type: String,
    /// Filename, for media replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME type, for media replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(serde::Deserialize)]
struct HandshakeFrame {
    client_id: String,
    #[serde(default)]
    timezone: Option<String>,
}

/// Drives one accepted websocket connection end to end.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let Some(Ok(Message::Text(first))) = stream.next().await else {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Client ID required".into(),
            })))
            .await;
        return;
    };

    let Ok(handshake) = serde_json::from_str::<HandshakeFrame>(&first) else {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Client ID required".into(),
            })))
            .await;
        return;
    };

    let Ok(client_id) = ClientId::try_new(handshake.client_id) else {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: "Client ID required".into(),
            })))
            .await;
        return;
    };

    let timezone = handshake
        .timezone
        .and_then(|tz| ClientTimezone::try_new(tz).ok())
        .unwrap_or_else(ClientTimezone::utc);

    if let Err(err) = state.persistence.upsert_client(&client_id, &timezone).await {
        warn!(%client_id, %err, "failed to upsert client row, continuing anyway");
    }

    let (outbound_tx, mut outbound_rx) = unbounded_channel::<OutboundFrame>();
    let cancel_token = state.registry.connect(client_id.as_ref(), timezone.clone(), outbound_tx.clone());
    info!(%client_id, "session identified and registered");

    if state.registry.arm_heartbeat_once() {
        info!("arming heartbeat scanner on first connection");
        crate::server::spawn_heartbeat_scanner(&state);
    }

    let _ = outbound_tx.send(OutboundFrame::System {
        data: SystemData {
            message: "Connected successfully".to_string(),
        },
        is_system: true,
    });

    let writer_cancel = cancel_token.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(text) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        let message = err.to_string();
                        if message.contains("code 1000") || message.contains("connection") {
                            break;
                        }
                        warn!(%err, "reply write failed, skipping this reply");
                    }
                }
            }
        }
    });

    let mut pending_binary: Option<Vec<u8>> = None;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(%client_id, "session evicted, ending receive loop");
                break;
            }
            message = stream.next() => {
                let Some(message) = message else { break };
                match message {
                    Ok(Message::Text(text)) => {
                        dispatch_text(&text, pending_binary.take(), &client_id, &timezone, &state, &outbound_tx).await;
                    }
                    Ok(Message::Binary(bytes)) => {
                        pending_binary = Some(bytes.to_vec());
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(err) => {
                        warn!(%err, %client_id, "transport error, treating as disconnect");
                        break;
                    }
                }
            }
        }
    }

    state.registry.disconnect(client_id.as_ref());

    if tokio::time::timeout(Duration::from_millis(500), &mut writer).await.is_err() {
        warn!(%client_id, "writer task did not exit after close, aborting");
        writer.abort();
    }

    info!(%client_id, "session closed");
}

/// Classifies one inbound text frame and drives it through the admission
/// gates and processor, queuing any replies for the writer task.
async fn dispatch_text(
    text: &str,
    pending_binary: Option<Vec<u8>>,
    client_id: &ClientId,
    timezone: &ClientTimezone,
    state: &Arc<AppState>,
    outbound_tx: &tokio::sync::mpsc::UnboundedSender<OutboundFrame>,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return,
    };

    if is_heartbeat_pong(&frame) {
        state.registry.touch_heartbeat(client_id.as_ref());
        return;
    }

    let record = match classify(frame, pending_binary, timezone) {
        Ok(record) => record,
        Err(chat_err) => {
            let _ = outbound_tx.send(OutboundFrame::Error {
                data: ErrorData {
                    message: chat_err.to_string(),
                },
            });
            return;
        }
    };

    let ValidatedRecord::Content(record) = record else {
        return;
    };

    if !state.registry.start_sending(client_id.as_ref()) {
        let chat_err = ChatError::Registry("Too many clients sending, please try again shortly".to_string());
        let _ = outbound_tx.send(OutboundFrame::Error {
            data: ErrorData {
                message: chat_err.to_string(),
            },
        });
        return;
    }

    if !state.registry.acquire_processing_slot() {
        let chat_err = ChatError::Registry("Server at max capacity, please try again shortly".to_string());
        let _ = outbound_tx.send(OutboundFrame::Error {
            data: ErrorData {
                message: chat_err.to_string(),
            },
        });
        state.registry.stop_sending(client_id.as_ref());
        return;
    }

    let replies = processor::process(
        record,
        client_id,
        &state.persistence,
        &state.media,
        &state.llm,
        &state.time_provider,
    )
    .await;

    state.registry.release_processing_slot();
    state.registry.stop_sending(client_id.as_ref());

    for reply in replies {
        let _ = outbound_tx.send(OutboundFrame::Message {
            data: MessageData {
                id: reply.id,
                content: reply.content,
                reply_type: reply.reply_type.to_string(),
                filename: reply.filename.map(str::to_string),
                mime_type: reply.mime_type.map(str::to_string),
            },
        });
    }
}

/// Runs the validator and converts its error into the crate-wide boundary
/// type, the single point where an inbound frame either becomes a
/// `ValidatedRecord` or a client-visible `ChatError`.
fn classify(
    frame: InboundFrame,
    pending_binary: Option<Vec<u8>>,
    timezone: &ClientTimezone,
) -> ChatResult<ValidatedRecord> {
    validator::validate(frame, pending_binary, timezone).map_err(ChatError::from)
}

fn is_heartbeat_pong(frame: &InboundFrame) -> bool {
    matches!(frame.frame_type.as_deref(), Some("heartbeat")) && frame.message_type.is_none()
}
