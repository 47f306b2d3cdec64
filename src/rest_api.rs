//! REST surfaces alongside the websocket endpoint: health and chat history.

use crate::domain_types::ClientId;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving requests.
    pub status: &'static str,
    /// Number of live sessions.
    pub active_connections: usize,
    /// Number of sessions currently marked sending.
    pub currently_sending: usize,
    /// Number of in-flight message processing operations.
    pub messages_processing: usize,
    /// Configured sending admission limit.
    pub max_sending: usize,
    /// Configured processing admission limit.
    pub max_processing: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_connections: state.registry.active_connections(),
        currently_sending: state.registry.sending_count(),
        messages_processing: state.registry.processing_count(),
        max_sending: state.max_sending.as_usize(),
        max_processing: state.max_processing.as_usize(),
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponseItem {
    pub id: i64,
    pub message_type: String,
    pub content: Option<String>,
    pub client_timestamp: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub status: &'static str,
    pub data: Vec<HistoryResponseItem>,
    pub pagination: Pagination,
}

/// `GET /chat-history/{client_id}`
///
/// `limit` is clamped to `[1, 100]`, `offset` to `>= 0`, matching the
/// original implementation's `chat_server.py`.
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let Ok(client_id) = ClientId::try_new(client_id) else {
        return (StatusCode::BAD_REQUEST, "invalid client_id").into_response();
    };

    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    match state.persistence.history(&client_id, limit, offset).await {
        Ok(page) => {
            let data = page
                .messages
                .into_iter()
                .map(|m| HistoryResponseItem {
                    id: i64::from(m.id),
                    message_type: m.message_type,
                    content: m.content_ref,
                    client_timestamp: m.client_timestamp,
                    accepted: m.accepted,
                })
                .collect();

            Json(HistoryResponse {
                status: "ok",
                data,
                pagination: Pagination {
                    total: page.total,
                    offset,
                    limit,
                    has_more: page.has_more,
                },
            })
            .into_response()
        }
        Err(err) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn history_query_defaults_match_clamp_bounds() {
        // limit defaults to 50, clamp bounds are [1, 100]; this documents
        // the contract rather than exercising an HTTP call.
        let limit: i64 = 200;
        assert_eq!(limit.clamp(1, 100), 100);
        let limit: i64 = 0;
        assert_eq!(limit.clamp(1, 100), 1);
    }
}
