//! Server wiring: shared application state and the axum router.

use crate::config::AppConfig;
use crate::domain_types::{MaxProcessing, MaxSending};
use crate::ports::{LlmPort, MediaPort, PersistencePort};
use crate::registry::ConnectionRegistry;
use crate::time_provider::SharedTimeProvider;
use crate::{heartbeat, rest_api, session};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared state reachable from every handler and session task.
pub struct AppState {
    /// Connection registry and admission gates.
    pub registry: Arc<ConnectionRegistry>,
    /// Durable storage port.
    pub persistence: Arc<dyn PersistencePort>,
    /// Media blob storage port.
    pub media: Arc<dyn MediaPort>,
    /// External reply-generation port.
    pub llm: Arc<dyn LlmPort>,
    /// Time abstraction used by the processor and heartbeat scanner.
    pub time_provider: SharedTimeProvider,
    /// Admission limit: max clients simultaneously sending.
    pub max_sending: MaxSending,
    /// Admission limit: max messages concurrently processing fleet-wide.
    pub max_processing: MaxProcessing,
}

/// Builds the axum router: websocket endpoint, health, chat history, and
/// static media serving.
pub fn create_router(state: Arc<AppState>, media_root: &std::path::Path) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(rest_api::health))
        .route("/chat-history/{client_id}", get(rest_api::chat_history))
        .nest_service("/media", ServeDir::new(media_root))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

/// Starts the heartbeat scanner as a background task. Called from
/// `session::handle_socket` the first time `ConnectionRegistry::arm_heartbeat_once`
/// returns `true`, per spec.md §4.3/§4.4's "armed on first connect" contract,
/// rather than unconditionally at process startup.
pub fn spawn_heartbeat_scanner(state: &Arc<AppState>) {
    let registry = state.registry.clone();
    let time_provider = state.time_provider.clone();
    tokio::spawn(heartbeat::run(registry, time_provider));
}

/// Binds a listener for the configured address.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn start_server(config: &AppConfig) -> Result<(TcpListener, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves the application on the given listener until it is shut down.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{MaxProcessing as MaxProc, MaxSending as MaxSend};
    use crate::ports::{FilesystemMedia, OpenAiClient, SqlitePersistence};
    use crate::time_provider::test_time_provider;

    async fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        use crate::database::{DatabaseConfig, DatabaseConnection, DatabasePath};

        let db_path = DatabasePath::new(dir.path().join("test.db")).unwrap();
        let conn = DatabaseConnection::initialize(DatabaseConfig::for_testing(db_path))
            .await
            .unwrap();

        Arc::new(AppState {
            registry: Arc::new(ConnectionRegistry::new(
                MaxSend::default(),
                MaxProc::default(),
                test_time_provider(),
            )),
            persistence: Arc::new(SqlitePersistence::new(conn.pool().clone())),
            media: Arc::new(FilesystemMedia::new(dir.path().join("media"))),
            llm: Arc::new(OpenAiClient::new(
                "test-key".to_string(),
                "gpt-4".to_string(),
                "https://api.openai.com/v1".to_string(),
                1000,
                0.7,
            )),
            time_provider: test_time_provider(),
            max_sending: MaxSend::default(),
            max_processing: MaxProc::default(),
        })
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let router = create_router(state, dir.path());
        assert!(!format!("{router:?}").is_empty());
    }
}
