//! Chat gateway server entry point.

use anyhow::{Context, Result};
use chat_gateway::database::DatabaseConnection;
use chat_gateway::ports::{FilesystemMedia, OpenAiClient, SqlitePersistence};
use chat_gateway::registry::ConnectionRegistry;
use chat_gateway::time_provider::production_time_provider;
use chat_gateway::{create_router, serve, start_server, AppConfig, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_gateway=info".parse()?),
        )
        .init();

    info!("Starting chat gateway server");

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tokio::fs::create_dir_all(&config.media_root)
        .await
        .context("failed to create media root")?;

    let db_config = config.database_config().context("invalid database configuration")?;
    let connection = DatabaseConnection::initialize(db_config)
        .await
        .context("failed to initialize database")?;

    let api_key = config
        .llm
        .api_key
        .clone()
        .context("OPENAI_API_KEY environment variable is not set")?;

    let time_provider = production_time_provider();
    let state = Arc::new(AppState {
        registry: Arc::new(ConnectionRegistry::new(
            config.max_sending,
            config.max_processing,
            time_provider.clone(),
        )),
        persistence: Arc::new(SqlitePersistence::new(connection.pool().clone())),
        media: Arc::new(FilesystemMedia::new(config.media_root.clone())),
        llm: Arc::new(OpenAiClient::new(
            api_key,
            config.llm.model.clone(),
            config.llm.api_base.clone(),
            config.llm.max_tokens,
            config.llm.temperature,
        )),
        time_provider,
        max_sending: config.max_sending,
        max_processing: config.max_processing,
    });

    let media_root = config.media_root.clone();
    let router = create_router(state, &media_root);
    let (listener, addr) = start_server(&config).await.context("failed to bind listener")?;
    info!(%addr, "chat gateway listening");

    serve(listener, router).await.context("server error")?;

    Ok(())
}
