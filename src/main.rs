//! Support bot - customer service chatbot for an internet provider
//!
//! Drives configurable step-graph conversations over Telegram and a web chat,
//! with debt queries, payment reconciliation, support tickets and hand-off
//! to human advisors.

mod api;
mod channel;
mod config;
mod db;
mod flow;

use api::{create_router, AppState, JwtKeys};
use channel::{LogOnlySender, MessageSender, TelegramClient};
use config::Config;
use db::Database;
use flow::FlowEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_bot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;
    db::seed_default_flow(&db)?;

    let sender: Arc<dyn MessageSender> = match &config.telegram_token {
        Some(token) => Arc::new(TelegramClient::new(&config.telegram_api_base, token)?),
        None => {
            tracing::warn!("TELEGRAM_TOKEN not set; Telegram replies will only be logged");
            Arc::new(LogOnlySender)
        }
    };

    let state = AppState::new(
        db,
        FlowEngine::new(),
        sender,
        JwtKeys::new(config.jwt_secret.as_bytes()),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Support bot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
