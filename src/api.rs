//! HTTP API for the support bot
//!
//! Telegram webhook, web chat for clients and the advisor console.

mod auth;
mod handlers;
mod types;

pub use auth::JwtKeys;
pub use handlers::create_router;

use crate::channel::MessageSender;
use crate::db::Database;
use crate::flow::FlowEngine;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: FlowEngine,
    pub sender: Arc<dyn MessageSender>,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn new(db: Database, engine: FlowEngine, sender: Arc<dyn MessageSender>, jwt: JwtKeys) -> Self {
        Self {
            db,
            engine,
            sender,
            jwt: Arc::new(jwt),
        }
    }
}
