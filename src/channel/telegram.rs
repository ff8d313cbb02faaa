//! Telegram channel: webhook payloads and outbound delivery

use crate::db::{Channel, Database};
use crate::flow::{FlowEngine, FlowError, Inbound};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Display name used when the update carries no first name
pub const DEFAULT_DISPLAY_NAME: &str = "Usuario";

// ==================== Webhook Payload ====================

/// Subset of a Telegram `Update` the bot consumes
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    #[serde(default)]
    pub first_name: Option<String>,
}

impl Update {
    /// Engine input for this update; `None` for updates without text
    /// (stickers, edits, joins)
    pub fn into_inbound(self) -> Option<Inbound> {
        let message = self.message?;
        let text = message.text.filter(|t| !t.is_empty())?;
        let display_name = message
            .from
            .and_then(|f| f.first_name)
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        Some(Inbound {
            external_id: message.chat.id.to_string(),
            channel: Channel::Telegram,
            text: text.trim().to_string(),
            display_name,
        })
    }
}

// ==================== Outbound Delivery ====================

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Pushes text to a chat on the messaging provider
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Bot API client
pub struct TelegramClient {
    client: Client,
    send_url: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            send_url: format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.send_url)
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Stand-in used when no bot token is configured
pub struct LogOnlySender;

#[async_trait]
impl MessageSender for LogOnlySender {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        tracing::info!(chat_id, chars = text.chars().count(), "No Telegram token configured, dropping message");
        Ok(())
    }
}

/// Best-effort delivery. Failures are logged; the state they report on is
/// already committed.
pub async fn deliver(sender: &dyn MessageSender, chat_id: &str, text: &str) {
    if let Err(e) = sender.send(chat_id, text).await {
        tracing::warn!(chat_id, error = %e, "Telegram delivery failed");
    }
}

// ==================== Webhook Handling ====================

/// Run one webhook update through the engine and deliver the reply
pub async fn handle_update(
    db: &Database,
    engine: &FlowEngine,
    sender: &dyn MessageSender,
    update: Update,
) -> Result<(), FlowError> {
    let Some(inbound) = update.into_inbound() else {
        tracing::debug!("Ignoring update without text");
        return Ok(());
    };

    let outcome = engine.handle(db, &inbound)?;
    tracing::debug!(
        session_id = outcome.session_id,
        client_id = outcome.client_id,
        step = ?outcome.current_step,
        state = %outcome.state,
        effects = ?outcome.effects,
        "Telegram update processed"
    );
    if let Some(reply) = outcome.reply {
        deliver(sender, &inbound.external_id, &reply).await;
    }
    Ok(())
}
