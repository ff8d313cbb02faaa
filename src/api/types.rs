//! API request and response types

use crate::db::{EscalatedSession, Message, SessionState};
use serde::{Deserialize, Serialize};

/// Message typed by a client or an advisor
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub session_id: i64,
    pub content: String,
}

/// Poll cursor for the transcript
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub after: Option<i64>,
}

/// The caller's web session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: i64,
    pub estado: SessionState,
    pub cliente_id: i64,
}

/// Whether the caller has a non-closed web session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSessionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estado: Option<SessionState>,
}

/// Transcript lines in order
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

/// Sessions waiting on an advisor
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<EscalatedSession>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Response for an advisor closing a session
#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub ok: bool,
    /// `false` when the session was already closed
    pub closed: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
