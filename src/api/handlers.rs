//! HTTP request handlers

use super::auth::Caller;
use super::types::{
    ChatMessageRequest, CheckSessionResponse, EndSessionResponse, ErrorResponse, MessagesQuery,
    MessagesResponse, OkResponse, SessionResponse, SessionsResponse,
};
use super::AppState;
use crate::channel::{telegram, web, Update};
use crate::flow::FlowError;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Telegram push channel
        .route("/api/bot/webhook", post(telegram_webhook))
        // Web chat, client side
        .route("/api/chat/session", post(open_session))
        .route("/api/chat/session/check", get(check_session))
        .route("/api/chat/session/flow", post(restart_flow))
        .route("/api/chat/message", post(send_message))
        .route("/api/chat/messages/:session_id", get(get_messages))
        // Advisor console
        .route("/api/chat/sessions", get(list_sessions))
        .route("/api/chat/advisor-message", post(send_advisor_message))
        .route("/api/chat/session/:session_id/end", post(end_session))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Telegram Webhook
// ============================================================

/// Always 200 so the provider does not redeliver; the body tells a fault
/// apart for whoever reads the logs.
async fn telegram_webhook(State(state): State<AppState>, body: Bytes) -> &'static str {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable webhook payload");
            return "OK";
        }
    };

    match telegram::handle_update(&state.db, &state.engine, state.sender.as_ref(), update).await {
        Ok(()) => "OK",
        Err(e) => {
            tracing::error!(error = %e, "Webhook update failed, transaction rolled back");
            "Error"
        }
    }
}

// ============================================================
// Web Chat (client side)
// ============================================================

async fn open_session(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SessionResponse>, AppError> {
    let handle = web::open_session(&state.db, &state.engine, caller.user_id, &caller.name)?;
    Ok(Json(SessionResponse {
        session_id: handle.session_id,
        estado: handle.state,
        cliente_id: handle.client_id,
    }))
}

async fn check_session(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<CheckSessionResponse>, AppError> {
    let handle = web::check_session(&state.db, caller.user_id)?;
    Ok(Json(CheckSessionResponse {
        active: handle.is_some(),
        session_id: handle.as_ref().map(|h| h.session_id),
        estado: handle.map(|h| h.state),
    }))
}

async fn restart_flow(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SessionResponse>, AppError> {
    let handle = web::restart_flow(&state.db, &state.engine, caller.user_id, &caller.name)?;
    Ok(Json(SessionResponse {
        session_id: handle.session_id,
        estado: handle.state,
        cliente_id: handle.client_id,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ChatMessageRequest>,
) -> Result<(StatusCode, Json<OkResponse>), AppError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("sessionId y content son requeridos.".to_string()));
    }
    authorize_session(&state, &caller, req.session_id)?;

    let outcome = web::post_message(&state.db, &state.engine, req.session_id, content)?;
    tracing::debug!(session_id = outcome.session_id, step = ?outcome.current_step, state = %outcome.state, "Web message processed");
    Ok((StatusCode::CREATED, Json(OkResponse { ok: true })))
}

async fn get_messages(
    State(state): State<AppState>,
    caller: Caller,
    Path(session_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, AppError> {
    authorize_session(&state, &caller, session_id)?;
    let messages = web::messages(&state.db, session_id, query.after)?;
    Ok(Json(MessagesResponse { messages }))
}

/// Clients may only touch their own sessions
fn authorize_session(state: &AppState, caller: &Caller, session_id: i64) -> Result<(), AppError> {
    if caller.role.is_staff() {
        return Ok(());
    }
    let owner = web::session_owner(&state.db, session_id)?;
    if owner.external_id == web::external_id(caller.user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("La sesión no pertenece a este usuario.".to_string()))
    }
}

// ============================================================
// Advisor Console
// ============================================================

async fn list_sessions(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SessionsResponse>, AppError> {
    caller.require_staff()?;
    let sessions = web::escalated_sessions(&state.db)?;
    Ok(Json(SessionsResponse { sessions }))
}

async fn send_advisor_message(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ChatMessageRequest>,
) -> Result<(StatusCode, Json<OkResponse>), AppError> {
    caller.require_staff()?;
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("sessionId y content son requeridos.".to_string()));
    }

    web::advisor_message(&state.db, state.sender.as_ref(), req.session_id, content).await?;
    Ok((StatusCode::CREATED, Json(OkResponse { ok: true })))
}

async fn end_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(session_id): Path<i64>,
) -> Result<Json<EndSessionResponse>, AppError> {
    caller.require_staff()?;
    let closed = web::end_session(&state.db, &state.engine, state.sender.as_ref(), session_id).await?;
    tracing::info!(session_id, advisor = caller.user_id, closed, "Advisor ended session");
    Ok(Json(EndSessionResponse { ok: true, closed }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("support-bot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

/// Reply for engine and store faults; the detail only goes to the log
const PROCESSING_FAILED: &str = "Error al procesar el mensaje.";

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl From<FlowError> for AppError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::SessionNotFound(id) => AppError::NotFound(format!("Session not found: {id}")),
            other => {
                tracing::error!(error = %other, "Request failed");
                AppError::Internal(PROCESSING_FAILED.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
