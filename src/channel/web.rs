//! Web chat service
//!
//! The browser polls for transcript lines, so bot replies are only persisted
//! here. Advisor operations may also reach Telegram sessions; those pushes
//! happen after commit, through a [`MessageSender`].

use super::telegram::{deliver, MessageSender};
use crate::db::{Channel, Client, Database, EscalatedSession, Message, Sender, SessionState};
use crate::flow::{FlowEngine, FlowError, Outcome};
use serde::Serialize;

/// External identifier of the client record behind an authenticated user
pub fn external_id(user_id: i64) -> String {
    format!("web_{user_id}")
}

/// The caller's web session as reported to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionHandle {
    pub session_id: i64,
    pub state: SessionState,
    pub client_id: i64,
}

// ==================== Client Operations ====================

/// Return the caller's non-closed web session, creating one (with the
/// welcome message) when there is none
pub fn open_session(
    db: &Database,
    engine: &FlowEngine,
    user_id: i64,
    name: &str,
) -> Result<SessionHandle, FlowError> {
    db.transaction(|uow| {
        let client = uow.upsert_client(&external_id(user_id), name)?;
        if let Some(session) = uow.find_open_session(client.id, Channel::Web)? {
            return Ok(SessionHandle {
                session_id: session.id,
                state: session.state,
                client_id: client.id,
            });
        }

        let session = uow.create_session(client.id, Channel::Web)?;
        engine.welcome(uow, session.id)?;
        tracing::info!(session_id = session.id, client_id = client.id, "Web session started");
        Ok(SessionHandle {
            session_id: session.id,
            state: session.state,
            client_id: client.id,
        })
    })
}

/// The caller's non-closed web session, without creating anything
pub fn check_session(db: &Database, user_id: i64) -> Result<Option<SessionHandle>, FlowError> {
    db.transaction(|uow| {
        let Some(client) = uow.find_client(&external_id(user_id))? else {
            return Ok(None);
        };
        Ok(uow
            .find_open_session(client.id, Channel::Web)?
            .map(|session| SessionHandle {
                session_id: session.id,
                state: session.state,
                client_id: client.id,
            }))
    })
}

/// Close the caller's current web session (with a farewell line) and start
/// a fresh one at the entry step
pub fn restart_flow(
    db: &Database,
    engine: &FlowEngine,
    user_id: i64,
    name: &str,
) -> Result<SessionHandle, FlowError> {
    db.transaction(|uow| {
        let client = uow.upsert_client(&external_id(user_id), name)?;
        if let Some(previous) = uow.find_open_session(client.id, Channel::Web)? {
            engine.close(uow, previous.id)?;
        }

        let session = uow.create_session(client.id, Channel::Web)?;
        engine.welcome(uow, session.id)?;
        tracing::info!(session_id = session.id, client_id = client.id, "Web flow restarted");
        Ok(SessionHandle {
            session_id: session.id,
            state: session.state,
            client_id: client.id,
        })
    })
}

/// Client that owns the session
pub fn session_owner(db: &Database, session_id: i64) -> Result<Client, FlowError> {
    db.transaction(|uow| {
        let session = uow.get_session(session_id)?;
        Ok(uow.get_client(session.client_id)?)
    })
}

/// Feed a typed message to the engine
pub fn post_message(
    db: &Database,
    engine: &FlowEngine,
    session_id: i64,
    content: &str,
) -> Result<Outcome, FlowError> {
    engine.advance(db.begin()?, session_id, content)
}

/// Transcript of a session, optionally only lines after the `after` id
pub fn messages(db: &Database, session_id: i64, after: Option<i64>) -> Result<Vec<Message>, FlowError> {
    db.transaction(|uow| {
        uow.get_session(session_id)?;
        Ok(uow.messages(session_id, after)?)
    })
}

// ==================== Advisor Operations ====================

pub fn escalated_sessions(db: &Database) -> Result<Vec<EscalatedSession>, FlowError> {
    db.transaction(|uow| Ok(uow.list_escalated_sessions()?))
}

/// Log an advisor line and take the session over from the bot. Telegram
/// sessions also get the line pushed to the client's chat.
pub async fn advisor_message(
    db: &Database,
    sender: &dyn MessageSender,
    session_id: i64,
    content: &str,
) -> Result<(), FlowError> {
    let push_to = db.transaction(|uow| {
        let session = uow.lock_session(session_id)?;
        uow.append_message(session_id, Sender::Agent, content)?;
        if uow.set_session_state(session_id, SessionState::Escalated)? {
            tracing::info!(session_id, "Advisor took over session");
        }

        let client = uow.get_client(session.client_id)?;
        Ok::<_, FlowError>((session.channel == Channel::Telegram).then_some(client.external_id))
    })?;

    if let Some(chat_id) = push_to {
        deliver(sender, &chat_id, content).await;
    }
    Ok(())
}

/// Close a session on behalf of an advisor. Returns `false` when it was
/// already closed.
pub async fn end_session(
    db: &Database,
    engine: &FlowEngine,
    sender: &dyn MessageSender,
    session_id: i64,
) -> Result<bool, FlowError> {
    let closed = db.transaction(|uow| {
        let session = uow.lock_session(session_id)?;
        let Some(farewell) = engine.close(uow, session_id)? else {
            return Ok(None);
        };
        let client = uow.get_client(session.client_id)?;
        Ok::<_, FlowError>(Some((session.channel, client.external_id, farewell)))
    })?;

    let Some((channel, chat_id, farewell)) = closed else {
        return Ok(false);
    };
    if channel == Channel::Telegram {
        deliver(sender, &chat_id, &farewell).await;
    }
    Ok(true)
}
