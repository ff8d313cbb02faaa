//! Flow engine orchestration
//!
//! One inbound message is one unit of work: the session row is read under the
//! write lock, the transition is resolved, the action runs, and transcript
//! plus session progress are written before a single commit. Any error drops
//! the unit of work, which rolls every write back.

use super::action::{self, ActionContext, SideEffect};
use super::step::{render, Step, ENTRY_STEP, FAREWELL_STEP};
use super::transition::{resolve, Resolution, TransitionError};
use crate::db::{Channel, Database, DbError, Sender, SessionState, UnitOfWork};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

/// Faults that abort the unit of work. Business failures (unknown payment
/// reference, unmatched option) are replies, not errors.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Db(DbError),
    #[error("Unknown step: {0}")]
    UnknownStep(String),
    #[error("Step {0} is an open question without a default next step")]
    MissingDefaultNext(String),
    #[error("Option {text:?} of step {step} has an invalid pattern: {source}")]
    InvalidPattern {
        step: String,
        text: String,
        #[source]
        source: regex::Error,
    },
    #[error("Session not found: {0}")]
    SessionNotFound(i64),
}

impl From<DbError> for FlowError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SessionNotFound(id) => FlowError::SessionNotFound(id),
            other => FlowError::Db(other),
        }
    }
}

impl From<TransitionError> for FlowError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::MissingDefaultNext(step) => FlowError::MissingDefaultNext(step),
            TransitionError::InvalidPattern { step, text, source } => {
                FlowError::InvalidPattern { step, text, source }
            }
        }
    }
}

/// A message arriving from a channel adapter
#[derive(Debug, Clone)]
pub struct Inbound {
    pub external_id: String,
    pub channel: Channel,
    pub text: String,
    pub display_name: String,
}

/// Committed result of one engine invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub session_id: i64,
    pub client_id: i64,
    /// `None` when the bot stays silent (escalated or closed session)
    pub reply: Option<String>,
    pub state: SessionState,
    pub current_step: Option<String>,
    pub effects: Vec<SideEffect>,
}

/// Channel-agnostic conversation driver
#[derive(Debug, Clone, Copy)]
pub struct FlowEngine {
    today: fn() -> NaiveDate,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self {
            today: || Utc::now().date_naive(),
        }
    }
}

impl FlowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a fixed calendar, for reproducible due dates
    #[allow(dead_code)] // Used in tests
    pub fn with_today(today: fn() -> NaiveDate) -> Self {
        Self { today }
    }

    /// Resolve the client and its open session on the channel, then advance
    pub fn handle(&self, db: &Database, inbound: &Inbound) -> Result<Outcome, FlowError> {
        let uow = db.begin()?;
        let client = uow.upsert_client(&inbound.external_id, &inbound.display_name)?;
        let session = match uow.find_open_session(client.id, inbound.channel)? {
            Some(session) => session,
            None => {
                let session = uow.create_session(client.id, inbound.channel)?;
                tracing::info!(session_id = session.id, client_id = client.id, channel = %inbound.channel, "Session started");
                session
            }
        };
        self.advance(uow, session.id, &inbound.text)
    }

    /// Apply one inbound text to the session and commit.
    ///
    /// Takes the unit of work by value: it either commits here or is dropped
    /// on the error path, rolling back.
    pub fn advance(&self, uow: UnitOfWork<'_>, session_id: i64, text: &str) -> Result<Outcome, FlowError> {
        let session = uow.lock_session(session_id)?;

        if !session.state.accepts_bot_transitions() {
            uow.append_message(session.id, Sender::User, text)?;
            uow.commit()?;
            tracing::debug!(session_id, state = %session.state, "Bot silent on non-active session");
            return Ok(Outcome {
                session_id,
                client_id: session.client_id,
                reply: None,
                state: session.state,
                current_step: session.current_step,
                effects: vec![],
            });
        }

        let Some(current_code) = session.current_step else {
            // First contact: the text is kept for audit but not matched
            uow.append_message(session.id, Sender::User, text)?;
            let reply = self.welcome(&uow, session.id)?;
            uow.commit()?;
            return Ok(Outcome {
                session_id,
                client_id: session.client_id,
                reply: Some(reply),
                state: session.state,
                current_step: Some(ENTRY_STEP.to_string()),
                effects: vec![],
            });
        };

        let current = load_step(&uow, &current_code)?;

        let (target, temp_data) = match resolve(&current, &session.temp_data, text)? {
            Resolution::Reprompt { reply } => {
                uow.append_message(session.id, Sender::User, text)?;
                uow.append_message(session.id, Sender::Bot, &reply)?;
                uow.commit()?;
                tracing::debug!(session_id, step = %current.code, "No option matched, reprompting");
                return Ok(Outcome {
                    session_id,
                    client_id: session.client_id,
                    reply: Some(reply),
                    state: session.state,
                    current_step: Some(current_code),
                    effects: vec![],
                });
            }
            Resolution::Advance { next_step, temp_data } => (next_step, temp_data),
        };

        let next = load_step(&uow, &target)?;
        let mut prompt = next.prompt.clone();
        let mut options = next.options.clone();
        let mut next_code = next.code.clone();
        let mut state = session.state;
        let mut effects = Vec::new();

        if let Some(action) = next.action {
            let ctx = ActionContext {
                session_id,
                client_id: session.client_id,
                prior_step: &current.code,
                user_text: text,
                temp_data: &temp_data,
                today: (self.today)(),
            };
            let outcome = action::execute(&uow, action, &next.prompt, &ctx)?;

            if let Some(reply) = outcome.reply {
                prompt = reply;
            }
            if let Some(overridden) = outcome.options {
                options = overridden;
            }
            if let Some(redirect) = outcome.next_step {
                next_code = load_step(&uow, &redirect)?.code;
            }
            if let Some(new_state) = outcome.state {
                state = new_state;
            }
            effects.extend(outcome.effect);
        }

        let reply = render(&prompt, &options);
        uow.append_message(session.id, Sender::User, text)?;
        uow.append_message(session.id, Sender::Bot, &reply)?;
        uow.update_session_progress(session.id, &next_code, &temp_data)?;
        uow.commit()?;

        tracing::info!(session_id, from = %current.code, to = %next_code, "Session advanced");
        Ok(Outcome {
            session_id,
            client_id: session.client_id,
            reply: Some(reply),
            state,
            current_step: Some(next_code),
            effects,
        })
    }

    /// Park the session on the entry step and log its rendered prompt as a
    /// bot message. Returns the welcome text.
    #[allow(clippy::unused_self)] // Engine-scoped for symmetry with advance
    pub fn welcome(&self, uow: &UnitOfWork<'_>, session_id: i64) -> Result<String, FlowError> {
        let session = uow.lock_session(session_id)?;
        let entry = load_step(uow, ENTRY_STEP)?;
        let reply = render(&entry.prompt, &entry.options);

        uow.append_message(session_id, Sender::Bot, &reply)?;
        uow.update_session_progress(session_id, ENTRY_STEP, &session.temp_data)?;
        Ok(reply)
    }

    /// Close the session, logging the farewell prompt as a bot message.
    /// Returns `None` when the session was already closed.
    #[allow(clippy::unused_self)]
    pub fn close(&self, uow: &UnitOfWork<'_>, session_id: i64) -> Result<Option<String>, FlowError> {
        let session = uow.lock_session(session_id)?;
        if session.state == SessionState::Closed {
            return Ok(None);
        }

        let farewell = load_step(uow, FAREWELL_STEP)?.prompt;
        uow.append_message(session_id, Sender::Bot, &farewell)?;
        uow.set_session_state(session_id, SessionState::Closed)?;
        tracing::info!(session_id, "Session closed");
        Ok(Some(farewell))
    }
}

fn load_step(uow: &UnitOfWork<'_>, code: &str) -> Result<Step, FlowError> {
    uow.find_step(code)?.ok_or_else(|| {
        tracing::error!(step = %code, "Step referenced but not configured");
        FlowError::UnknownStep(code.to_string())
    })
}
