//! Database module for the support bot
//!
//! Provides persistence for clients, sessions, transcripts, the step
//! configuration and the billing ledger. Every engine call runs inside a
//! [`UnitOfWork`], an immediate SQLite transaction that rolls back unless it is
//! explicitly committed.

mod ledger;
mod schema;
mod seed;
mod steps;

pub use schema::*;
pub use seed::seed_default_flow;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Malformed JSON column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Client not found: {0}")]
    ClientNotFound(i64),
    #[error("Session not found: {0}")]
    SessionNotFound(i64),
    #[error("Payment {0} was already used")]
    PaymentAlreadyUsed(i64),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panicking holder already rolled back in `UnitOfWork::drop`
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a unit of work.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so a second unit of
    /// work touching the same session waits until this one commits and then
    /// reads the committed row.
    pub fn begin(&self) -> DbResult<UnitOfWork<'_>> {
        UnitOfWork::begin(self.lock())
    }

    /// Run `f` inside a unit of work, committing on `Ok`
    pub fn transaction<T, E>(&self, f: impl FnOnce(&UnitOfWork<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let uow = self.begin()?;
        let value = f(&uow)?;
        uow.commit()?;
        Ok(value)
    }
}

/// An open transaction. Dropping it without [`UnitOfWork::commit`] rolls back
/// every write made through it.
pub struct UnitOfWork<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl<'a> UnitOfWork<'a> {
    fn begin(conn: MutexGuard<'a, Connection>) -> DbResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn commit(mut self) -> DbResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    #[allow(dead_code)] // Drop rolls back implicitly; explicit form for callers that want the error
    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ==================== Client Operations ====================

    /// Create the client on first contact, otherwise overwrite its display
    /// name (last write wins)
    pub fn upsert_client(&self, external_id: &str, name: &str) -> DbResult<Client> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO clients (external_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(external_id) DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
            params![external_id, name, now],
        )?;

        let mut stmt = self.conn().prepare(
            "SELECT id, external_id, name, created_at, updated_at FROM clients WHERE external_id = ?1",
        )?;
        Ok(stmt.query_row(params![external_id], parse_client_row)?)
    }

    pub fn find_client(&self, external_id: &str) -> DbResult<Option<Client>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, external_id, name, created_at, updated_at FROM clients WHERE external_id = ?1",
        )?;
        Ok(stmt.query_row(params![external_id], parse_client_row).optional()?)
    }

    pub fn get_client(&self, id: i64) -> DbResult<Client> {
        let mut stmt = self.conn().prepare(
            "SELECT id, external_id, name, created_at, updated_at FROM clients WHERE id = ?1",
        )?;
        stmt.query_row(params![id], parse_client_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::ClientNotFound(id),
                other => DbError::Sqlite(other),
            })
    }

    // ==================== Session Operations ====================

    /// Create a bot-driven session with no current step
    pub fn create_session(&self, client_id: i64, channel: Channel) -> DbResult<Session> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO sessions (client_id, channel, state, current_step, temp_data, started_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, '{}', ?4, ?4)",
            params![
                client_id,
                channel.as_str(),
                SessionState::ActiveBot.as_str(),
                now.to_rfc3339()
            ],
        )?;

        Ok(Session {
            id: self.conn().last_insert_rowid(),
            client_id,
            channel,
            state: SessionState::ActiveBot,
            current_step: None,
            temp_data: TempData::new(),
            started_at: now,
            updated_at: now,
        })
    }

    /// The client's non-closed session on `channel`, if any
    pub fn find_open_session(&self, client_id: i64, channel: Channel) -> DbResult<Option<Session>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client_id, channel, state, current_step, temp_data, started_at, updated_at
             FROM sessions
             WHERE client_id = ?1 AND channel = ?2 AND state != 'closed'
             ORDER BY started_at DESC, id DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![client_id, channel.as_str()], parse_session_row)
            .optional()?)
    }

    pub fn get_session(&self, id: i64) -> DbResult<Session> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client_id, channel, state, current_step, temp_data, started_at, updated_at
             FROM sessions WHERE id = ?1",
        )?;
        stmt.query_row(params![id], parse_session_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id),
                other => DbError::Sqlite(other),
            })
    }

    /// Read a session for mutation. The unit of work already holds the write
    /// lock, so the row cannot change underneath the caller until commit.
    pub fn lock_session(&self, id: i64) -> DbResult<Session> {
        self.get_session(id)
    }

    /// Persist the session's current step and temp data
    pub fn update_session_progress(
        &self,
        id: i64,
        current_step: &str,
        temp_data: &TempData,
    ) -> DbResult<()> {
        let temp_json = serde_json::to_string(temp_data)?;
        let updated = self.conn().execute(
            "UPDATE sessions SET current_step = ?1, temp_data = ?2, updated_at = ?3 WHERE id = ?4",
            params![current_step, temp_json, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(id));
        }
        Ok(())
    }

    /// Change the session lifecycle. Closed sessions are immutable; returns
    /// whether a row changed.
    pub fn set_session_state(&self, id: i64, state: SessionState) -> DbResult<bool> {
        let updated = self.conn().execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state != 'closed'",
            params![state.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    /// Sessions handed to a human, most recent activity first
    pub fn list_escalated_sessions(&self) -> DbResult<Vec<EscalatedSession>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.id, s.state, s.channel, s.started_at, c.name, c.external_id,
                    (SELECT content FROM messages m WHERE m.session_id = s.id ORDER BY m.id DESC LIMIT 1),
                    (SELECT created_at FROM messages m WHERE m.session_id = s.id ORDER BY m.id DESC LIMIT 1)
                        AS last_activity
             FROM sessions s
             JOIN clients c ON c.id = s.client_id
             WHERE s.state = 'escalated'
             ORDER BY last_activity IS NULL, last_activity DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(EscalatedSession {
                session_id: row.get(0)?,
                state: SessionState::parse(&row.get::<_, String>(1)?),
                channel: Channel::parse(&row.get::<_, String>(2)?),
                started_at: parse_datetime(&row.get::<_, String>(3)?),
                client_name: row.get(4)?,
                external_id: row.get(5)?,
                last_message: row.get(6)?,
                last_activity: row
                    .get::<_, Option<String>>(7)?
                    .map(|s| parse_datetime(&s)),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Message Operations ====================

    /// Append a line to the session transcript
    pub fn append_message(&self, session_id: i64, sender: Sender, content: &str) -> DbResult<Message> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO messages (session_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, sender.as_str(), content, now.to_rfc3339()],
        )?;

        Ok(Message {
            id: self.conn().last_insert_rowid(),
            session_id,
            sender,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Transcript in order, optionally only lines after the `after` cursor
    pub fn messages(&self, session_id: i64, after: Option<i64>) -> DbResult<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, sender, content, created_at
             FROM messages WHERE session_id = ?1 AND id > ?2 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![session_id, after.unwrap_or(0)], |row| {
            Ok(Message {
                id: row.get(0)?,
                session_id: row.get(1)?,
                sender: Sender::parse(&row.get::<_, String>(2)?),
                content: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "Failed to roll back unit of work");
            } else {
                tracing::debug!("Unit of work rolled back");
            }
        }
    }
}

fn parse_client_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let temp_json: String = row.get(5)?;
    let temp_data = serde_json::from_str(&temp_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Session {
        id: row.get(0)?,
        client_id: row.get(1)?,
        channel: Channel::parse(&row.get::<_, String>(2)?),
        state: SessionState::parse(&row.get::<_, String>(3)?),
        current_step: row.get(4)?,
        temp_data,
        started_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

pub(crate) fn parse_decimal(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
