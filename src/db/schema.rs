//! Database schema and types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    channel TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active_bot',
    current_step TEXT,
    temp_data TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);

-- At most one non-closed session per client and channel
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_open
    ON sessions(client_id, channel) WHERE state != 'closed';
CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);

CREATE TABLE IF NOT EXISTS steps (
    code TEXT PRIMARY KEY,
    prompt TEXT NOT NULL,
    is_question BOOLEAN NOT NULL DEFAULT 0,
    default_next TEXT,
    options TEXT NOT NULL DEFAULT '[]',
    action TEXT
);

CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    description TEXT NOT NULL,
    due_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',

    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_invoices_client ON invoices(client_id, status, due_date);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference TEXT NOT NULL,
    amount TEXT NOT NULL,
    used BOOLEAN NOT NULL DEFAULT 0,
    invoice_id INTEGER,
    created_at TEXT NOT NULL,

    FOREIGN KEY (invoice_id) REFERENCES invoices(id)
);

CREATE INDEX IF NOT EXISTS idx_payments_reference ON payments(reference, used);

CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    priority TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);
";

/// Channel a session was opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Web,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "web" => Channel::Web,
            _ => Channel::Telegram,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The bot drives the conversation
    ActiveBot,
    /// A human agent owns the conversation; the bot stays silent
    Escalated,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::ActiveBot => "active_bot",
            SessionState::Escalated => "escalated",
            SessionState::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "escalated" => SessionState::Escalated,
            "closed" => SessionState::Closed,
            _ => SessionState::ActiveBot,
        }
    }

    /// Whether the bot may still advance this session
    pub fn accepts_bot_transitions(self) -> bool {
        matches!(self, SessionState::ActiveBot)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
    Agent,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
            Sender::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "bot" => Sender::Bot,
            "agent" => Sender::Agent,
            _ => Sender::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Overdue,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "overdue" => InvoiceStatus::Overdue,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => TicketPriority::Low,
            "medium" => TicketPriority::Medium,
            _ => TicketPriority::High,
        }
    }
}

/// Client record, keyed by a channel-qualified external identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session-scoped accumulator for multi-turn answers.
///
/// Stored as an opaque JSON object; the engine only interprets a handful of
/// keys and round-trips everything else untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempData(Map<String, Value>);

impl TempData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), Value::String(value.into()));
    }

    #[allow(dead_code)] // Used in tests
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(dead_code)] // Used in tests
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Conversation state machine instance for one client on one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub client_id: i64,
    pub channel: Channel,
    pub state: SessionState,
    /// `None` until the entry step has been rendered
    pub current_step: Option<String>,
    pub temp_data: TempData,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable transcript line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub client_id: i64,
    pub amount: Decimal,
    pub description: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
}

/// Bank-reported transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub reference: String,
    pub amount: Decimal,
    pub used: bool,
    pub invoice_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub client_id: i64,
    pub description: String,
    pub priority: TicketPriority,
    pub created_at: DateTime<Utc>,
}

/// Escalated session as listed for the advisor console
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalatedSession {
    pub session_id: i64,
    pub state: SessionState,
    pub channel: Channel,
    pub started_at: DateTime<Utc>,
    pub client_name: String,
    pub external_id: String,
    pub last_message: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}
