//! Channel adapters
//!
//! Telegram pushes updates to a webhook and receives replies actively; the
//! web chat persists replies for the browser to poll. Both feed the same
//! [`FlowEngine`](crate::flow::FlowEngine).

pub mod telegram;
pub mod web;

#[cfg(test)]
pub mod testing;

pub use telegram::{LogOnlySender, MessageSender, TelegramClient, Update};
