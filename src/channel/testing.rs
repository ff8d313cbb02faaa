//! Test doubles for outbound delivery

use super::telegram::DeliveryError;
use super::MessageSender;
use async_trait::async_trait;
use std::sync::Mutex;

/// Records every message instead of sending it
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Fails every delivery with an API error
pub struct FailingSender;

#[async_trait]
impl MessageSender for FailingSender {
    async fn send(&self, _chat_id: &str, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Api {
            status: 502,
            body: "Bad Gateway".to_string(),
        })
    }
}
