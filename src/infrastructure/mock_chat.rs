//! In-memory [`ChatPort`] double. Records every message/button set sent so
//! tests can assert on operator-facing text without a live chat transport.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::errors::TransportFailure;
use crate::domain::ports::{Button, ChatPort};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub text: String,
    pub buttons: Vec<Button>,
}

#[derive(Default)]
pub struct MockChat {
    sent: Mutex<Vec<SentMessage>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_message(&self) -> Option<SentMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatPort for MockChat {
    async fn send_message(&self, text: &str) -> Result<(), TransportFailure> {
        self.sent.lock().unwrap().push(SentMessage {
            text: text.to_string(),
            buttons: Vec::new(),
        });
        Ok(())
    }

    async fn send_interactive(
        &self,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<(), TransportFailure> {
        self.sent.lock().unwrap().push(SentMessage {
            text: text.to_string(),
            buttons,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_plain_and_interactive_messages() {
        let chat = MockChat::new();
        chat.send_message("hello").await.unwrap();
        chat.send_interactive(
            "confirm?",
            vec![Button {
                label: "Yes".to_string(),
                payload: "CONFIRM_SL_AAPL".to_string(),
            }],
        )
        .await
        .unwrap();

        let sent = chat.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].buttons.len(), 1);
    }
}
