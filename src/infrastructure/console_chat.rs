//! Minimal stdout-based [`ChatPort`]. The operator chat transport itself
//! (long-poll loop, credential handling, message framing) is out of scope;
//! this adapter exists so the binary has somewhere to print operator-facing
//! text without depending on a concrete bot API client.

use async_trait::async_trait;

use crate::domain::errors::TransportFailure;
use crate::domain::ports::{Button, ChatPort};

pub struct ConsoleChat;

#[async_trait]
impl ChatPort for ConsoleChat {
    async fn send_message(&self, text: &str) -> Result<(), TransportFailure> {
        println!("{text}");
        Ok(())
    }

    async fn send_interactive(&self, text: &str, buttons: Vec<Button>) -> Result<(), TransportFailure> {
        println!("{text}");
        for button in buttons {
            println!("  [{}] -> {}", button.label, button.payload);
        }
        Ok(())
    }
}
