pub mod alpaca_broker;
pub mod console_chat;
pub mod mock_advisor;
pub mod mock_broker;
pub mod mock_chat;
pub mod performance_log;
