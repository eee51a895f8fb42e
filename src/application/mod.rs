pub mod command_router;
pub mod confirmation_gate;
pub mod eod_reporter;
pub mod executor;
pub mod intent_ledger;
pub mod reconciler;
pub mod risk_poller;
pub mod state_store;
pub mod watcher;
