//! The shared mutable aggregate every component reads and writes through one
//! lock, grounded on the teacher's `system.rs` wiring of a single
//! `Arc<RwLock<...>>` shared between the risk manager, executor, and UI
//! layers rather than one lock per concern.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::application::intent_ledger::IntentLedger;
use crate::application::state_store::StateStore;
use crate::config::Config;
use crate::domain::ports::{AdvisorPort, BrokerPort, ChatPort};
use crate::domain::state::PortfolioState;

/// Everything that changes while the process runs, behind one lock so a
/// reconcile, a risk-poll tick, and an operator command never interleave
/// partial updates to each other.
pub struct WatcherData {
    pub portfolio: PortfolioState,
    pub ledger: IntentLedger,
    /// ticker -> last alert price, de-bounces repeat SL/TP/TS notifications.
    pub last_alerts: HashMap<String, DateTime<Utc>>,
    pub last_analyze_time: Option<DateTime<Utc>>,
    pub was_market_open: bool,
}

/// The long-lived handle every task clones. Holds the config and the three
/// ports alongside the lock so a component only needs one argument.
pub struct Watcher {
    pub data: RwLock<WatcherData>,
    pub state_store: StateStore,
    pub broker: Arc<dyn BrokerPort>,
    pub chat: Arc<dyn ChatPort>,
    pub advisor: Option<Arc<dyn AdvisorPort>>,
    pub config: Config,
}

impl Watcher {
    pub async fn new(
        config: Config,
        broker: Arc<dyn BrokerPort>,
        chat: Arc<dyn ChatPort>,
        advisor: Option<Arc<dyn AdvisorPort>>,
    ) -> anyhow::Result<Arc<Self>> {
        let state_store = StateStore::new(config.state_file_path.clone());
        let portfolio = state_store.load(config.fiscal_budget_limit).await?;

        Ok(Arc::new(Self {
            data: RwLock::new(WatcherData {
                portfolio,
                ledger: IntentLedger::new(),
                last_alerts: HashMap::new(),
                last_analyze_time: None,
                was_market_open: true,
            }),
            state_store,
            broker,
            chat,
            advisor,
            config,
        }))
    }

    /// Persists `data.portfolio` while the caller still holds the write
    /// guard, so the save is part of the same critical section as the
    /// mutation that preceded it.
    pub async fn save_locked(&self, data: &WatcherData) -> anyhow::Result<()> {
        self.state_store.save(&data.portfolio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_broker::MockBroker;
    use crate::infrastructure::mock_chat::MockChat;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn test_config() -> Config {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("ALPACA_API_KEY", "key");
            std::env::set_var("ALPACA_SECRET_KEY", "secret");
            std::env::set_var("CHAT_BOT_TOKEN", "token");
            std::env::set_var("CHAT_ID", "1");
            std::env::set_var("AUTHORIZED_PRINCIPAL", "1");
            std::env::set_var(
                "STATE_FILE_PATH",
                format!(
                    "{}/riskwatch_watcher_test_{}.json",
                    std::env::temp_dir().display(),
                    uuid::Uuid::new_v4()
                ),
            );
        }
        Config::from_env().unwrap()
    }

    #[tokio::test]
    async fn new_seeds_fresh_portfolio_when_no_state_file_exists() {
        let config = test_config();
        let broker = Arc::new(MockBroker::new(dec!(10000)));
        let chat = Arc::new(MockChat::new());
        let watcher = Watcher::new(config, broker, chat, None).await.unwrap();

        let data = watcher.data.read().await;
        assert!(data.portfolio.positions.is_empty());
        assert!(data.was_market_open);
    }
}
