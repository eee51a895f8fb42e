//! Broker-truth reconciliation (§4.3). Grounded on the teacher's
//! `application::risk_manager` account/position refresh and on
//! `orc2626-tech-sBot9999`'s `reconcile_once` idiom of comparing exchange
//! state against internal bookkeeping and logging drift rather than
//! silently trusting either side.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::application::watcher::{Watcher, WatcherData};
use crate::config::Config;
use crate::domain::ports::BrokerPosition;
use crate::domain::state::{Position, PositionStatus};

const WATCHLIST_NOTIFY_DELTA_PCT: f64 = 0.005;

/// §4.8 default bracket, applied wherever a position surfaces with zeroed
/// SL/TP/TS fields instead of going through `/buy`.
fn default_stop_loss(config: &Config, entry_price: Decimal) -> Decimal {
    entry_price
        * (Decimal::ONE - Decimal::try_from(config.default_stop_loss_pct / 100.0).unwrap_or_default())
}

fn default_take_profit(config: &Config, entry_price: Decimal) -> Decimal {
    entry_price
        * (Decimal::ONE + Decimal::try_from(config.default_take_profit_pct / 100.0).unwrap_or_default())
}

fn default_trailing_stop_pct(config: &Config) -> Decimal {
    Decimal::try_from(config.default_trailing_stop_pct).unwrap_or_default()
}

pub struct ReconcileReport {
    pub discovered: Vec<String>,
    pub dropped: Vec<String>,
    pub watchlist_moves: Vec<(String, f64, f64)>,
}

/// Fetches account and position truth from the broker, then folds it into
/// `data.portfolio` under the write lock. Broker calls happen before the
/// lock is taken by the caller's convention (the risk poller awaits this
/// with the lock already held only for the in-memory fold, never for the
/// network round trip — see `risk_poller::tick`).
pub async fn reconcile(
    watcher: &Arc<Watcher>,
    data: &mut WatcherData,
    broker_positions: Vec<BrokerPosition>,
    buying_power: Decimal,
    equity: Decimal,
) -> ReconcileReport {
    let mut discovered = Vec::new();
    let mut dropped = Vec::new();

    for broker_position in &broker_positions {
        match data.portfolio.find_active_mut(&broker_position.symbol) {
            Some(local) => {
                local.entry_price = broker_position.avg_entry;
                local.quantity = broker_position.qty;
                local.high_water_mark = local
                    .high_water_mark
                    .max(broker_position.avg_entry.max(broker_position.current_price));
                if local.stop_loss.is_zero() {
                    local.stop_loss = default_stop_loss(&watcher.config, local.entry_price);
                }
                if local.take_profit.is_zero() {
                    local.take_profit = default_take_profit(&watcher.config, local.entry_price);
                }
                if local.trailing_stop_pct.is_zero() {
                    local.trailing_stop_pct = default_trailing_stop_pct(&watcher.config);
                }
            }
            None => {
                info!(
                    "discovered broker position with no local record: {}",
                    broker_position.symbol
                );
                let now = chrono::Utc::now();
                let entry_price = broker_position.avg_entry;
                data.portfolio.positions.push(Position {
                    ticker: broker_position.symbol.clone(),
                    quantity: broker_position.qty,
                    entry_price,
                    stop_loss: default_stop_loss(&watcher.config, entry_price),
                    take_profit: default_take_profit(&watcher.config, entry_price),
                    trailing_stop_pct: default_trailing_stop_pct(&watcher.config),
                    high_water_mark: entry_price.max(broker_position.current_price),
                    status: PositionStatus::Active,
                    thesis_id: Position::thesis_id_for("IMPORTED", now),
                    opened_at: now,
                });
                discovered.push(broker_position.symbol.clone());
            }
        }
    }

    let broker_symbols: std::collections::HashSet<&str> = broker_positions
        .iter()
        .map(|p| p.symbol.as_str())
        .collect();
    for position in data.portfolio.positions.iter_mut() {
        if position.is_active() && !broker_symbols.contains(position.ticker.as_str()) {
            warn!(
                "local ACTIVE position {} has no broker counterpart, dropping",
                position.ticker
            );
            position.status = PositionStatus::Closed;
            dropped.push(position.ticker.clone());
        }
    }
    data.portfolio
        .positions
        .retain(|p| p.status.is_active() || !dropped.contains(&p.ticker));

    data.portfolio.recompute_exposure();
    data.portfolio
        .recompute_available_budget(buying_power, equity);

    let mut watchlist_moves = Vec::new();
    for ticker in &watcher.config.watchlist_tickers {
        if let Ok(price) = watcher.broker.price(ticker).await {
            let price_f64 = price.to_string().parse::<f64>().unwrap_or_default();
            let previous = data.portfolio.watchlist_prices.get(ticker).copied();
            data.portfolio
                .watchlist_prices
                .insert(ticker.clone(), price_f64);
            if let Some(prev) = previous {
                if prev > 0.0 {
                    let delta = (price_f64 - prev).abs() / prev;
                    if delta >= WATCHLIST_NOTIFY_DELTA_PCT {
                        watchlist_moves.push((ticker.clone(), prev, price_f64));
                    }
                }
            }
        }
    }

    data.portfolio.last_sync = Some(chrono::Utc::now());

    ReconcileReport {
        discovered,
        dropped,
        watchlist_moves,
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

    async fn test_watcher() -> Arc<Watcher> {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("ALPACA_API_KEY", "key");
            std::env::set_var("ALPACA_SECRET_KEY", "secret");
            std::env::set_var("CHAT_BOT_TOKEN", "token");
            std::env::set_var("CHAT_ID", "1");
            std::env::set_var("AUTHORIZED_PRINCIPAL", "1");
            std::env::set_var("WATCHLIST_TICKERS", "");
            std::env::set_var(
                "STATE_FILE_PATH",
                format!(
                    "{}/riskwatch_reconciler_test_{}.json",
                    std::env::temp_dir().display(),
                    uuid::Uuid::new_v4()
                ),
            );
        }
        let config = crate::config::Config::from_env().unwrap();
        let broker = Arc::new(MockBroker::new(dec!(10000)));
        let chat = Arc::new(MockChat::new());
        Watcher::new(config, broker, chat, None).await.unwrap()
    }

    fn broker_position(symbol: &str, qty: Decimal, avg_entry: Decimal) -> BrokerPosition {
        BrokerPosition {
            symbol: symbol.to_string(),
            qty,
            avg_entry,
            current_price: avg_entry,
            unrealized_pl: Decimal::ZERO,
            cost_basis: qty * avg_entry,
            change_today: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn discovers_broker_positions_with_no_local_record() {
        let watcher = test_watcher().await;
        let mut data = watcher.data.write().await;

        let report = reconcile(
            &watcher,
            &mut data,
            vec![broker_position("AAPL", dec!(10), dec!(150))],
            dec!(5000),
            dec!(10000),
        )
        .await;

        assert_eq!(report.discovered, vec!["AAPL".to_string()]);
        assert!(data.portfolio.find_active("AAPL").is_some());
    }

    #[tokio::test]
    async fn drops_local_active_position_absent_from_broker() {
        let watcher = test_watcher().await;
        let mut data = watcher.data.write().await;
        let now = chrono::Utc::now();
        data.portfolio.positions.push(Position {
            ticker: "TSLA".to_string(),
            quantity: dec!(5),
            entry_price: dec!(200),
            stop_loss: dec!(180),
            take_profit: dec!(250),
            trailing_stop_pct: dec!(3),
            high_water_mark: dec!(200),
            status: PositionStatus::Active,
            thesis_id: "MANUAL_1".to_string(),
            opened_at: now,
        });

        let report = reconcile(&watcher, &mut data, vec![], dec!(5000), dec!(10000)).await;

        assert_eq!(report.dropped, vec!["TSLA".to_string()]);
        assert!(data.portfolio.find_active("TSLA").is_none());
    }

    #[tokio::test]
    async fn recomputes_exposure_and_budget_after_fold() {
        let watcher = test_watcher().await;
        let mut data = watcher.data.write().await;

        reconcile(
            &watcher,
            &mut data,
            vec![broker_position("AAPL", dec!(10), dec!(150))],
            dec!(5000),
            dec!(10000),
        )
        .await;

        assert_eq!(data.portfolio.current_exposure, dec!(1500));
    }
}
