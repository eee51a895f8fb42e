//! Order placement and lifecycle verification (§4.7), grounded on the
//! teacher's `application::executor` receive-execute-verify loop. Every
//! execution here runs with the watcher write lock already held by the
//! caller — a clearance/verification poll never blocks waiting on a lock
//! another task also wants.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::application::watcher::{Watcher, WatcherData};
use crate::domain::errors::ExecutionFailure;
use crate::domain::ports::{OrderListFilter, OrderSide, OrderStatus};
use crate::domain::state::{Position, PositionStatus};

const CLEARANCE_ATTEMPTS: u32 = 5;
const CLEARANCE_INTERVAL: Duration = Duration::from_millis(500);
const VERIFY_ATTEMPTS: u32 = 5;
const VERIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Cancels any open order for `ticker` and waits for the broker's open-order
/// list to confirm clearance before a new order is submitted, so a stale
/// working order never collides with the one about to be placed.
async fn clear_open_orders(watcher: &Watcher, ticker: &str) -> Result<(), ExecutionFailure> {
    let open = watcher
        .broker
        .list_orders(OrderListFilter::Open)
        .await
        .unwrap_or_default();
    for order in open.iter().filter(|o| o.symbol == ticker) {
        if let Err(err) = watcher.broker.cancel_order(&order.id).await {
            warn!("failed to cancel stale order {}: {err}", order.id);
        }
    }

    for _ in 0..CLEARANCE_ATTEMPTS {
        let still_open = watcher
            .broker
            .list_orders(OrderListFilter::Open)
            .await
            .unwrap_or_default();
        if !still_open.iter().any(|o| o.symbol == ticker) {
            return Ok(());
        }
        tokio::time::sleep(CLEARANCE_INTERVAL).await;
    }

    Err(ExecutionFailure::ClearanceTimeout {
        ticker: ticker.to_string(),
    })
}

/// Polls a freshly placed order until it reaches a terminal state. A
/// terminal non-fill (canceled/rejected/expired) is reported back to the
/// caller as an error so it can force a reconciliation; a fill returns the
/// verified fill price. Still working after the verification window is
/// neither — `Ok(None)` reports the last known state with no error, per
/// §4.7: the order may still fill later, and nothing has gone wrong yet.
async fn verify_fill(
    watcher: &Watcher,
    ticker: &str,
    order_id: &str,
) -> Result<Option<Decimal>, ExecutionFailure> {
    for _ in 0..VERIFY_ATTEMPTS {
        let order = watcher
            .broker
            .get_order(order_id)
            .await
            .map_err(|e| ExecutionFailure::PlacementFailed {
                ticker: ticker.to_string(),
                reason: e.to_string(),
            })?;

        if order.status == OrderStatus::Filled {
            if let Some(price) = order.filled_avg_price {
                return Ok(Some(price));
            }
        }
        if order.status.is_terminal_non_fill() {
            return Err(ExecutionFailure::TerminalStatus {
                order_id: order_id.to_string(),
                ticker: ticker.to_string(),
                status: format!("{:?}", order.status),
            });
        }
        tokio::time::sleep(VERIFY_INTERVAL).await;
    }

    warn!("order {order_id} for {ticker} still open after the verification window, leaving unconfirmed");
    Ok(None)
}

/// Executes an approved buy: clearance, placement, verification, then
/// appends a new ACTIVE position stamped with the verified fill price.
/// Returns `Ok(None)` if the order is still working after the verification
/// window — no position is appended yet; the next reconciliation picks it
/// up once the broker reports the fill.
pub async fn execute_buy(
    watcher: &Arc<Watcher>,
    data: &mut WatcherData,
    ticker: &str,
    qty: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    trailing_stop_pct: Decimal,
    thesis_origin: &str,
) -> Result<Option<Position>, ExecutionFailure> {
    clear_open_orders(watcher, ticker).await?;

    let order = watcher
        .broker
        .place_order(ticker, qty, OrderSide::Buy, stop_loss, take_profit)
        .await
        .map_err(|e| ExecutionFailure::PlacementFailed {
            ticker: ticker.to_string(),
            reason: e.to_string(),
        })?;

    let fill_price = match verify_fill(watcher, ticker, &order.id).await {
        Ok(Some(price)) => price,
        Ok(None) => return Ok(None),
        Err(err) => {
            error!("{err}");
            return Err(err);
        }
    };

    let now = chrono::Utc::now();
    let position = Position {
        ticker: ticker.to_string(),
        quantity: qty,
        entry_price: fill_price,
        stop_loss,
        take_profit,
        trailing_stop_pct,
        high_water_mark: fill_price,
        status: PositionStatus::Active,
        thesis_id: Position::thesis_id_for(thesis_origin, now),
        opened_at: now,
    };

    data.portfolio.positions.push(position.clone());
    data.portfolio.recompute_exposure();
    info!("executed BUY {ticker} qty={qty} fill={fill_price}");
    Ok(Some(position))
}

/// Executes an approved sell: clearance, placement, verification, then
/// purges the position from the active book. The caller is responsible for
/// archiving the closed position to the performance log before this runs,
/// since the position data disappears from `positions` once this returns.
/// Returns `Ok(None)` if the order is still working after the verification
/// window — the position stays ACTIVE, untouched, for the next attempt.
pub async fn execute_sell(
    watcher: &Arc<Watcher>,
    data: &mut WatcherData,
    ticker: &str,
) -> Result<Option<Decimal>, ExecutionFailure> {
    let quantity = data
        .portfolio
        .find_active(ticker)
        .map(|p| p.quantity)
        .ok_or_else(|| ExecutionFailure::PlacementFailed {
            ticker: ticker.to_string(),
            reason: "no active position to sell".to_string(),
        })?;

    clear_open_orders(watcher, ticker).await?;

    let order = watcher
        .broker
        .place_order(ticker, quantity, OrderSide::Sell, Decimal::ZERO, Decimal::ZERO)
        .await
        .map_err(|e| ExecutionFailure::PlacementFailed {
            ticker: ticker.to_string(),
            reason: e.to_string(),
        })?;

    let fill_price = match verify_fill(watcher, ticker, &order.id).await? {
        Some(price) => price,
        None => return Ok(None),
    };

    data.portfolio.positions.retain(|p| p.ticker != ticker || !p.is_active());
    data.portfolio.recompute_exposure();
    info!("executed SELL {ticker} qty={quantity} fill={fill_price}");
    Ok(Some(fill_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_broker::MockBroker;
    use crate::infrastructure::mock_chat::MockChat;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    async fn test_watcher() -> (Arc<Watcher>, Arc<MockBroker>) {
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
                    "{}/riskwatch_executor_test_{}.json",
                    std::env::temp_dir().display(),
                    uuid::Uuid::new_v4()
                ),
            );
        }
        let config = crate::config::Config::from_env().unwrap();
        let broker = Arc::new(MockBroker::new(dec!(10000)));
        broker.set_price("AAPL", dec!(150));
        let chat = Arc::new(MockChat::new());
        let watcher = Watcher::new(config, broker.clone(), chat, None).await.unwrap();
        (watcher, broker)
    }

    #[tokio::test]
    async fn execute_buy_appends_active_position_at_fill_price() {
        let (watcher, _broker) = test_watcher().await;
        let mut data = watcher.data.write().await;

        let position = execute_buy(
            &watcher,
            &mut data,
            "AAPL",
            dec!(10),
            dec!(140),
            dec!(170),
            dec!(3),
            "MANUAL",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(position.entry_price, dec!(150));
        assert_eq!(data.portfolio.current_exposure, dec!(1500));
    }

    #[tokio::test]
    async fn execute_sell_purges_position_from_active_book() {
        let (watcher, _broker) = test_watcher().await;
        let mut data = watcher.data.write().await;

        execute_buy(
            &watcher,
            &mut data,
            "AAPL",
            dec!(10),
            dec!(140),
            dec!(170),
            dec!(3),
            "MANUAL",
        )
        .await
        .unwrap();

        execute_sell(&watcher, &mut data, "AAPL").await.unwrap();

        assert!(data.portfolio.find_active("AAPL").is_none());
        assert_eq!(data.portfolio.current_exposure, dec!(0));
    }

    #[tokio::test]
    async fn still_open_after_verification_window_returns_ok_none() {
        let (watcher, broker) = test_watcher().await;
        broker.hold_next_order();
        let mut data = watcher.data.write().await;

        let result = execute_buy(
            &watcher,
            &mut data,
            "AAPL",
            dec!(10),
            dec!(140),
            dec!(170),
            dec!(3),
            "MANUAL",
        )
        .await;

        assert!(matches!(result, Ok(None)));
        assert!(data.portfolio.find_active("AAPL").is_none());
    }

    #[tokio::test]
    async fn placement_failure_surfaces_execution_failure() {
        let (watcher, broker) = test_watcher().await;
        broker.fail_next_order("simulated rejection");
        let mut data = watcher.data.write().await;

        let result = execute_buy(
            &watcher,
            &mut data,
            "AAPL",
            dec!(10),
            dec!(140),
            dec!(170),
            dec!(3),
            "MANUAL",
        )
        .await;

        assert!(matches!(result, Err(ExecutionFailure::PlacementFailed { .. })));
        assert!(data.portfolio.find_active("AAPL").is_none());
    }
}
