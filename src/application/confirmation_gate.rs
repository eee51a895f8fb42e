//! Safety gates that stand between a proposed action and the executor
//! (§4.6). Generalizes the teacher's `ValidationResult::Approve | Reject`
//! pattern from `domain::risk::filters::validator_trait` to an outcome that
//! carries a typed [`SafetyAbort`] reason instead of a bare string.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::application::watcher::{Watcher, WatcherData};
use crate::domain::errors::SafetyAbort;
use crate::domain::state::PendingAction;

pub enum GateOutcome<T> {
    Proceed(T),
    Abort(SafetyAbort),
}

const TP_GUARDRAIL_FLOOR_PCT: Decimal = Decimal::from_parts(995, 0, 0, false, 3); // 0.995

/// Validates a triggered sell confirmation immediately before execution:
/// the intent must still exist and be unexpired, the position must still be
/// ACTIVE, the current price must clear the TP guardrail when the trigger
/// was a take-profit, and the price must not have moved more than the
/// configured deviation since the intent was created.
pub async fn gate_sell(
    watcher: &Arc<Watcher>,
    data: &mut WatcherData,
    ticker: &str,
    is_take_profit_trigger: bool,
) -> GateOutcome<PendingAction> {
    let Some(intent) = data.ledger.take_action(ticker) else {
        return GateOutcome::Abort(SafetyAbort::NotFound);
    };

    let ttl = chrono::Duration::seconds(watcher.config.confirmation_ttl_sec as i64);
    if intent.is_expired(chrono::Utc::now(), ttl) {
        return GateOutcome::Abort(SafetyAbort::Expired);
    }

    let Some(position) = data.portfolio.find_active(ticker) else {
        return GateOutcome::Abort(SafetyAbort::NoActivePosition {
            ticker: ticker.to_string(),
        });
    };

    let current_price = match watcher.broker.price(ticker).await {
        Ok(price) => price,
        Err(_) => return GateOutcome::Abort(SafetyAbort::NotFound),
    };

    if is_take_profit_trigger {
        let floor = position.take_profit * TP_GUARDRAIL_FLOOR_PCT;
        if current_price < floor {
            return GateOutcome::Abort(SafetyAbort::TpGuardrail {
                current: current_price,
                target: position.take_profit,
            });
        }
    }

    let deviation = if intent.trigger_price.is_zero() {
        Decimal::ZERO
    } else {
        ((current_price - intent.trigger_price) / intent.trigger_price).abs()
    };
    let max_deviation = Decimal::try_from(watcher.config.confirmation_max_deviation_pct)
        .unwrap_or(Decimal::new(5, 3));
    if deviation > max_deviation {
        return GateOutcome::Abort(SafetyAbort::PriceDeviation {
            deviation,
            max: max_deviation,
        });
    }

    GateOutcome::Proceed(intent)
}

/// Validates a buy proposal immediately before execution: only a temporal
/// gate, since a buy has no existing position whose guardrails could be
/// violated.
pub async fn gate_buy(
    watcher: &Arc<Watcher>,
    data: &mut WatcherData,
    ticker: &str,
) -> GateOutcome<crate::domain::state::PendingProposal> {
    let Some(proposal) = data.ledger.take_proposal(ticker) else {
        return GateOutcome::Abort(SafetyAbort::NotFound);
    };

    let ttl = chrono::Duration::seconds(watcher.config.confirmation_ttl_sec as i64);
    if proposal.is_expired(chrono::Utc::now(), ttl) {
        return GateOutcome::Abort(SafetyAbort::Expired);
    }

    if data.portfolio.find_active(ticker).is_some() {
        return GateOutcome::Abort(SafetyAbort::DuplicateOpenOrder {
            ticker: ticker.to_string(),
        });
    }

    GateOutcome::Proceed(proposal)
}

/// Validates an autonomous (advisor-originated) buy against the slippage
/// gate: the live spread at execution time must not exceed 0.5%.
pub async fn gate_autonomous_slippage(
    watcher: &Arc<Watcher>,
    ticker: &str,
) -> GateOutcome<()> {
    let quote = match watcher.broker.quote(ticker).await {
        Ok(q) => q,
        Err(_) => return GateOutcome::Abort(SafetyAbort::NotFound),
    };
    if quote.bid.is_zero() {
        return GateOutcome::Abort(SafetyAbort::SlippageExceeded {
            bid: quote.bid,
            ask: quote.ask,
        });
    }
    let spread_pct = (quote.ask - quote.bid) / quote.bid;
    if spread_pct > Decimal::new(5, 3) {
        return GateOutcome::Abort(SafetyAbort::SlippageExceeded {
            bid: quote.bid,
            ask: quote.ask,
        });
    }
    GateOutcome::Proceed(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::PendingAction;
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
            std::env::set_var("CONFIRMATION_TTL_SEC", "300");
            std::env::set_var(
                "STATE_FILE_PATH",
                format!(
                    "{}/riskwatch_gate_test_{}.json",
                    std::env::temp_dir().display(),
                    uuid::Uuid::new_v4()
                ),
            );
        }
        let config = crate::config::Config::from_env().unwrap();
        let broker = Arc::new(MockBroker::new(dec!(10000)));
        let chat = Arc::new(MockChat::new());
        let watcher = Watcher::new(config, broker.clone(), chat, None).await.unwrap();
        (watcher, broker)
    }

    fn active_position(ticker: &str, take_profit: rust_decimal::Decimal) -> crate::domain::state::Position {
        crate::domain::state::Position {
            ticker: ticker.to_string(),
            quantity: dec!(10),
            entry_price: dec!(150),
            stop_loss: dec!(140),
            take_profit,
            trailing_stop_pct: dec!(3),
            high_water_mark: dec!(150),
            status: crate::domain::state::PositionStatus::Active,
            thesis_id: "MANUAL_1".to_string(),
            opened_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn gate_sell_aborts_when_no_intent_exists() {
        let (watcher, _broker) = test_watcher().await;
        let mut data = watcher.data.write().await;
        let outcome = gate_sell(&watcher, &mut data, "AAPL", false).await;
        assert!(matches!(outcome, GateOutcome::Abort(SafetyAbort::NotFound)));
    }

    #[tokio::test]
    async fn gate_sell_aborts_on_tp_guardrail_violation() {
        let (watcher, broker) = test_watcher().await;
        broker.set_price("AAPL", dec!(198.00));
        let mut data = watcher.data.write().await;
        data.portfolio.positions.push(active_position("AAPL", dec!(200)));
        data.ledger.insert_action(PendingAction {
            ticker: "AAPL".to_string(),
            action: "SELL".to_string(),
            trigger_price: dec!(200),
            timestamp: chrono::Utc::now(),
        });

        let outcome = gate_sell(&watcher, &mut data, "AAPL", true).await;
        assert!(matches!(
            outcome,
            GateOutcome::Abort(SafetyAbort::TpGuardrail { .. })
        ));
    }

    #[tokio::test]
    async fn gate_sell_proceeds_when_all_checks_pass() {
        let (watcher, broker) = test_watcher().await;
        broker.set_price("AAPL", dec!(139.50));
        let mut data = watcher.data.write().await;
        data.portfolio.positions.push(active_position("AAPL", dec!(200)));
        data.ledger.insert_action(PendingAction {
            ticker: "AAPL".to_string(),
            action: "SELL".to_string(),
            trigger_price: dec!(139.50),
            timestamp: chrono::Utc::now(),
        });

        let outcome = gate_sell(&watcher, &mut data, "AAPL", false).await;
        assert!(matches!(outcome, GateOutcome::Proceed(_)));
    }

    #[tokio::test]
    async fn gate_sell_aborts_on_price_deviation() {
        let (watcher, broker) = test_watcher().await;
        broker.set_price("AAPL", dec!(160.00));
        let mut data = watcher.data.write().await;
        data.portfolio.positions.push(active_position("AAPL", dec!(200)));
        data.ledger.insert_action(PendingAction {
            ticker: "AAPL".to_string(),
            action: "SELL".to_string(),
            trigger_price: dec!(139.50),
            timestamp: chrono::Utc::now(),
        });

        let outcome = gate_sell(&watcher, &mut data, "AAPL", false).await;
        assert!(matches!(
            outcome,
            GateOutcome::Abort(SafetyAbort::PriceDeviation { .. })
        ));
    }
}
