//! Periodic tick logic (§4.4): reconcile, scan every ACTIVE position for a
//! stop-loss/take-profit/trailing-stop trigger, and raise a confirmation
//! intent for the first trigger that fires. Grounded on the teacher's
//! `application::trailing_stops::StopState` state machine and
//! `application::risk_manager::RiskManager::run` poll loop, generalized from
//! a single stop kind to the SL/TP/TS precedence this spec requires.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::application::reconciler;
use crate::application::watcher::Watcher;
use crate::domain::ports::{Button, OrderListFilter};
use crate::domain::state::PendingAction;

const DEBOUNCE: chrono::Duration = chrono::Duration::minutes(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl Trigger {
    fn kind_tag(&self) -> &'static str {
        match self {
            Trigger::StopLoss => "SL",
            Trigger::TakeProfit => "TP",
            Trigger::TrailingStop => "TS",
        }
    }
}

/// Take-profit outranks stop-loss, which outranks the trailing stop — a
/// position that has run up through its TP and then snapped back through
/// its SL on the same tick is reported as a take-profit, not a stop-loss.
fn detect_trigger(
    price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    trailing_stop_pct: Decimal,
    high_water_mark: Decimal,
) -> Option<Trigger> {
    if take_profit > Decimal::ZERO && price >= take_profit {
        return Some(Trigger::TakeProfit);
    }
    if stop_loss > Decimal::ZERO && price <= stop_loss {
        return Some(Trigger::StopLoss);
    }
    if trailing_stop_pct > Decimal::ZERO {
        let trail_floor = high_water_mark * (Decimal::ONE - trailing_stop_pct / Decimal::from(100));
        if price <= trail_floor {
            return Some(Trigger::TrailingStop);
        }
    }
    None
}

/// Runs one full tick: reconcile against the broker, scan positions for
/// triggers, and raise (at most one) new confirmation intent per ticker
/// that has no intent already pending and has not alerted within the
/// debounce window.
pub async fn tick(watcher: &Arc<Watcher>) -> anyhow::Result<()> {
    let account = watcher.broker.account().await?;
    let broker_positions = watcher.broker.list_positions().await?;
    let is_market_open = watcher.broker.clock().await.map(|c| c.is_open).unwrap_or(false);

    let mut data = watcher.data.write().await;

    let report = reconciler::reconcile(
        watcher,
        &mut data,
        broker_positions,
        account.buying_power,
        account.equity,
    )
    .await;

    for ticker in &report.discovered {
        watcher
            .chat
            .send_message(&format!("Discovered untracked broker position: {ticker}"))
            .await
            .ok();
    }
    for ticker in &report.dropped {
        watcher
            .chat
            .send_message(&format!("Local position {ticker} has no broker counterpart, dropped"))
            .await
            .ok();
    }
    if !report.watchlist_moves.is_empty() {
        let lines: Vec<String> = report
            .watchlist_moves
            .iter()
            .map(|(ticker, from, to)| format!("{ticker}: {from:.2} -> {to:.2}"))
            .collect();
        watcher
            .chat
            .send_message(&format!("Watchlist moves:\n{}", lines.join("\n")))
            .await
            .ok();
    }

    let now = chrono::Utc::now();

    // Step 1: heartbeat/dashboard decision. Auto-status while the market is
    // open pushes one every tick; otherwise a dashboard goes out at most
    // once every 24h so the operator knows the process is still alive.
    let should_heartbeat = if watcher.config.auto_status_enabled && is_market_open {
        true
    } else {
        data.portfolio
            .last_heartbeat
            .map(|last| now - last >= chrono::Duration::hours(24))
            .unwrap_or(true)
    };
    if should_heartbeat {
        let active = data.portfolio.active_positions().count();
        watcher
            .chat
            .send_message(&format!(
                "Dashboard: {} active position(s), exposure {:.2}, available budget {:.2}, market {}",
                active,
                data.portfolio.current_exposure,
                data.portfolio.available_budget,
                if is_market_open { "OPEN" } else { "CLOSED" }
            ))
            .await
            .ok();
        data.portfolio.last_heartbeat = Some(now);
    }

    // Step 2: queued-order notice, only when there is nothing locally
    // tracked that would otherwise explain the broker's open orders.
    let open_orders = watcher
        .broker
        .list_orders(OrderListFilter::Open)
        .await
        .unwrap_or_default();
    if data.portfolio.active_positions().next().is_none() && !open_orders.is_empty() {
        watcher
            .chat
            .send_message(&format!(
                "{} open order(s) at the broker with no locally tracked position",
                open_orders.len()
            ))
            .await
            .ok();
    }
    let ttl = chrono::Duration::seconds(watcher.config.confirmation_ttl_sec as i64);
    let purged = data.ledger.purge_expired(now, ttl);
    for ticker in &purged {
        watcher
            .chat
            .send_message(&format!("Pending intent for {ticker} expired and was dropped"))
            .await
            .ok();
    }

    let tickers: Vec<String> = data
        .portfolio
        .active_positions()
        .map(|p| p.ticker.clone())
        .collect();

    for ticker in tickers {
        if data.ledger.peek_action(&ticker).is_some() {
            continue;
        }
        let Some(position) = data.portfolio.find_active(&ticker).cloned() else {
            continue;
        };
        let Ok(price) = watcher.broker.price(&ticker).await else {
            continue;
        };

        if price > position.high_water_mark {
            if let Some(local) = data.portfolio.find_active_mut(&ticker) {
                local.high_water_mark = price;
            }
        }

        let Some(trigger) = detect_trigger(
            price,
            position.stop_loss,
            position.take_profit,
            position.trailing_stop_pct,
            position.high_water_mark,
        ) else {
            continue;
        };

        let already_alerted = data
            .last_alerts
            .get(&ticker)
            .map(|at| now - *at < DEBOUNCE)
            .unwrap_or(false);
        if already_alerted {
            continue;
        }

        data.ledger.insert_action(PendingAction {
            ticker: ticker.clone(),
            action: "SELL".to_string(),
            trigger_price: price,
            timestamp: now,
        });
        data.last_alerts.insert(ticker.clone(), now);

        let kind = trigger.kind_tag();
        let text = format!(
            "{} triggered for {ticker} at {price:.2} (entry {:.2})",
            match trigger {
                Trigger::StopLoss => "STOP LOSS",
                Trigger::TakeProfit => "TAKE PROFIT",
                Trigger::TrailingStop => "TRAILING STOP",
            },
            position.entry_price
        );
        watcher
            .chat
            .send_interactive(
                &text,
                vec![
                    Button {
                        label: "Confirm sell".to_string(),
                        payload: format!("CONFIRM_{kind}_{ticker}"),
                    },
                    Button {
                        label: "Cancel".to_string(),
                        payload: format!("CANCEL_{kind}_{ticker}"),
                    },
                ],
            )
            .await
            .ok();
    }

    watcher.save_locked(&data).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn take_profit_outranks_stop_loss_on_same_tick() {
        let trigger = detect_trigger(dec!(210), dec!(140), dec!(200), dec!(3), dec!(210));
        assert_eq!(trigger, Some(Trigger::TakeProfit));
    }

    #[test]
    fn stop_loss_fires_when_price_at_or_below_floor() {
        let trigger = detect_trigger(dec!(140), dec!(140), dec!(0), dec!(0), dec!(150));
        assert_eq!(trigger, Some(Trigger::StopLoss));
    }

    #[test]
    fn trailing_stop_fires_relative_to_high_water_mark() {
        // hwm=200, trail=3% -> floor=194
        let trigger = detect_trigger(dec!(193), dec!(0), dec!(0), dec!(3), dec!(200));
        assert_eq!(trigger, Some(Trigger::TrailingStop));
    }

    #[test]
    fn no_trigger_when_price_inside_all_bands() {
        let trigger = detect_trigger(dec!(160), dec!(140), dec!(200), dec!(3), dec!(165));
        assert_eq!(trigger, None);
    }
}
