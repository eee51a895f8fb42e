//! Dispatches a parsed [`Command`] to the ledger, executor, and reporting
//! calls that carry it out, and renders the operator-facing response text.
//! Grounded on the teacher's `interfaces` layer convention of a thin
//! dispatch function per inbound message that never touches state directly,
//! deferring to the application-layer components for everything stateful.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::application::confirmation_gate::{self, GateOutcome};
use crate::application::executor;
use crate::application::reconciler;
use crate::application::watcher::Watcher;
use crate::domain::callback::{self, Callback, TriggerKind};
use crate::domain::command::{self, Command};
use crate::domain::ports::{AdvisorSnapshot, Button, Recommendation};
use crate::domain::state::{PendingAction, PendingProposal};

const PORTFOLIO_CHUNK_LIMIT: usize = 3900;

/// Splits an advisor `action_command` string on `;` so a single
/// recommendation can queue several operator commands, executed in order.
pub fn split_batch(line: &str) -> Vec<String> {
    line.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn kind_tag(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Sl => "SL",
        TriggerKind::Tp => "TP",
        TriggerKind::Ts => "TS",
    }
}

/// Handles one line of operator text, returning the response to send back.
pub async fn handle_command(watcher: &Arc<Watcher>, line: &str) -> String {
    let command = match command::parse(line) {
        Ok(cmd) => cmd,
        Err(err) => return format!("⚠️ {err}"),
    };
    dispatch(watcher, command).await
}

/// Handles one inbound button-callback payload.
pub async fn handle_callback(watcher: &Arc<Watcher>, payload: &str) -> String {
    let callback = match callback::parse(payload) {
        Ok(cb) => cb,
        Err(err) => return format!("⚠️ {err}"),
    };

    match callback {
        Callback::ConfirmSell { ticker, kind } => {
            let mut data = watcher.data.write().await;
            let is_tp = kind == TriggerKind::Tp;
            match confirmation_gate::gate_sell(watcher, &mut data, &ticker, is_tp).await {
                GateOutcome::Proceed(_intent) => {
                    match executor::execute_sell(watcher, &mut data, &ticker).await {
                        Ok(Some(fill_price)) => {
                            let _ = watcher.save_locked(&data).await;
                            format!("Sold {ticker} at {fill_price:.2}")
                        }
                        Ok(None) => {
                            let _ = watcher.save_locked(&data).await;
                            format!("Sell order for {ticker} placed, still pending fill")
                        }
                        Err(err) => {
                            let _ = watcher.save_locked(&data).await;
                            drop(data);
                            resync_after_terminal_failure(watcher, &err).await;
                            format!("⚠️ {err}")
                        }
                    }
                }
                GateOutcome::Abort(reason) => format!("Sell aborted: {reason}"),
            }
        }
        Callback::CancelSell { ticker, .. } => {
            let mut data = watcher.data.write().await;
            data.ledger.take_action(&ticker);
            format!("Cancelled pending sell for {ticker}")
        }
        Callback::ExecuteBuy { ticker } => {
            let mut data = watcher.data.write().await;
            match confirmation_gate::gate_buy(watcher, &mut data, &ticker).await {
                GateOutcome::Proceed(proposal) => {
                    match executor::execute_buy(
                        watcher,
                        &mut data,
                        &ticker,
                        proposal.qty,
                        proposal.stop_loss,
                        proposal.take_profit,
                        proposal.trailing_stop_pct,
                        "MANUAL",
                    )
                    .await
                    {
                        Ok(Some(position)) => {
                            let _ = watcher.save_locked(&data).await;
                            format!("Bought {ticker} at {:.2}", position.entry_price)
                        }
                        Ok(None) => {
                            let _ = watcher.save_locked(&data).await;
                            format!("Buy order for {ticker} placed, still pending fill")
                        }
                        Err(err) => {
                            let _ = watcher.save_locked(&data).await;
                            drop(data);
                            resync_after_terminal_failure(watcher, &err).await;
                            format!("⚠️ {err}")
                        }
                    }
                }
                GateOutcome::Abort(reason) => format!("Buy aborted: {reason}"),
            }
        }
        Callback::CancelBuy { ticker } => {
            let mut data = watcher.data.write().await;
            data.ledger.take_proposal(&ticker);
            format!("Cancelled pending buy for {ticker}")
        }
        Callback::AdvisorExec { id } => {
            let action_command = {
                let mut data = watcher.data.write().await;
                data.ledger.take_action(&id).map(|a| a.action)
            };
            match action_command {
                Some(command_text) => {
                    let mut results = Vec::new();
                    for sub_command in split_batch(&command_text) {
                        let outcome = Box::pin(handle_command(watcher, &sub_command)).await;
                        results.push(format!("{sub_command} -> {outcome}"));
                    }
                    results.join("\n")
                }
                None => "No pending advisor action with that id".to_string(),
            }
        }
        Callback::AdvisorDismiss { id } => {
            let mut data = watcher.data.write().await;
            data.ledger.take_action(&id);
            format!("Dismissed advisor action {id}")
        }
    }
}

async fn dispatch(watcher: &Arc<Watcher>, command: Command) -> String {
    match command {
        Command::Ping => "pong".to_string(),
        Command::Status => render_status(watcher).await,
        Command::List => render_list(watcher).await,
        Command::Price { ticker } => match watcher.broker.price(&ticker).await {
            Ok(price) => format!("{ticker}: {price:.2}"),
            Err(err) => format!("⚠️ {err}"),
        },
        Command::Market => match watcher.broker.clock().await {
            Ok(clock) => format!(
                "Market is {}. Next open {}, next close {}",
                if clock.is_open { "OPEN" } else { "CLOSED" },
                clock.next_open,
                clock.next_close
            ),
            Err(err) => format!("⚠️ {err}"),
        },
        Command::Search { query } => match watcher.broker.search_assets(&query).await {
            Ok(matches) => {
                if matches.is_empty() {
                    "No matches found".to_string()
                } else {
                    matches
                        .into_iter()
                        .map(|m| format!("{} — {}", m.symbol, m.name))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Err(err) => format!("⚠️ {err}"),
        },
        Command::Scan { sector } => {
            format!("Sector scanning for '{sector}' is not wired to a data source; use /search instead")
        }
        Command::Portfolio => render_portfolio_chunks(watcher).await,
        Command::Buy { ticker, qty, sl, tp } => handle_buy(watcher, ticker, qty, sl, tp).await,
        Command::Sell { ticker } => handle_manual_sell(watcher, ticker).await,
        Command::Update { ticker, sl, tp, ts } => handle_update(watcher, ticker, sl, tp, ts).await,
        Command::Refresh => match risk_poller_tick(watcher).await {
            Ok(()) => "Refreshed".to_string(),
            Err(err) => format!("⚠️ refresh failed: {err}"),
        },
        Command::Analyze { ticker } => handle_analyze(watcher, ticker).await,
        Command::Stop => {
            let mut data = watcher.data.write().await;
            data.portfolio.autonomous_enabled = false;
            let _ = watcher.save_locked(&data).await;
            "Autonomous mode disabled".to_string()
        }
        Command::Start => {
            let mut data = watcher.data.write().await;
            data.portfolio.autonomous_enabled = true;
            let _ = watcher.save_locked(&data).await;
            "Autonomous mode enabled".to_string()
        }
        Command::Help => render_help(),
    }
}

async fn risk_poller_tick(watcher: &Arc<Watcher>) -> anyhow::Result<()> {
    crate::application::risk_poller::tick(watcher).await
}

/// A lean, silent reconciliation invoked just-in-time ahead of a
/// broker-sensitive command (`/status`, `/buy`, `/analyze`) so the decision
/// it informs never runs against data as stale as a full poll interval.
/// Unlike `risk_poller::tick`, it does not scan for SL/TP/TS triggers or
/// send watchlist/discovery notifications — those stay on the regular tick.
async fn jit_sync(watcher: &Arc<Watcher>) {
    let Ok(account) = watcher.broker.account().await else {
        return;
    };
    let Ok(broker_positions) = watcher.broker.list_positions().await else {
        return;
    };
    let mut data = watcher.data.write().await;
    reconciler::reconcile(watcher, &mut data, broker_positions, account.buying_power, account.equity).await;
    let _ = watcher.save_locked(&data).await;
}

async fn render_status(watcher: &Arc<Watcher>) -> String {
    jit_sync(watcher).await;
    let data = watcher.data.read().await;
    let active = data.portfolio.active_positions().count();
    format!(
        "Status: {} active position(s), exposure {:.2}, available budget {:.2}, autonomous {}",
        active,
        data.portfolio.current_exposure,
        data.portfolio.available_budget,
        if data.portfolio.autonomous_enabled { "ON" } else { "OFF" }
    )
}

async fn render_list(watcher: &Arc<Watcher>) -> String {
    let data = watcher.data.read().await;
    let lines: Vec<String> = data
        .portfolio
        .active_positions()
        .map(|p| format!("{} qty={} entry={:.2}", p.ticker, p.quantity, p.entry_price))
        .collect();
    if lines.is_empty() {
        "No active positions".to_string()
    } else {
        lines.join("\n")
    }
}

async fn render_portfolio_chunks(watcher: &Arc<Watcher>) -> String {
    let data = watcher.data.read().await;
    let json = serde_json::to_string_pretty(&data.portfolio).unwrap_or_default();
    if json.len() <= PORTFOLIO_CHUNK_LIMIT {
        json
    } else {
        json.chars().take(PORTFOLIO_CHUNK_LIMIT).collect::<String>() + "\n…(truncated, use /list for a shorter view)"
    }
}

fn render_help() -> String {
    [
        "/ping", "/status", "/list", "/price TICKER", "/market", "/search QUERY",
        "/scan SECTOR", "/portfolio", "/buy TICKER QTY [SL] [TP]", "/sell TICKER",
        "/update TICKER SL TP [TS]", "/refresh", "/analyze [TICKER]", "/stop", "/start", "/help",
    ]
    .join("\n")
}

async fn handle_buy(
    watcher: &Arc<Watcher>,
    ticker: String,
    qty: Decimal,
    sl: Option<Decimal>,
    tp: Option<Decimal>,
) -> String {
    jit_sync(watcher).await;

    let price = match watcher.broker.price(&ticker).await {
        Ok(p) => p,
        Err(err) => return format!("⚠️ {err}"),
    };

    let stop_loss = sl.unwrap_or_else(|| {
        price * (Decimal::ONE - Decimal::try_from(watcher.config.default_stop_loss_pct / 100.0).unwrap_or_default())
    });
    let take_profit = tp.unwrap_or_else(|| {
        price * (Decimal::ONE + Decimal::try_from(watcher.config.default_take_profit_pct / 100.0).unwrap_or_default())
    });
    let trailing_stop_pct =
        Decimal::try_from(watcher.config.default_trailing_stop_pct).unwrap_or_default();

    if stop_loss >= price || take_profit <= price {
        return format!("⚠️ {}", crate::domain::errors::SafetyAbort::InvalidBracket);
    }

    let total_cost = qty * price;

    let has_open_broker_order = watcher
        .broker
        .list_orders(crate::domain::ports::OrderListFilter::Open)
        .await
        .map(|orders| {
            orders
                .iter()
                .any(|o| o.symbol == ticker && o.side == crate::domain::ports::OrderSide::Buy)
        })
        .unwrap_or(false);
    if has_open_broker_order {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::DuplicateOpenOrder { ticker }
        );
    }

    let mut data = watcher.data.write().await;
    if data.portfolio.find_active(&ticker).is_some() {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::DuplicateOpenOrder { ticker }
        );
    }
    if total_cost > data.portfolio.available_budget {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::InsufficientBuyingPower {
                need: total_cost,
                available: data.portfolio.available_budget,
            }
        );
    }

    data.ledger.insert_proposal(PendingProposal {
        ticker: ticker.clone(),
        qty,
        price,
        total_cost,
        stop_loss,
        take_profit,
        trailing_stop_pct,
        timestamp: chrono::Utc::now(),
    });

    let _ = watcher
        .chat
        .send_interactive(
            &format!(
                "Confirm BUY {ticker} x{qty} @ ~{price:.2} (SL {stop_loss:.2} / TP {take_profit:.2})?"
            ),
            vec![
                Button {
                    label: "Execute".to_string(),
                    payload: format!("EXECUTE_BUY_{ticker}"),
                },
                Button {
                    label: "Cancel".to_string(),
                    payload: format!("CANCEL_BUY_{ticker}"),
                },
            ],
        )
        .await;

    format!("Buy proposal for {ticker} awaiting confirmation")
}

async fn handle_manual_sell(watcher: &Arc<Watcher>, ticker: String) -> String {
    let mut data = watcher.data.write().await;
    if data.portfolio.find_active(&ticker).is_none() {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::NoActivePosition { ticker }
        );
    }
    let price = watcher.broker.price(&ticker).await.unwrap_or(Decimal::ZERO);
    data.ledger.insert_action(PendingAction {
        ticker: ticker.clone(),
        action: "SELL".to_string(),
        trigger_price: price,
        timestamp: chrono::Utc::now(),
    });

    let _ = watcher
        .chat
        .send_interactive(
            &format!("Confirm SELL {ticker} @ ~{price:.2}?"),
            vec![
                Button {
                    label: "Confirm".to_string(),
                    payload: format!("CONFIRM_SL_{ticker}"),
                },
                Button {
                    label: "Cancel".to_string(),
                    payload: format!("CANCEL_SL_{ticker}"),
                },
            ],
        )
        .await;

    format!("Sell proposal for {ticker} awaiting confirmation")
}

async fn handle_update(
    watcher: &Arc<Watcher>,
    ticker: String,
    sl: Decimal,
    tp: Decimal,
    ts: Option<Decimal>,
) -> String {
    let current_price = match watcher.broker.price(&ticker).await {
        Ok(p) => p,
        Err(err) => return format!("⚠️ {err}"),
    };

    let mut data = watcher.data.write().await;
    let Some(position) = data.portfolio.find_active_mut(&ticker) else {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::NoActivePosition { ticker }
        );
    };

    if sl < position.stop_loss {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::StopLossRegression {
                new_sl: sl,
                current_sl: position.stop_loss,
            }
        );
    }

    if sl >= current_price || tp <= current_price || tp <= sl {
        return format!("⚠️ {}", crate::domain::errors::SafetyAbort::InvalidBracket);
    }

    position.stop_loss = sl;
    position.take_profit = tp;
    if let Some(trail) = ts {
        position.trailing_stop_pct = trail;
    }

    let _ = watcher.save_locked(&data).await;
    format!("Updated {ticker}: SL={sl:.2} TP={tp:.2}")
}

const ANALYZE_COOLDOWN: chrono::Duration = chrono::Duration::minutes(10);

async fn handle_analyze(watcher: &Arc<Watcher>, ticker_hint: Option<String>) -> String {
    let Some(advisor) = watcher.advisor.clone() else {
        return "No advisor configured".to_string();
    };

    jit_sync(watcher).await;

    let now = chrono::Utc::now();
    {
        let mut data = watcher.data.write().await;
        if let Some(last) = data.last_analyze_time {
            if now - last < ANALYZE_COOLDOWN {
                let remaining = ANALYZE_COOLDOWN - (now - last);
                return format!(
                    "Advisor on cooldown, try again in {}s",
                    remaining.num_seconds().max(1)
                );
            }
        }
        data.last_analyze_time = Some(now);
    }

    let (snapshot, autonomous_enabled) = {
        let data = watcher.data.read().await;
        let account = watcher.broker.account().await.ok();
        (
            AdvisorSnapshot {
                timestamp: chrono::Utc::now(),
                is_market_open: data.was_market_open,
                equity: account.as_ref().map(|a| a.equity).unwrap_or_default(),
                fiscal_limit: data.portfolio.fiscal_limit,
                available_budget: data.portfolio.available_budget,
                current_exposure: data.portfolio.current_exposure,
                positions: data.portfolio.positions.clone(),
                market_context: "n/a".to_string(),
                watchlist_prices: data.portfolio.watchlist_prices.clone(),
            },
            data.portfolio.autonomous_enabled,
        )
    };

    let response = match advisor.analyze(snapshot, ticker_hint.as_deref()).await {
        Ok(r) => r,
        Err(err) => return format!("⚠️ advisor unavailable: {err}"),
    };

    // Every /analyze invocation in this implementation is operator-initiated,
    // so the manual-invocation notify exception in the advisor handling rules
    // always applies: low confidence or a HOLD recommendation still gets
    // reported back to the operator, just without queuing an action.
    if response.recommendation == Recommendation::Hold || response.confidence_score < 0.7 {
        return format!(
            "Advisor analysis ({:.0}% confidence, {:?} risk): {}",
            response.confidence_score * 100.0,
            response.risk_assessment,
            response.analysis
        );
    }

    if !autonomous_enabled {
        let id = uuid::Uuid::new_v4().to_string();
        let mut data = watcher.data.write().await;
        data.ledger.insert_action(PendingAction {
            ticker: id.clone(),
            action: response.action_command.clone(),
            trigger_price: Decimal::ZERO,
            timestamp: chrono::Utc::now(),
        });
        let _ = watcher
            .chat
            .send_interactive(
                &format!(
                    "Advisor recommends: {}\n({:?}, {:.0}% confidence)",
                    response.action_command,
                    response.recommendation,
                    response.confidence_score * 100.0
                ),
                vec![
                    Button {
                        label: "Execute".to_string(),
                        payload: format!("AI_EXEC_{id}"),
                    },
                    Button {
                        label: "Dismiss".to_string(),
                        payload: format!("AI_DISMISS_{id}"),
                    },
                ],
            )
            .await;
        return format!("Advisor proposal {id} awaiting confirmation");
    }

    let sub_commands = split_batch(&response.action_command);

    let batch_buy_cost: Decimal = {
        let mut total = Decimal::ZERO;
        for sub_command in &sub_commands {
            if let Ok(Command::Buy { ticker, qty, .. }) = command::parse(sub_command) {
                if let Ok(price) = watcher.broker.price(&ticker).await {
                    total += qty * price;
                }
            }
        }
        total
    };
    {
        let data = watcher.data.read().await;
        if batch_buy_cost > data.portfolio.available_budget {
            return format!(
                "⚠️ {}",
                crate::domain::errors::SafetyAbort::BatchOverBudget {
                    total: batch_buy_cost,
                    available: data.portfolio.available_budget,
                }
            );
        }
    }

    let mut results = Vec::new();
    for sub_command in sub_commands {
        let outcome = match command::parse(&sub_command) {
            Ok(Command::Buy { ticker, qty, sl, tp }) => {
                match confirmation_gate::gate_autonomous_slippage(watcher, &ticker).await {
                    GateOutcome::Abort(reason) => format!("Buy aborted: {reason}"),
                    GateOutcome::Proceed(()) => handle_autonomous_buy(watcher, ticker, qty, sl, tp).await,
                }
            }
            _ => Box::pin(handle_command(watcher, &sub_command)).await,
        };
        results.push(format!("{sub_command} -> {outcome}"));
    }
    results.join("\n")
}

/// Executes an advisor-originated buy immediately once the slippage gate has
/// cleared, bypassing the manual confirm/cancel button round trip that
/// `/buy` otherwise requires.
async fn handle_autonomous_buy(
    watcher: &Arc<Watcher>,
    ticker: String,
    qty: Decimal,
    sl: Option<Decimal>,
    tp: Option<Decimal>,
) -> String {
    let price = match watcher.broker.price(&ticker).await {
        Ok(p) => p,
        Err(err) => return format!("⚠️ {err}"),
    };
    let stop_loss = sl.unwrap_or_else(|| {
        price * (Decimal::ONE - Decimal::try_from(watcher.config.default_stop_loss_pct / 100.0).unwrap_or_default())
    });
    let take_profit = tp.unwrap_or_else(|| {
        price * (Decimal::ONE + Decimal::try_from(watcher.config.default_take_profit_pct / 100.0).unwrap_or_default())
    });
    let trailing_stop_pct =
        Decimal::try_from(watcher.config.default_trailing_stop_pct).unwrap_or_default();

    let mut data = watcher.data.write().await;
    if data.portfolio.find_active(&ticker).is_some() {
        return format!(
            "⚠️ {}",
            crate::domain::errors::SafetyAbort::DuplicateOpenOrder { ticker }
        );
    }
    match executor::execute_buy(watcher, &mut data, &ticker, qty, stop_loss, take_profit, trailing_stop_pct, "AI").await {
        Ok(Some(position)) => {
            let _ = watcher.save_locked(&data).await;
            format!("Bought {ticker} at {:.2}", position.entry_price)
        }
        Ok(None) => {
            let _ = watcher.save_locked(&data).await;
            format!("Buy order for {ticker} placed, still pending fill")
        }
        Err(err) => {
            let _ = watcher.save_locked(&data).await;
            drop(data);
            resync_after_terminal_failure(watcher, &err).await;
            format!("⚠️ {err}")
        }
    }
}

/// Forces an immediate reconciliation, used after a terminal non-fill
/// status surfaces from the executor so local state never drifts from the
/// broker after a failed order.
pub async fn force_resync(watcher: &Arc<Watcher>) -> anyhow::Result<()> {
    let account = watcher.broker.account().await?;
    let broker_positions = watcher.broker.list_positions().await?;
    let mut data = watcher.data.write().await;
    reconciler::reconcile(watcher, &mut data, broker_positions, account.buying_power, account.equity).await;
    watcher.save_locked(&data).await?;
    Ok(())
}

/// Only a terminal non-fill status leaves the broker and local books
/// possibly disagreeing (clearance timeouts and placement failures never
/// reach the broker's order book); a forced resync straightens that out.
async fn resync_after_terminal_failure(
    watcher: &Arc<Watcher>,
    err: &crate::domain::errors::ExecutionFailure,
) {
    if matches!(err, crate::domain::errors::ExecutionFailure::TerminalStatus { .. }) {
        if let Err(resync_err) = force_resync(watcher).await {
            tracing::error!("forced resync after terminal order status failed: {resync_err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_batch_trims_and_drops_empties() {
        let parts = split_batch("/buy AAPL 1 ; /status ;; /price MSFT");
        assert_eq!(parts, vec!["/buy AAPL 1", "/status", "/price MSFT"]);
    }

    #[test]
    fn kind_tag_maps_every_variant() {
        assert_eq!(kind_tag(TriggerKind::Sl), "SL");
        assert_eq!(kind_tag(TriggerKind::Tp), "TP");
        assert_eq!(kind_tag(TriggerKind::Ts), "TS");
    }
}
