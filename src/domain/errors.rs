//! Error taxonomy for the trade-lifecycle engine.
//!
//! These are kinds, not ad-hoc strings: every fallible path in the core
//! returns one of these so the caller (chat response formatter, tracing
//! call site) can apply the right prefix/emoji without re-deriving intent
//! from a message string.

use rust_decimal::Decimal;
use thiserror::Error;

/// Network/IO failure talking to the broker, chat transport, or advisor.
/// Retried only by the explicit poll loops in the executor and confirmation
/// gate; never retried while the watcher lock is held.
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("broker request failed: {0}")]
    Broker(String),
    #[error("chat send failed: {0}")]
    Chat(String),
    #[error("advisor request failed: {0}")]
    Advisor(String),
}

/// Malformed operator input: unknown verb, bad numeric argument, or a
/// callback payload that doesn't match any known grammar. Never fatal.
#[derive(Debug, Error)]
pub enum ContractViolation {
    #[error("unknown command: {0}")]
    UnknownVerb(String),
    #[error("bad argument for {verb}: {arg}")]
    BadArgument { verb: String, arg: String },
    #[error("malformed callback payload: {0}")]
    BadCallback(String),
}

/// A safety gate refused to proceed. No side effects are applied to state
/// when this is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SafetyAbort {
    #[error("intent expired: age exceeds confirmation TTL")]
    Expired,
    #[error("no pending intent found for this ticker/id")]
    NotFound,
    #[error("no ACTIVE position for {ticker}")]
    NoActivePosition { ticker: String },
    #[error("TP GUARDRAIL: current price {current} below 99.5% of target {target}")]
    TpGuardrail { current: Decimal, target: Decimal },
    #[error("PRICE DEVIATION: {deviation:.4} exceeds max {max:.4}")]
    PriceDeviation { deviation: Decimal, max: Decimal },
    #[error("slippage gate: ({ask} - {bid}) / {bid} exceeds max 0.005")]
    SlippageExceeded { bid: Decimal, ask: Decimal },
    #[error("insufficient buying power: need {need}, available {available}")]
    InsufficientBuyingPower { need: Decimal, available: Decimal },
    #[error("order already pending for {ticker}")]
    DuplicateOpenOrder { ticker: String },
    #[error("SL monotonicity: new stop {new_sl} is below current stop {current_sl}")]
    StopLossRegression {
        new_sl: Decimal,
        current_sl: Decimal,
    },
    #[error("guardrail violated: requires stop_loss < price < take_profit")]
    InvalidBracket,
    #[error("batch cost {total} exceeds available capital {available}")]
    BatchOverBudget { total: Decimal, available: Decimal },
}

/// An order was submitted but the broker ended up rejecting it, or
/// verification observed a terminal non-filled status. Always triggers a
/// forced reconciliation.
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    #[error("[FATAL_TRADE_ERROR] place_order failed for {ticker}: {reason}")]
    PlacementFailed { ticker: String, reason: String },
    #[error("[FATAL_TRADE_ERROR] order {order_id} for {ticker} ended in terminal status {status}")]
    TerminalStatus {
        order_id: String,
        ticker: String,
        status: String,
    },
    #[error("[FATAL_TRADE_ERROR] sequential clearance timed out for {ticker}")]
    ClearanceTimeout { ticker: String },
}

/// A high-water-mark regression was detected during a state-store save
/// audit. Logged, never aborts the save.
#[derive(Debug, Error)]
#[error("[CRITICAL_STATE_REGRESSION] {ticker}: hwm regressed from {old} to {new}")]
pub struct StateRegression {
    pub ticker: String,
    pub old: Decimal,
    pub new: Decimal,
}

/// A schema migration step failed or a future/unknown version was found.
/// Fatal: the process must refuse to start.
#[derive(Debug, Error)]
pub enum SchemaMigrationFailure {
    #[error("unknown schema version: {0}")]
    UnknownVersion(String),
    #[error("migration step {from} -> {to} failed: {reason}")]
    StepFailed {
        from: String,
        to: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tp_guardrail_message_contains_values() {
        let e = SafetyAbort::TpGuardrail {
            current: dec!(198.90),
            target: dec!(199.00),
        };
        let msg = e.to_string();
        assert!(msg.contains("TP GUARDRAIL"));
        assert!(msg.contains("198.90"));
    }

    #[test]
    fn state_regression_message_has_critical_prefix() {
        let e = StateRegression {
            ticker: "AAPL".into(),
            old: dec!(150),
            new: dec!(140),
        };
        assert!(e.to_string().starts_with("[CRITICAL_STATE_REGRESSION]"));
    }
}
