//! The persisted portfolio aggregate: positions, intents, and the fields
//! the reconciler and risk poller keep current.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA_VERSION: &str = "1.3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Active,
    Executed,
    Closed,
    TriggeredSl,
    TriggeredTp,
    TriggeredTs,
}

impl PositionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    #[serde(with = "decimal_as_string")]
    pub quantity: Decimal,
    #[serde(with = "decimal_as_string")]
    pub entry_price: Decimal,
    #[serde(with = "decimal_as_string")]
    pub stop_loss: Decimal,
    #[serde(with = "decimal_as_string")]
    pub take_profit: Decimal,
    #[serde(with = "decimal_as_string")]
    pub trailing_stop_pct: Decimal,
    #[serde(with = "decimal_as_string")]
    pub high_water_mark: Decimal,
    pub status: PositionStatus,
    pub thesis_id: String,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.quantity > Decimal::ZERO
    }

    /// `MANUAL_<unix>` / `AI_<unix>` / `IMPORTED_<unix>` per the thesis id grammar.
    pub fn thesis_id_for(origin: &str, now: DateTime<Utc>) -> String {
        format!("{origin}_{}", now.timestamp())
    }
}

/// A pending sell confirmation (risk-poller triggered) or advisor action
/// proposal, keyed independently from buy proposals to avoid collisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub ticker: String,
    /// Either the literal string "SELL" or a verbatim command string for
    /// advisor-originated proposals.
    pub action: String,
    #[serde(with = "decimal_as_string")]
    pub trigger_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PendingAction {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.timestamp > ttl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingProposal {
    pub ticker: String,
    #[serde(with = "decimal_as_string")]
    pub qty: Decimal,
    #[serde(with = "decimal_as_string")]
    pub price: Decimal,
    #[serde(with = "decimal_as_string")]
    pub total_cost: Decimal,
    #[serde(with = "decimal_as_string")]
    pub stop_loss: Decimal,
    #[serde(with = "decimal_as_string")]
    pub take_profit: Decimal,
    #[serde(with = "decimal_as_string")]
    pub trailing_stop_pct: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PendingProposal {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.timestamp > ttl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub version: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_eod_date: Option<chrono::NaiveDate>,
    pub autonomous_enabled: bool,
    pub positions: Vec<Position>,
    #[serde(with = "decimal_as_string")]
    pub fiscal_limit: Decimal,
    #[serde(with = "decimal_as_string")]
    pub available_budget: Decimal,
    #[serde(with = "decimal_as_string")]
    pub current_exposure: Decimal,
    pub watchlist_prices: HashMap<String, f64>,
}

impl PortfolioState {
    pub fn new(fiscal_limit: Decimal) -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION.to_string(),
            last_sync: None,
            last_heartbeat: None,
            last_eod_date: None,
            autonomous_enabled: false,
            positions: Vec::new(),
            fiscal_limit,
            available_budget: fiscal_limit,
            current_exposure: Decimal::ZERO,
            watchlist_prices: HashMap::new(),
        }
    }

    pub fn active_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_active())
    }

    pub fn find_active_mut(&mut self, ticker: &str) -> Option<&mut Position> {
        self.positions
            .iter_mut()
            .find(|p| p.ticker == ticker && p.is_active())
    }

    pub fn find_active(&self, ticker: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.ticker == ticker && p.is_active())
    }

    /// Invariant 6 in §8: current_exposure == Σ qty·entry_price over ACTIVE positions.
    pub fn recompute_exposure(&mut self) {
        self.current_exposure = self
            .active_positions()
            .map(|p| p.quantity * p.entry_price)
            .sum();
    }

    /// Invariant 7 / §3 invariant 3: the conservative composite budget formula.
    pub fn recompute_available_budget(&mut self, buying_power: Decimal, equity: Decimal) {
        let capped = buying_power.min(equity.min(self.fiscal_limit));
        let remaining = capped - self.current_exposure;
        self.available_budget = remaining.max(Decimal::ZERO);
    }
}

/// Money/quantity fields are serialized as decimal strings (§6), never as
/// JSON numbers, to avoid float round-tripping through the persisted file.
mod decimal_as_string {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let s = String::deserialize(deserializer)?;
        Decimal::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn active_position(ticker: &str, qty: Decimal, entry: Decimal) -> Position {
        Position {
            ticker: ticker.to_string(),
            quantity: qty,
            entry_price: entry,
            stop_loss: dec!(0),
            take_profit: dec!(0),
            trailing_stop_pct: dec!(0),
            high_water_mark: entry,
            status: PositionStatus::Active,
            thesis_id: "MANUAL_1".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn recompute_exposure_sums_active_positions_only() {
        let mut state = PortfolioState::new(dec!(1000));
        state.positions.push(active_position("AAPL", dec!(10), dec!(150)));
        let mut closed = active_position("TSLA", dec!(5), dec!(200));
        closed.status = PositionStatus::Closed;
        state.positions.push(closed);

        state.recompute_exposure();
        assert_eq!(state.current_exposure, dec!(1500));
    }

    #[test]
    fn recompute_available_budget_uses_conservative_composite() {
        let mut state = PortfolioState::new(dec!(300));
        state.current_exposure = dec!(100);
        state.recompute_available_budget(dec!(1000), dec!(5000));
        // min(buying_power=1000, min(equity=5000, fiscal_limit=300)) - 100 = 200
        assert_eq!(state.available_budget, dec!(200));
    }

    #[test]
    fn recompute_available_budget_floors_at_zero() {
        let mut state = PortfolioState::new(dec!(300));
        state.current_exposure = dec!(1000);
        state.recompute_available_budget(dec!(1000), dec!(5000));
        assert_eq!(state.available_budget, dec!(0));
    }

    #[test]
    fn pending_action_expires_after_ttl() {
        let action = PendingAction {
            ticker: "AAPL".into(),
            action: "SELL".into(),
            trigger_price: dec!(100),
            timestamp: Utc::now() - chrono::Duration::seconds(400),
        };
        assert!(action.is_expired(Utc::now(), chrono::Duration::seconds(300)));
        assert!(!action.is_expired(Utc::now(), chrono::Duration::seconds(500)));
    }

    #[test]
    fn decimal_string_roundtrip_through_json() {
        let pos = active_position("AAPL", dec!(10.5), dec!(150.25));
        let json = serde_json::to_string(&pos).unwrap();
        assert!(json.contains("\"10.5\""));
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.quantity, dec!(10.5));
    }
}
