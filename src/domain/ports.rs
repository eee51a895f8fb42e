//! Capability traits the core depends on. Every other component reaches the
//! broker, chat, and advisor only through these — never through a concrete
//! client type. Mirrors the teacher's `ExecutionService`/`MarketDataService`
//! split, generalized to the single richer broker contract this spec needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::errors::TransportFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal_non_fill(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderListFilter {
    Open,
    Closed,
    All,
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub cash: Decimal,
    pub portfolio_value: Decimal,
    pub day_trade_count: u32,
    pub blocked: bool,
}

#[derive(Debug, Clone)]
pub struct Clock {
    pub now: DateTime<Utc>,
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    pub next_close: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AssetMatch {
    pub symbol: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry: Decimal,
    pub current_price: Decimal,
    pub unrealized_pl: Decimal,
    pub cost_basis: Decimal,
    pub change_today: Decimal,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub status: OrderStatus,
    pub filled_avg_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Bar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PortfolioHistory {
    pub timestamps: Vec<DateTime<Utc>>,
    pub equity: Vec<Decimal>,
    pub profit_loss: Vec<Decimal>,
    pub profit_loss_pct: Vec<Decimal>,
}

/// The broker abstraction (§4.2). All money/quantity values are
/// fixed-point decimals; timestamps are UTC.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn price(&self, ticker: &str) -> Result<Decimal, TransportFailure>;
    async fn quote(&self, ticker: &str) -> Result<Quote, TransportFailure>;
    async fn account(&self) -> Result<Account, TransportFailure>;
    async fn clock(&self) -> Result<Clock, TransportFailure>;
    async fn search_assets(&self, query: &str) -> Result<Vec<AssetMatch>, TransportFailure>;
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, TransportFailure>;

    /// If `side == Buy` and either `sl_price` or `tp_price` is non-zero,
    /// submits a bracket order with those legs; otherwise a plain market
    /// order. Time-in-force is always "day".
    async fn place_order(
        &self,
        ticker: &str,
        qty: Decimal,
        side: OrderSide,
        sl_price: Decimal,
        tp_price: Decimal,
    ) -> Result<Order, TransportFailure>;

    async fn get_order(&self, id: &str) -> Result<Order, TransportFailure>;
    async fn list_orders(&self, filter: OrderListFilter) -> Result<Vec<Order>, TransportFailure>;
    async fn cancel_order(&self, id: &str) -> Result<(), TransportFailure>;

    /// Last `limit` daily bars; implementations fetch a 5-day window to
    /// guarantee at least one bar across weekends.
    async fn bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, TransportFailure>;

    async fn portfolio_history(
        &self,
        period: &str,
        timeframe: &str,
    ) -> Result<PortfolioHistory, TransportFailure>;
}

/// A single row of interactive buttons attached to an outbound chat message.
#[derive(Debug, Clone)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

/// The chat transport abstraction. The long-poll loop, message rendering,
/// and credential handling are out of scope; the core only ever sends
/// through this port.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), TransportFailure>;
    async fn send_interactive(
        &self,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<(), TransportFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Buy,
    Sell,
    Update,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAssessment {
    Low,
    Medium,
    High,
}

/// The advisor's structured response (§6 Advisor interface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorResponse {
    pub analysis: String,
    pub recommendation: Recommendation,
    pub action_command: String,
    pub confidence_score: f64,
    pub risk_assessment: RiskAssessment,
}

/// A portfolio snapshot sent to the advisor as context for its
/// recommendation (§6 Advisor interface, request side).
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub is_market_open: bool,
    pub equity: Decimal,
    pub fiscal_limit: Decimal,
    pub available_budget: Decimal,
    pub current_exposure: Decimal,
    pub positions: Vec<crate::domain::state::Position>,
    pub market_context: String,
    pub watchlist_prices: std::collections::HashMap<String, f64>,
}

/// The advisor model client abstraction. HTTP call and JSON framing are out
/// of scope; the core only consumes the typed response.
#[async_trait]
pub trait AdvisorPort: Send + Sync {
    async fn analyze(
        &self,
        snapshot: AdvisorSnapshot,
        ticker_hint: Option<&str>,
    ) -> Result<AdvisorResponse, TransportFailure>;
}
