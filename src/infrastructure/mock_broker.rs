//! In-memory [`BrokerPort`] double used by integration tests. Grounded on the
//! teacher's `infrastructure::mock` services: a shared mutable book of prices,
//! orders, and positions guarded by a single mutex, with no network calls.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::errors::TransportFailure;
use crate::domain::ports::{
    Account, AssetMatch, Bar, BrokerPort, BrokerPosition, Clock, Order, OrderListFilter,
    OrderSide, OrderStatus, PortfolioHistory, Quote,
};

struct MockState {
    prices: HashMap<String, Decimal>,
    positions: HashMap<String, BrokerPosition>,
    orders: HashMap<String, Order>,
    account: Account,
    market_open: bool,
    next_open_override: Option<chrono::DateTime<Utc>>,
}

/// A deterministic broker double. Every method is infallible unless the
/// caller explicitly primes a failure via [`MockBroker::fail_next_order`].
pub struct MockBroker {
    state: Mutex<MockState>,
    fail_next_order: Mutex<Option<String>>,
    hold_next_order: Mutex<bool>,
}

impl MockBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(MockState {
                prices: HashMap::new(),
                positions: HashMap::new(),
                orders: HashMap::new(),
                account: Account {
                    equity: starting_cash,
                    buying_power: starting_cash,
                    cash: starting_cash,
                    portfolio_value: starting_cash,
                    day_trade_count: 0,
                    blocked: false,
                },
                market_open: true,
                next_open_override: None,
            }),
            fail_next_order: Mutex::new(None),
            hold_next_order: Mutex::new(false),
        }
    }

    pub fn set_price(&self, ticker: &str, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(ticker.to_string(), price);
    }

    pub fn set_market_open(&self, open: bool) {
        self.state.lock().unwrap().market_open = open;
    }

    /// Overrides `clock().next_open`, otherwise always `now`, so a test can
    /// simulate the market staying closed through the next calendar day.
    pub fn set_next_open(&self, next_open: chrono::DateTime<Utc>) {
        self.state.lock().unwrap().next_open_override = Some(next_open);
    }

    pub fn set_buying_power(&self, amount: Decimal) {
        self.state.lock().unwrap().account.buying_power = amount;
    }

    /// Next call to `place_order` returns this error instead of succeeding.
    pub fn fail_next_order(&self, reason: &str) {
        *self.fail_next_order.lock().unwrap() = Some(reason.to_string());
    }

    /// Next call to `place_order` stays in `New` status forever, never
    /// filling and never going terminal, to exercise the still-pending
    /// verification path.
    pub fn hold_next_order(&self) {
        *self.hold_next_order.lock().unwrap() = true;
    }

    pub fn seed_position(&self, position: BrokerPosition) {
        self.state
            .lock()
            .unwrap()
            .positions
            .insert(position.symbol.clone(), position);
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn price(&self, ticker: &str) -> Result<Decimal, TransportFailure> {
        self.state
            .lock()
            .unwrap()
            .prices
            .get(ticker)
            .copied()
            .ok_or_else(|| TransportFailure::Broker(format!("no mock price set for {ticker}")))
    }

    async fn quote(&self, ticker: &str) -> Result<Quote, TransportFailure> {
        let mid = self.price(ticker).await?;
        let spread = mid * Decimal::new(1, 3); // 0.001
        Ok(Quote {
            bid: mid - spread,
            ask: mid + spread,
            ts: Utc::now(),
        })
    }

    async fn account(&self) -> Result<Account, TransportFailure> {
        Ok(self.state.lock().unwrap().account.clone())
    }

    async fn clock(&self) -> Result<Clock, TransportFailure> {
        let state = self.state.lock().unwrap();
        let is_open = state.market_open;
        let now = Utc::now();
        let next_open = state.next_open_override.unwrap_or(now);
        Ok(Clock {
            now,
            is_open,
            next_open,
            next_close: now + chrono::Duration::hours(6),
        })
    }

    async fn search_assets(&self, query: &str) -> Result<Vec<AssetMatch>, TransportFailure> {
        Ok(vec![AssetMatch {
            symbol: query.to_uppercase(),
            name: format!("{} Inc.", query.to_uppercase()),
        }])
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, TransportFailure> {
        Ok(self.state.lock().unwrap().positions.values().cloned().collect())
    }

    async fn place_order(
        &self,
        ticker: &str,
        qty: Decimal,
        side: OrderSide,
        _sl_price: Decimal,
        _tp_price: Decimal,
    ) -> Result<Order, TransportFailure> {
        if let Some(reason) = self.fail_next_order.lock().unwrap().take() {
            return Err(TransportFailure::Broker(reason));
        }

        let price = self.price(ticker).await?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let held = std::mem::take(&mut *self.hold_next_order.lock().unwrap());
        let order = Order {
            id: id.clone(),
            symbol: ticker.to_string(),
            side,
            qty,
            status: if held { OrderStatus::New } else { OrderStatus::Filled },
            filled_avg_price: if held { None } else { Some(price) },
            filled_at: if held { None } else { Some(now) },
            created_at: now,
        };

        let mut state = self.state.lock().unwrap();
        if !held {
            match side {
                OrderSide::Buy => {
                    state.positions.insert(
                        ticker.to_string(),
                        BrokerPosition {
                            symbol: ticker.to_string(),
                            qty,
                            avg_entry: price,
                            current_price: price,
                            unrealized_pl: Decimal::ZERO,
                            cost_basis: qty * price,
                            change_today: Decimal::ZERO,
                        },
                    );
                    state.account.buying_power -= qty * price;
                }
                OrderSide::Sell => {
                    state.positions.remove(ticker);
                    state.account.buying_power += qty * price;
                }
            }
        }
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: &str) -> Result<Order, TransportFailure> {
        self.state
            .lock()
            .unwrap()
            .orders
            .get(id)
            .cloned()
            .ok_or_else(|| TransportFailure::Broker(format!("no such order {id}")))
    }

    async fn list_orders(&self, filter: OrderListFilter) -> Result<Vec<Order>, TransportFailure> {
        let orders = self.state.lock().unwrap().orders.values().cloned().collect::<Vec<_>>();
        Ok(match filter {
            OrderListFilter::Open => orders
                .into_iter()
                .filter(|o| !o.status.is_terminal_non_fill() && o.status != OrderStatus::Filled)
                .collect(),
            OrderListFilter::Closed => orders
                .into_iter()
                .filter(|o| o.status.is_terminal_non_fill() || o.status == OrderStatus::Filled)
                .collect(),
            OrderListFilter::All => orders,
        })
    }

    async fn cancel_order(&self, id: &str) -> Result<(), TransportFailure> {
        if let Some(order) = self.state.lock().unwrap().orders.get_mut(id) {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, TransportFailure> {
        let price = self.price(ticker).await?;
        let now = Utc::now();
        Ok((0..limit.max(1))
            .map(|i| Bar {
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ZERO,
                ts: now - chrono::Duration::days(i as i64),
            })
            .collect())
    }

    async fn portfolio_history(
        &self,
        _period: &str,
        _timeframe: &str,
    ) -> Result<PortfolioHistory, TransportFailure> {
        let equity = self.state.lock().unwrap().account.equity;
        Ok(PortfolioHistory {
            timestamps: vec![Utc::now()],
            equity: vec![equity],
            profit_loss: vec![Decimal::ZERO],
            profit_loss_pct: vec![Decimal::ZERO],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn place_order_buy_records_position_and_debits_buying_power() {
        let broker = MockBroker::new(dec!(10000));
        broker.set_price("AAPL", dec!(150));

        let order = broker
            .place_order("AAPL", dec!(10), OrderSide::Buy, dec!(140), dec!(170))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let account = broker.account().await.unwrap();
        assert_eq!(account.buying_power, dec!(8500));

        let positions = broker.list_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn place_order_sell_clears_position() {
        let broker = MockBroker::new(dec!(10000));
        broker.set_price("AAPL", dec!(150));
        broker
            .place_order("AAPL", dec!(10), OrderSide::Buy, dec!(140), dec!(170))
            .await
            .unwrap();

        broker
            .place_order("AAPL", dec!(10), OrderSide::Sell, dec!(0), dec!(0))
            .await
            .unwrap();

        let positions = broker.list_positions().await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn fail_next_order_triggers_exactly_once() {
        let broker = MockBroker::new(dec!(10000));
        broker.set_price("AAPL", dec!(150));
        broker.fail_next_order("simulated rejection");

        let first = broker
            .place_order("AAPL", dec!(1), OrderSide::Buy, dec!(0), dec!(0))
            .await;
        assert!(first.is_err());

        let second = broker
            .place_order("AAPL", dec!(1), OrderSide::Buy, dec!(0), dec!(0))
            .await;
        assert!(second.is_ok());
    }
}
