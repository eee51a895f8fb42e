//! Live [`BrokerPort`] implementation over Alpaca's trading and market-data
//! REST APIs. Request/response shapes and the `APCA-API-KEY-ID` header pair
//! follow the teacher's `infrastructure::alpaca` client; order submission is
//! generalized from its single-leg `execute()` to bracket orders so stop-loss
//! and take-profit legs ride along with the entry order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::errors::TransportFailure;
use crate::domain::ports::{
    Account, AssetMatch, Bar, BrokerPort, BrokerPosition, Clock, Order, OrderListFilter,
    OrderSide, OrderStatus, PortfolioHistory, Quote,
};

pub struct AlpacaBroker {
    client: Client,
    api_key: String,
    api_secret: String,
    trading_base_url: String,
    data_base_url: String,
}

impl AlpacaBroker {
    pub fn new(
        api_key: String,
        api_secret: String,
        trading_base_url: String,
        data_base_url: String,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_secret,
            trading_base_url,
            data_base_url,
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    fn err(context: &str, detail: impl std::fmt::Display) -> TransportFailure {
        TransportFailure::Broker(format!("{context}: {detail}"))
    }
}

#[derive(Debug, Serialize)]
struct OrderLeg {
    limit_price: Option<String>,
    stop_price: String,
}

#[derive(Debug, Serialize)]
struct BracketOrderRequest {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
    order_class: &'static str,
    take_profit: OrderLeg,
    stop_loss: OrderLeg,
}

#[derive(Debug, Serialize)]
struct MarketOrderRequest {
    symbol: String,
    qty: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    time_in_force: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    symbol: String,
    side: String,
    qty: String,
    status: String,
    filled_avg_price: Option<String>,
    filled_at: Option<String>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    equity: String,
    buying_power: String,
    cash: String,
    portfolio_value: String,
    #[serde(default)]
    daytrade_count: i64,
    trading_blocked: bool,
    account_blocked: bool,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    current_price: String,
    unrealized_pl: String,
    cost_basis: String,
    #[serde(default)]
    change_today: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    timestamp: String,
    is_open: bool,
    next_open: String,
    next_close: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAsset {
    symbol: String,
    name: String,
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, TransportFailure> {
    Decimal::from_str(raw).map_err(|_| {
        TransportFailure::Broker(format!("could not parse decimal field {field}: {raw}"))
    })
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, TransportFailure> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TransportFailure::Broker(format!("could not parse timestamp field {field}: {raw}")))
}

fn order_side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn parse_order_status(raw: &str) -> OrderStatus {
    match raw {
        "new" | "accepted" | "pending_new" | "held" => OrderStatus::New,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "pending_cancel" => OrderStatus::Canceled,
        "rejected" => OrderStatus::Rejected,
        "expired" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

fn to_domain_order(resp: AlpacaOrderResponse) -> Result<Order, TransportFailure> {
    Ok(Order {
        id: resp.id,
        symbol: resp.symbol,
        side: if resp.side == "buy" {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        },
        qty: parse_decimal("qty", &resp.qty)?,
        status: parse_order_status(&resp.status),
        filled_avg_price: resp
            .filled_avg_price
            .as_deref()
            .map(|p| parse_decimal("filled_avg_price", p))
            .transpose()?,
        filled_at: resp
            .filled_at
            .as_deref()
            .map(|t| parse_timestamp("filled_at", t))
            .transpose()?,
        created_at: parse_timestamp("created_at", &resp.created_at)?,
    })
}

#[async_trait]
impl BrokerPort for AlpacaBroker {
    async fn price(&self, ticker: &str) -> Result<Decimal, TransportFailure> {
        let quote = self.quote(ticker).await?;
        Ok((quote.bid + quote.ask) / Decimal::from(2))
    }

    async fn quote(&self, ticker: &str) -> Result<Quote, TransportFailure> {
        #[derive(Deserialize)]
        struct QuoteBody {
            bp: String,
            ap: String,
            t: String,
        }
        #[derive(Deserialize)]
        struct QuoteResponse {
            quote: QuoteBody,
        }

        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_base_url, ticker);
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Self::err("quote request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("quote request rejected", resp.status()));
        }
        let body: QuoteResponse = resp
            .json()
            .await
            .map_err(|e| Self::err("quote response malformed", e))?;
        Ok(Quote {
            bid: parse_decimal("bp", &body.quote.bp)?,
            ask: parse_decimal("ap", &body.quote.ap)?,
            ts: parse_timestamp("t", &body.quote.t)?,
        })
    }

    async fn account(&self) -> Result<Account, TransportFailure> {
        let url = format!("{}/v2/account", self.trading_base_url);
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Self::err("account request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("account request rejected", resp.status()));
        }
        let body: AlpacaAccount = resp
            .json()
            .await
            .map_err(|e| Self::err("account response malformed", e))?;
        Ok(Account {
            equity: parse_decimal("equity", &body.equity)?,
            buying_power: parse_decimal("buying_power", &body.buying_power)?,
            cash: parse_decimal("cash", &body.cash)?,
            portfolio_value: parse_decimal("portfolio_value", &body.portfolio_value)?,
            day_trade_count: body.daytrade_count.max(0) as u32,
            blocked: body.trading_blocked || body.account_blocked,
        })
    }

    async fn clock(&self) -> Result<Clock, TransportFailure> {
        let url = format!("{}/v2/clock", self.trading_base_url);
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Self::err("clock request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("clock request rejected", resp.status()));
        }
        let body: AlpacaClock = resp
            .json()
            .await
            .map_err(|e| Self::err("clock response malformed", e))?;
        Ok(Clock {
            now: parse_timestamp("timestamp", &body.timestamp)?,
            is_open: body.is_open,
            next_open: parse_timestamp("next_open", &body.next_open)?,
            next_close: parse_timestamp("next_close", &body.next_close)?,
        })
    }

    async fn search_assets(&self, query: &str) -> Result<Vec<AssetMatch>, TransportFailure> {
        let url = format!("{}/v2/assets", self.trading_base_url);
        let resp = self
            .auth(self.client.get(&url).query(&[("status", "active")]))
            .send()
            .await
            .map_err(|e| Self::err("assets request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("assets request rejected", resp.status()));
        }
        let assets: Vec<AlpacaAsset> = resp
            .json()
            .await
            .map_err(|e| Self::err("assets response malformed", e))?;
        let needle = query.to_uppercase();
        Ok(assets
            .into_iter()
            .filter(|a| a.symbol.contains(&needle) || a.name.to_uppercase().contains(&needle))
            .map(|a| AssetMatch {
                symbol: a.symbol,
                name: a.name,
            })
            .take(20)
            .collect())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, TransportFailure> {
        let url = format!("{}/v2/positions", self.trading_base_url);
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Self::err("positions request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("positions request rejected", resp.status()));
        }
        let positions: Vec<AlpacaPosition> = resp
            .json()
            .await
            .map_err(|e| Self::err("positions response malformed", e))?;

        positions
            .into_iter()
            .map(|p| {
                Ok(BrokerPosition {
                    symbol: p.symbol,
                    qty: parse_decimal("qty", &p.qty)?,
                    avg_entry: parse_decimal("avg_entry_price", &p.avg_entry_price)?,
                    current_price: parse_decimal("current_price", &p.current_price)?,
                    unrealized_pl: parse_decimal("unrealized_pl", &p.unrealized_pl)?,
                    cost_basis: parse_decimal("cost_basis", &p.cost_basis)?,
                    change_today: if p.change_today.is_empty() {
                        Decimal::ZERO
                    } else {
                        parse_decimal("change_today", &p.change_today)?
                    },
                })
            })
            .collect()
    }

    async fn place_order(
        &self,
        ticker: &str,
        qty: Decimal,
        side: OrderSide,
        sl_price: Decimal,
        tp_price: Decimal,
    ) -> Result<Order, TransportFailure> {
        let url = format!("{}/v2/orders", self.trading_base_url);

        let resp = if side == OrderSide::Buy && sl_price > Decimal::ZERO && tp_price > Decimal::ZERO
        {
            let request = BracketOrderRequest {
                symbol: ticker.to_string(),
                qty: qty.to_string(),
                side: order_side_str(side).to_string(),
                order_type: "market".to_string(),
                time_in_force: "day".to_string(),
                order_class: "bracket",
                take_profit: OrderLeg {
                    limit_price: Some(tp_price.to_string()),
                    stop_price: String::new(),
                },
                stop_loss: OrderLeg {
                    limit_price: None,
                    stop_price: sl_price.to_string(),
                },
            };
            self.auth(self.client.post(&url).json(&request))
                .send()
                .await
        } else {
            let request = MarketOrderRequest {
                symbol: ticker.to_string(),
                qty: qty.to_string(),
                side: order_side_str(side).to_string(),
                order_type: "market".to_string(),
                time_in_force: "day".to_string(),
            };
            self.auth(self.client.post(&url).json(&request))
                .send()
                .await
        }
        .map_err(|e| Self::err("order placement request failed", e))?;

        if !resp.status().is_success() {
            let detail = resp
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(Self::err("order placement rejected", detail));
        }

        let body: AlpacaOrderResponse = resp
            .json()
            .await
            .map_err(|e| Self::err("order response malformed", e))?;
        to_domain_order(body)
    }

    async fn get_order(&self, id: &str) -> Result<Order, TransportFailure> {
        let url = format!("{}/v2/orders/{}", self.trading_base_url, id);
        let resp = self
            .auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Self::err("get_order request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("get_order request rejected", resp.status()));
        }
        let body: AlpacaOrderResponse = resp
            .json()
            .await
            .map_err(|e| Self::err("get_order response malformed", e))?;
        to_domain_order(body)
    }

    async fn list_orders(&self, filter: OrderListFilter) -> Result<Vec<Order>, TransportFailure> {
        let status = match filter {
            OrderListFilter::Open => "open",
            OrderListFilter::Closed => "closed",
            OrderListFilter::All => "all",
        };
        let url = format!("{}/v2/orders", self.trading_base_url);
        let resp = self
            .auth(self.client.get(&url).query(&[("status", status)]))
            .send()
            .await
            .map_err(|e| Self::err("list_orders request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("list_orders request rejected", resp.status()));
        }
        let bodies: Vec<AlpacaOrderResponse> = resp
            .json()
            .await
            .map_err(|e| Self::err("list_orders response malformed", e))?;
        bodies.into_iter().map(to_domain_order).collect()
    }

    async fn cancel_order(&self, id: &str) -> Result<(), TransportFailure> {
        let url = format!("{}/v2/orders/{}", self.trading_base_url, id);
        let resp = self
            .auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| Self::err("cancel_order request failed", e))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(Self::err("cancel_order request rejected", resp.status()));
        }
        Ok(())
    }

    async fn bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, TransportFailure> {
        #[derive(Deserialize)]
        struct BarBody {
            o: f64,
            h: f64,
            l: f64,
            c: f64,
            v: f64,
            t: String,
        }
        #[derive(Deserialize)]
        struct BarsResponse {
            bars: Vec<BarBody>,
        }

        let start = (Utc::now() - chrono::Duration::days(5)).to_rfc3339();
        let url = format!("{}/v2/stocks/{}/bars", self.data_base_url, ticker);
        let resp = self
            .auth(self.client.get(&url).query(&[
                ("timeframe", "1Day"),
                ("start", &start),
                ("limit", &limit.to_string()),
            ]))
            .send()
            .await
            .map_err(|e| Self::err("bars request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("bars request rejected", resp.status()));
        }
        let body: BarsResponse = resp
            .json()
            .await
            .map_err(|e| Self::err("bars response malformed", e))?;

        body.bars
            .into_iter()
            .map(|b| {
                Ok(Bar {
                    open: Decimal::try_from(b.o)
                        .map_err(|_| Self::err("bar open", "invalid f64"))?,
                    high: Decimal::try_from(b.h)
                        .map_err(|_| Self::err("bar high", "invalid f64"))?,
                    low: Decimal::try_from(b.l)
                        .map_err(|_| Self::err("bar low", "invalid f64"))?,
                    close: Decimal::try_from(b.c)
                        .map_err(|_| Self::err("bar close", "invalid f64"))?,
                    volume: Decimal::try_from(b.v)
                        .map_err(|_| Self::err("bar volume", "invalid f64"))?,
                    ts: parse_timestamp("t", &b.t)?,
                })
            })
            .collect()
    }

    async fn portfolio_history(
        &self,
        period: &str,
        timeframe: &str,
    ) -> Result<PortfolioHistory, TransportFailure> {
        #[derive(Deserialize)]
        struct HistoryResponse {
            timestamp: Vec<i64>,
            equity: Vec<f64>,
            profit_loss: Vec<f64>,
            profit_loss_pct: Vec<f64>,
        }

        let url = format!("{}/v2/account/portfolio/history", self.trading_base_url);
        let resp = self
            .auth(
                self.client
                    .get(&url)
                    .query(&[("period", period), ("timeframe", timeframe)]),
            )
            .send()
            .await
            .map_err(|e| Self::err("portfolio_history request failed", e))?;
        if !resp.status().is_success() {
            return Err(Self::err("portfolio_history request rejected", resp.status()));
        }
        let body: HistoryResponse = resp
            .json()
            .await
            .map_err(|e| Self::err("portfolio_history response malformed", e))?;

        let to_decimal = |values: Vec<f64>, field: &str| -> Result<Vec<Decimal>, TransportFailure> {
            values
                .into_iter()
                .map(|v| Decimal::try_from(v).map_err(|_| Self::err(field, "invalid f64")))
                .collect()
        };

        Ok(PortfolioHistory {
            timestamps: body
                .timestamp
                .into_iter()
                .map(|ts| DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now))
                .collect(),
            equity: to_decimal(body.equity, "equity")?,
            profit_loss: to_decimal(body.profit_loss, "profit_loss")?,
            profit_loss_pct: to_decimal(body.profit_loss_pct, "profit_loss_pct")?,
        })
    }
}
