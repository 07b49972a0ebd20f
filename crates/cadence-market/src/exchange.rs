use async_trait::async_trait;
use rust_decimal::Decimal;

use cadence_models::{Candle, ExchangeCredentials, OrderSide, OrderStatus, Position, PositionSide, Timeframe};

use crate::error::ExchangeError;

/// A new limit order to be placed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

/// An open order as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub position_side: Option<PositionSide>,
}

/// Request to reduce or flatten an existing position. All fields except the
/// symbol are optional; a bare request closes everything at market.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseRequest {
    pub symbol: String,
    /// Only close this side of a hedged position.
    pub side: Option<PositionSide>,
    /// Exit at this price (limit/stop) instead of market.
    pub price: Option<Decimal>,
    /// Partial close size; anything at or above the position size means a
    /// full close.
    pub size: Option<Decimal>,
}

/// Capability interface over the exchange.
///
/// REAL and STRATEGY execution share this call shape: the paper adapter
/// only uses the market-data half, the real adapter uses all of it. One
/// trait keeps the two paths structurally identical and mockable.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// OHLCV history, oldest first. Public data, no credentials.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Free quote-asset balance.
    async fn fetch_balance(&self, creds: &ExchangeCredentials) -> Result<Decimal, ExchangeError>;

    /// Net open position on the symbol, if any.
    async fn fetch_position(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
    ) -> Result<Option<Position>, ExchangeError>;

    async fn fetch_open_orders(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError>;

    async fn place_limit_order(
        &self,
        creds: &ExchangeCredentials,
        ticket: &OrderTicket,
    ) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), ExchangeError>;

    /// Close (part of) a position. Returns None when there was nothing to
    /// close on the requested side.
    async fn close_position(
        &self,
        creds: &ExchangeCredentials,
        request: &CloseRequest,
    ) -> Result<Option<OrderAck>, ExchangeError>;
}
