//! Scriptable in-memory exchange for tests across the workspace.
//!
//! The mock serves flat candle windows, a settable account state, and a
//! queue of scripted order-placement results so failure paths (rejection,
//! ambiguous transport loss) can be exercised deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use cadence_models::{
    Candle, ExchangeCredentials, OrderSide, OrderStatus, Position, PositionSide, Timeframe,
};

use crate::error::ExchangeError;
use crate::exchange::{CloseRequest, ExchangeApi, ExchangeOrder, OrderAck, OrderTicket};

/// Flat candle window: every bar closes at `price` with a small range.
pub fn flat_candles(price: Decimal, count: usize) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
    (0..count)
        .map(|i| Candle {
            timestamp: base + chrono::Duration::minutes(15 * i as i64),
            open: price,
            high: price + Decimal::ONE,
            low: price - Decimal::ONE,
            close: price,
            volume: 1000.0,
        })
        .collect()
}

pub fn test_credentials() -> ExchangeCredentials {
    ExchangeCredentials {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
    }
}

#[derive(Default)]
pub struct MockExchange {
    candles: Mutex<HashMap<(String, Timeframe), Vec<Candle>>>,
    pub balance: Mutex<Decimal>,
    pub position: Mutex<Option<Position>>,
    pub open_orders: Mutex<Vec<ExchangeOrder>>,
    /// Scripted outcomes for `place_limit_order`, consumed in order. When
    /// empty, placements succeed with a sequential id.
    place_results: Mutex<VecDeque<Result<OrderAck, ExchangeError>>>,
    pub placed: Mutex<Vec<OrderTicket>>,
    pub cancelled: Mutex<Vec<String>>,
    pub close_requests: Mutex<Vec<CloseRequest>>,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a flat candle window on every timeframe for `symbol`.
    pub fn with_symbol(symbol: &str, price: Decimal, count: usize) -> Self {
        let mock = Self::new();
        mock.add_symbol(symbol, price, count);
        mock
    }

    pub fn add_symbol(&self, symbol: &str, price: Decimal, count: usize) {
        let mut candles = self.candles.lock().unwrap();
        for tf in [
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
        ] {
            candles.insert((symbol.to_string(), tf), flat_candles(price, count));
        }
    }

    pub fn set_candles(&self, symbol: &str, timeframe: Timeframe, window: Vec<Candle>) {
        self.candles
            .lock()
            .unwrap()
            .insert((symbol.to_string(), timeframe), window);
    }

    pub fn queue_place_result(&self, result: Result<OrderAck, ExchangeError>) {
        self.place_results.lock().unwrap().push_back(result);
    }

    pub fn place_calls(&self) -> usize {
        self.placed.lock().unwrap().len()
    }

    pub fn set_open_orders(&self, orders: Vec<ExchangeOrder>) {
        *self.open_orders.lock().unwrap() = orders;
    }

    pub fn set_position(&self, position: Option<Position>) {
        *self.position.lock().unwrap() = position;
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.candles
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .ok_or_else(|| {
                ExchangeError::Transport(format!("no candles for {symbol} {}", timeframe.as_str()))
            })
    }

    async fn fetch_balance(&self, _creds: &ExchangeCredentials) -> Result<Decimal, ExchangeError> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn fetch_position(
        &self,
        _creds: &ExchangeCredentials,
        _symbol: &str,
    ) -> Result<Option<Position>, ExchangeError> {
        Ok(self.position.lock().unwrap().clone())
    }

    async fn fetch_open_orders(
        &self,
        _creds: &ExchangeCredentials,
        _symbol: &str,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn place_limit_order(
        &self,
        _creds: &ExchangeCredentials,
        ticket: &OrderTicket,
    ) -> Result<OrderAck, ExchangeError> {
        self.placed.lock().unwrap().push(ticket.clone());
        if let Some(result) = self.place_results.lock().unwrap().pop_front() {
            return result;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderAck {
            order_id: format!("EX-{id}"),
            status: OrderStatus::Open,
        })
    }

    async fn cancel_order(
        &self,
        _creds: &ExchangeCredentials,
        _symbol: &str,
        order_id: &str,
    ) -> Result<(), ExchangeError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn close_position(
        &self,
        _creds: &ExchangeCredentials,
        request: &CloseRequest,
    ) -> Result<Option<OrderAck>, ExchangeError> {
        self.close_requests.lock().unwrap().push(request.clone());
        let position = self.position.lock().unwrap().clone();
        match position {
            Some(position) => {
                if let Some(side) = request.side {
                    if side != position.side {
                        return Ok(None);
                    }
                }
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Some(OrderAck {
                    order_id: format!("EX-{id}"),
                    status: OrderStatus::Filled,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Build an `ExchangeOrder` resting at `price`, as reported by the venue.
pub fn resting_order(order_id: &str, side: OrderSide, price: Decimal, size: Decimal) -> ExchangeOrder {
    let position_side = match side {
        OrderSide::Buy => PositionSide::Long,
        OrderSide::Sell => PositionSide::Short,
    };
    ExchangeOrder {
        order_id: order_id.to_string(),
        side,
        price,
        size,
        position_side: Some(position_side),
    }
}
