use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::AgentMode;
use crate::audit::AgentSummary;
use crate::order::Order;

/// Candle timeframes the snapshot provider works with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// Timeframes observed by an agent of the given mode. Fast agents watch
    /// the short end, slow agents the long end; the first entry is the
    /// primary frame whose data is mandatory for a snapshot.
    pub fn set_for(mode: AgentMode) -> &'static [Timeframe] {
        match mode {
            AgentMode::Real => &[Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1],
            AgentMode::Strategy => &[Timeframe::H1, Timeframe::H4, Timeframe::D1, Timeframe::W1],
        }
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

/// Net position on one instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BollingerValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Indicator values computed for one timeframe. Each indicator is optional:
/// when the candle window is too short to compute it, the field is simply
/// omitted instead of failing the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IndicatorFrame {
    pub close: f64,
    pub recent_closes: Vec<f64>,
    pub recent_highs: Vec<f64>,
    pub recent_lows: Vec<f64>,
    pub ema_21: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BollingerValue>,
}

/// Immutable point-in-time view of one instrument for one decision cycle.
///
/// Created fresh at the start of each cycle and owned exclusively by it;
/// nothing mutates a snapshot after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub taken_at: DateTime<Utc>,
    /// Last traded price on the primary timeframe.
    pub price: Decimal,
    pub frames: BTreeMap<Timeframe, IndicatorFrame>,
    pub position: Option<Position>,
    /// Open orders visible to the agent: exchange orders in REAL mode,
    /// resting simulated orders for the symbol in STRATEGY mode.
    pub open_orders: Vec<Order>,
    pub balance: Decimal,
    /// Most recent stored summaries for this agent, newest first.
    pub recent_summaries: Vec<AgentSummary>,
}
