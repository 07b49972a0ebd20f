use rust_decimal::prelude::ToPrimitive;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex,
};
use ta::{DataItem, Next};

use cadence_models::{BollingerValue, Candle, IndicatorFrame, MacdValue};

pub const EMA_PERIOD: usize = 21;
pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BB_PERIOD: usize = 20;
pub const BB_MULTIPLIER: f64 = 2.0;

/// How many trailing closes/highs/lows are surfaced verbatim in the frame.
const RECENT_BARS: usize = 5;

/// Compute the indicator frame for one timeframe's candle window.
///
/// Deterministic in the input window: identical candles produce identical
/// values. Each indicator that lacks the history it needs is left as None
/// instead of failing the frame.
pub fn compute_frame(candles: &[Candle]) -> IndicatorFrame {
    let closes: Vec<f64> = candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .collect();
    let highs: Vec<f64> = candles.iter().filter_map(|c| c.high.to_f64()).collect();
    let lows: Vec<f64> = candles.iter().filter_map(|c| c.low.to_f64()).collect();

    IndicatorFrame {
        close: closes.last().copied().unwrap_or(0.0),
        recent_closes: tail(&closes),
        recent_highs: tail(&highs),
        recent_lows: tail(&lows),
        ema_21: ema(&closes, EMA_PERIOD),
        rsi_14: rsi(&closes, RSI_PERIOD),
        atr_14: atr(candles, ATR_PERIOD),
        macd: macd(&closes),
        bollinger: bollinger(&closes),
    }
}

fn tail(values: &[f64]) -> Vec<f64> {
    let start = values.len().saturating_sub(RECENT_BARS);
    values[start..].to_vec()
}

fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let mut ind = ExponentialMovingAverage::new(period).ok()?;
    Some(closes.iter().fold(0.0, |_, &c| ind.next(c)))
}

fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    // The first value only seeds the series; RSI needs period + 1 closes.
    if closes.len() <= period {
        return None;
    }
    let mut ind = RelativeStrengthIndex::new(period).ok()?;
    Some(closes.iter().fold(0.0, |_, &c| ind.next(c)))
}

fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() <= period {
        return None;
    }
    let mut ind = AverageTrueRange::new(period).ok()?;
    let mut value = 0.0;
    for candle in candles {
        let item = DataItem::builder()
            .open(candle.open.to_f64()?)
            .high(candle.high.to_f64()?)
            .low(candle.low.to_f64()?)
            .close(candle.close.to_f64()?)
            .volume(candle.volume)
            .build()
            .ok()?;
        value = ind.next(&item);
    }
    Some(value)
}

fn macd(closes: &[f64]) -> Option<MacdValue> {
    if closes.len() < MACD_SLOW + MACD_SIGNAL {
        return None;
    }
    let mut ind = MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL).ok()?;
    let mut last = None;
    for &close in closes {
        last = Some(ind.next(close));
    }
    last.map(|out| MacdValue {
        macd: out.macd,
        signal: out.signal,
        histogram: out.histogram,
    })
}

fn bollinger(closes: &[f64]) -> Option<BollingerValue> {
    if closes.len() < BB_PERIOD {
        return None;
    }
    let mut ind = BollingerBands::new(BB_PERIOD, BB_MULTIPLIER).ok()?;
    let mut last = None;
    for &close in closes {
        last = Some(ind.next(close));
    }
    last.map(|out| BollingerValue {
        upper: out.upper,
        middle: out.average,
        lower: out.lower,
    })
}
