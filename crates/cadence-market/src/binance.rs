use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use cadence_models::{
    Candle, ExchangeCredentials, ExchangeSettings, OrderSide, OrderStatus, Position, PositionSide,
    Timeframe,
};

use crate::error::ExchangeError;
use crate::exchange::{CloseRequest, ExchangeApi, ExchangeOrder, OrderAck, OrderTicket};

type HmacSha256 = Hmac<Sha256>;

/// Binance USD-M futures REST client.
///
/// Candle data is public; account and order endpoints are signed per call
/// with the credentials passed in, since different agents may trade under
/// different API keys.
pub struct BinanceFutures {
    http: Client,
    api_base: String,
    recv_window_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionEntry {
    position_amt: String,
    entry_price: String,
    un_realized_profit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderEntry {
    order_id: u64,
    side: String,
    price: String,
    orig_qty: String,
    #[serde(default)]
    position_side: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAckEntry {
    order_id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

impl BinanceFutures {
    pub fn new(settings: &ExchangeSettings) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|e| ExchangeError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            recv_window_ms: settings.recv_window_ms,
        })
    }

    /// "BTC/USDT" -> "BTCUSDT".
    fn instrument(symbol: &str) -> String {
        symbol.replace(['/', '-'], "").to_uppercase()
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.api_base, path, query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(e, false))?;
        decode(response, false).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
        creds: &ExchangeCredentials,
        write: bool,
    ) -> Result<T, ExchangeError> {
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign(&creds.api_secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.api_base, path, query, signature);

        debug!(%method, path, "Exchange request");
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(|e| transport_error(e, write))?;
        decode(response, write).await
    }
}

/// HMAC-SHA256 over the query string, hex encoded.
fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Transport(format!("invalid api secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Classify a reqwest failure. A connect failure never reached the
/// exchange and is plain transport; anything else on a write call may have
/// been delivered, so it is ambiguous and must be reconciled.
fn transport_error(e: reqwest::Error, write: bool) -> ExchangeError {
    if write && !e.is_connect() {
        ExchangeError::Ambiguous(e.to_string())
    } else {
        ExchangeError::Transport(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response, write: bool) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, write))?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Payload(format!("{e}: {body}")));
    }

    match serde_json::from_str::<ApiError>(&body) {
        Ok(err) if write => Err(ExchangeError::Rejected(format!(
            "{} (code {})",
            err.msg, err.code
        ))),
        Ok(err) => Err(ExchangeError::Api {
            code: err.code,
            msg: err.msg,
        }),
        Err(_) => Err(ExchangeError::Api {
            code: i64::from(status.as_u16()),
            msg: body,
        }),
    }
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    raw.parse()
        .map_err(|e| ExchangeError::Payload(format!("{field} '{raw}': {e}")))
}

fn ack_status(raw: &str) -> OrderStatus {
    match raw {
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Cancelled,
        "REJECTED" | "EXPIRED" => OrderStatus::Rejected,
        // NEW / PARTIALLY_FILLED and anything unexpected rest as open.
        _ => OrderStatus::Open,
    }
}

/// Parse one kline row: [openTime, open, high, low, close, volume, ...].
fn candle_from_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Payload(format!(
            "kline row has {} fields",
            row.len()
        )));
    }
    let ms = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Payload("kline open time".to_string()))?;
    let timestamp = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ExchangeError::Payload(format!("kline open time {ms}")))?;

    let text = |idx: usize, field: &str| -> Result<&str, ExchangeError> {
        row[idx]
            .as_str()
            .ok_or_else(|| ExchangeError::Payload(format!("kline {field}")))
    };

    Ok(Candle {
        timestamp,
        open: parse_decimal(text(1, "open")?, "open")?,
        high: parse_decimal(text(2, "high")?, "high")?,
        low: parse_decimal(text(3, "low")?, "low")?,
        close: parse_decimal(text(4, "close")?, "close")?,
        volume: text(5, "volume")?
            .parse()
            .map_err(|e| ExchangeError::Payload(format!("kline volume: {e}")))?,
    })
}

#[async_trait]
impl ExchangeApi for BinanceFutures {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = format!(
            "symbol={}&interval={}&limit={}",
            Self::instrument(symbol),
            timeframe.as_str(),
            limit
        );
        let rows: Vec<Vec<serde_json::Value>> = self.public_get("/fapi/v1/klines", &query).await?;
        rows.iter().map(|row| candle_from_kline(row)).collect()
    }

    async fn fetch_balance(&self, creds: &ExchangeCredentials) -> Result<Decimal, ExchangeError> {
        let entries: Vec<BalanceEntry> = self
            .signed(Method::GET, "/fapi/v2/balance", vec![], creds, false)
            .await?;
        match entries.iter().find(|e| e.asset == "USDT") {
            Some(entry) => parse_decimal(&entry.available_balance, "availableBalance"),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn fetch_position(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
    ) -> Result<Option<Position>, ExchangeError> {
        let entries: Vec<PositionEntry> = self
            .signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol", Self::instrument(symbol))],
                creds,
                false,
            )
            .await?;

        // Hedge mode reports LONG and SHORT rows separately; net them.
        let mut net = Decimal::ZERO;
        let mut cost = Decimal::ZERO;
        let mut pnl = Decimal::ZERO;
        for entry in &entries {
            let amount = parse_decimal(&entry.position_amt, "positionAmt")?;
            if amount.is_zero() {
                continue;
            }
            net += amount;
            cost += parse_decimal(&entry.entry_price, "entryPrice")? * amount;
            pnl += parse_decimal(&entry.un_realized_profit, "unRealizedProfit")?;
        }
        if net.is_zero() {
            return Ok(None);
        }

        let side = if net > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        Ok(Some(Position {
            symbol: symbol.to_string(),
            side,
            size: net.abs(),
            entry_price: cost / net,
            unrealized_pnl: Some(pnl),
        }))
    }

    async fn fetch_open_orders(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
    ) -> Result<Vec<ExchangeOrder>, ExchangeError> {
        let entries: Vec<OpenOrderEntry> = self
            .signed(
                Method::GET,
                "/fapi/v1/openOrders",
                vec![("symbol", Self::instrument(symbol))],
                creds,
                false,
            )
            .await?;

        entries
            .into_iter()
            .map(|entry| {
                let side = OrderSide::parse(&entry.side.to_lowercase()).ok_or_else(|| {
                    ExchangeError::Payload(format!("order side '{}'", entry.side))
                })?;
                let position_side = match entry.position_side.as_deref() {
                    Some("LONG") => Some(PositionSide::Long),
                    Some("SHORT") => Some(PositionSide::Short),
                    _ => None,
                };
                Ok(ExchangeOrder {
                    order_id: entry.order_id.to_string(),
                    side,
                    price: parse_decimal(&entry.price, "price")?,
                    size: parse_decimal(&entry.orig_qty, "origQty")?,
                    position_side,
                })
            })
            .collect()
    }

    async fn place_limit_order(
        &self,
        creds: &ExchangeCredentials,
        ticket: &OrderTicket,
    ) -> Result<OrderAck, ExchangeError> {
        let position_side = match ticket.side {
            OrderSide::Buy => "LONG",
            OrderSide::Sell => "SHORT",
        };
        let params = vec![
            ("symbol", Self::instrument(&ticket.symbol)),
            ("side", ticket.side.as_str().to_uppercase()),
            ("positionSide", position_side.to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", ticket.size.normalize().to_string()),
            ("price", ticket.price.normalize().to_string()),
        ];
        let ack: OrderAckEntry = self
            .signed(Method::POST, "/fapi/v1/order", params, creds, true)
            .await?;
        Ok(OrderAck {
            order_id: ack.order_id.to_string(),
            status: ack_status(&ack.status),
        })
    }

    async fn cancel_order(
        &self,
        creds: &ExchangeCredentials,
        symbol: &str,
        order_id: &str,
    ) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol", Self::instrument(symbol)),
            ("orderId", order_id.to_string()),
        ];
        let _: serde_json::Value = self
            .signed(Method::DELETE, "/fapi/v1/order", params, creds, true)
            .await?;
        Ok(())
    }

    async fn close_position(
        &self,
        creds: &ExchangeCredentials,
        request: &CloseRequest,
    ) -> Result<Option<OrderAck>, ExchangeError> {
        let Some(position) = self.fetch_position(creds, &request.symbol).await? else {
            return Ok(None);
        };
        if let Some(side) = request.side {
            if side != position.side {
                warn!(symbol = %request.symbol, "No position on requested side to close");
                return Ok(None);
            }
        }

        let close_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let size = match request.size {
            Some(size) if size > Decimal::ZERO && size < position.size => size,
            _ => position.size,
        };

        let mut params = vec![
            ("symbol", Self::instrument(&request.symbol)),
            ("side", close_side.as_str().to_uppercase()),
            ("positionSide", position.side.as_str().to_string()),
        ];

        match request.price {
            None => {
                params.push(("type", "MARKET".to_string()));
                params.push(("quantity", size.normalize().to_string()));
            }
            Some(price) => {
                let ticker: TickerPrice = self
                    .public_get(
                        "/fapi/v1/ticker/price",
                        &format!("symbol={}", Self::instrument(&request.symbol)),
                    )
                    .await?;
                let current = parse_decimal(&ticker.price, "price")?;

                // Exit below the market on a long (or above on a short) is a
                // stop; exit through profit is a plain limit.
                let is_stop = match position.side {
                    PositionSide::Long => price < current,
                    PositionSide::Short => price > current,
                };
                if is_stop {
                    params.push(("type", "STOP_MARKET".to_string()));
                    params.push(("stopPrice", price.normalize().to_string()));
                    params.push(("quantity", size.normalize().to_string()));
                } else {
                    params.push(("type", "LIMIT".to_string()));
                    params.push(("timeInForce", "GTC".to_string()));
                    params.push(("price", price.normalize().to_string()));
                    params.push(("quantity", size.normalize().to_string()));
                }
            }
        }

        let ack: OrderAckEntry = self
            .signed(Method::POST, "/fapi/v1/order", params, creds, true)
            .await?;
        Ok(Some(OrderAck {
            order_id: ack.order_id.to_string(),
            status: ack_status(&ack.status),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_normalization() {
        assert_eq!(BinanceFutures::instrument("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceFutures::instrument("eth-usdt"), "ETHUSDT");
        assert_eq!(BinanceFutures::instrument("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn signature_matches_reference_vector() {
        // Reference request from the Binance signed-endpoint documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn ack_status_mapping() {
        assert_eq!(ack_status("NEW"), OrderStatus::Open);
        assert_eq!(ack_status("PARTIALLY_FILLED"), OrderStatus::Open);
        assert_eq!(ack_status("FILLED"), OrderStatus::Filled);
        assert_eq!(ack_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(ack_status("EXPIRED"), OrderStatus::Rejected);
    }

    #[test]
    fn parse_kline_row() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1716508800000, "67500.10", "67800.00", "67210.50", "67650.00", "1834.552", 1716509699999, "0", 100, "0", "0", "0"]"#,
        )
        .unwrap();

        let candle = candle_from_kline(&row).unwrap();
        assert_eq!(candle.open.to_string(), "67500.10");
        assert_eq!(candle.close.to_string(), "67650.00");
        assert_eq!(candle.volume, 1834.552);
        assert_eq!(candle.timestamp.timestamp_millis(), 1_716_508_800_000);
    }

    #[test]
    fn parse_kline_row_too_short() {
        let row: Vec<serde_json::Value> = serde_json::from_str(r#"[1716508800000, "1"]"#).unwrap();
        assert!(candle_from_kline(&row).is_err());
    }
}
