use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_market::{CloseRequest, ExchangeApi, ExchangeError, OrderTicket};
use cadence_models::{
    AgentConfig, Decision, EntryParams, ExchangeCredentials, ExchangeSettings, MarketSnapshot,
    Order, OrderSide, OrderStatus, PositionSide, TradeAction,
};
use cadence_store::Store;

use crate::error::CycleError;

/// Existing order within 0.1% of a new price counts as the same level,
/// both for the duplicate-entry filter and for reconciliation matching.
const PRICE_MATCH_RATIO: &str = "0.001";

/// Hours a simulated entry stays valid when the decision does not say.
const DEFAULT_VALID_HOURS: i64 = 24;

/// What the ACT stage produced. The adapter performs exchange side
/// effects; the returned order rows are persisted by FINALIZE so that the
/// order write and the analysis-log write happen at one place.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Order placed (or simulated); row to persist.
    Placed(Order),
    /// Reconciliation found the order already existed on the exchange.
    Adopted(Order),
    /// Exchange refused the order; REJECTED row to persist.
    Rejected(Order),
    /// Position exit executed; FILLED row to persist.
    Closed(Order),
    Cancelled {
        order_id: String,
    },
    CancelFailed {
        order_id: String,
        reason: String,
    },
    /// Entry skipped: an equivalent order already rests at that level.
    DuplicateSkipped,
    /// CLOSE with no position on the requested side.
    NothingToClose,
    NoAction,
}

impl ExecutionOutcome {
    /// The order row to persist, if this outcome carries one.
    pub fn order(&self) -> Option<&Order> {
        match self {
            ExecutionOutcome::Placed(o)
            | ExecutionOutcome::Adopted(o)
            | ExecutionOutcome::Rejected(o)
            | ExecutionOutcome::Closed(o) => Some(o),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Placed(_) => "placed",
            ExecutionOutcome::Adopted(_) => "adopted",
            ExecutionOutcome::Rejected(_) => "rejected",
            ExecutionOutcome::Closed(_) => "closed",
            ExecutionOutcome::Cancelled { .. } => "cancelled",
            ExecutionOutcome::CancelFailed { .. } => "cancel_failed",
            ExecutionOutcome::DuplicateSkipped => "duplicate_skipped",
            ExecutionOutcome::NothingToClose => "nothing_to_close",
            ExecutionOutcome::NoAction => "no_action",
        }
    }
}

/// Applies a `Decision` to the backend selected purely by the agent's
/// mode: the exchange for REAL, the store-backed simulated ledger for
/// STRATEGY. Leverage is never sent anywhere from here.
pub struct ExecutionAdapter {
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<Store>,
    settings: ExchangeSettings,
}

impl ExecutionAdapter {
    pub fn new(exchange: Arc<dyn ExchangeApi>, store: Arc<Store>, settings: ExchangeSettings) -> Self {
        Self {
            exchange,
            store,
            settings,
        }
    }

    pub async fn apply(
        &self,
        agent: &AgentConfig,
        snapshot: &MarketSnapshot,
        decision: &Decision,
    ) -> Result<ExecutionOutcome, CycleError> {
        match &decision.action {
            TradeAction::NoAction => Ok(ExecutionOutcome::NoAction),
            TradeAction::Buy(params) => {
                self.entry(agent, snapshot, decision, OrderSide::Buy, params)
                    .await
            }
            TradeAction::Sell(params) => {
                self.entry(agent, snapshot, decision, OrderSide::Sell, params)
                    .await
            }
            TradeAction::Cancel(params) => self.cancel(agent, &params.order_id).await,
            TradeAction::Close(params) => {
                if agent.mode.is_real() {
                    self.real_close(agent, snapshot, decision, params).await
                } else {
                    Ok(self.paper_close(agent, snapshot, decision, params))
                }
            }
        }
    }

    async fn entry(
        &self,
        agent: &AgentConfig,
        snapshot: &MarketSnapshot,
        decision: &Decision,
        side: OrderSide,
        params: &EntryParams,
    ) -> Result<ExecutionOutcome, CycleError> {
        if is_duplicate_entry(&snapshot.open_orders, side, params.price) {
            info!(
                config_id = %agent.config_id,
                side = side.as_str(),
                price = %params.price,
                "Equivalent order already resting, entry skipped"
            );
            return Ok(ExecutionOutcome::DuplicateSkipped);
        }

        if agent.mode.is_real() {
            self.real_entry(agent, decision, side, params).await
        } else {
            Ok(ExecutionOutcome::Placed(paper_entry(
                agent, snapshot, decision, side, params,
            )))
        }
    }

    async fn real_entry(
        &self,
        agent: &AgentConfig,
        decision: &Decision,
        side: OrderSide,
        params: &EntryParams,
    ) -> Result<ExecutionOutcome, CycleError> {
        let creds = self.credentials(agent)?;
        let ticket = OrderTicket {
            symbol: agent.symbol.clone(),
            side,
            price: params.price,
            size: params.size,
        };

        match self.exchange.place_limit_order(&creds, &ticket).await {
            Ok(ack) => Ok(ExecutionOutcome::Placed(order_row(
                agent,
                &ack.order_id,
                side,
                params.price,
                params.size,
                params,
                ack.status,
                false,
                &decision.rationale,
                None,
            ))),
            Err(ExchangeError::Rejected(reason)) => {
                warn!(config_id = %agent.config_id, %reason, "Order rejected");
                Ok(ExecutionOutcome::Rejected(rejected_row(
                    agent, side, params, &reason,
                )))
            }
            Err(ExchangeError::Ambiguous(detail)) => {
                warn!(config_id = %agent.config_id, %detail, "Order placement unconfirmed, reconciling");
                self.reconcile_entry(agent, &creds, decision, side, params)
                    .await
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Reconciliation contract after an ambiguous placement: query current
    /// open orders first. If an equivalent order exists, adopt it instead
    /// of placing a duplicate; otherwise retry exactly once.
    async fn reconcile_entry(
        &self,
        agent: &AgentConfig,
        creds: &ExchangeCredentials,
        decision: &Decision,
        side: OrderSide,
        params: &EntryParams,
    ) -> Result<ExecutionOutcome, CycleError> {
        let open = self
            .exchange
            .fetch_open_orders(creds, &agent.symbol)
            .await
            .map_err(|e| {
                CycleError::ExecutionAmbiguous(format!("reconciliation query failed: {e}"))
            })?;

        if let Some(existing) = open
            .iter()
            .find(|o| o.side == side && prices_match(o.price, params.price))
        {
            info!(
                config_id = %agent.config_id,
                order_id = %existing.order_id,
                "Reconciliation found the order was created, adopting it"
            );
            return Ok(ExecutionOutcome::Adopted(order_row(
                agent,
                &existing.order_id,
                side,
                existing.price,
                existing.size,
                params,
                OrderStatus::Open,
                false,
                &decision.rationale,
                None,
            )));
        }

        let ticket = OrderTicket {
            symbol: agent.symbol.clone(),
            side,
            price: params.price,
            size: params.size,
        };
        match self.exchange.place_limit_order(creds, &ticket).await {
            Ok(ack) => Ok(ExecutionOutcome::Placed(order_row(
                agent,
                &ack.order_id,
                side,
                params.price,
                params.size,
                params,
                ack.status,
                false,
                &decision.rationale,
                None,
            ))),
            Err(ExchangeError::Rejected(reason)) => Ok(ExecutionOutcome::Rejected(rejected_row(
                agent, side, params, &reason,
            ))),
            Err(ExchangeError::Ambiguous(detail)) => {
                // Still unconfirmed after the reconciliation check; record
                // the failure rather than risking a duplicate.
                warn!(config_id = %agent.config_id, %detail, "Retry also unconfirmed, recording failure");
                Ok(ExecutionOutcome::Rejected(rejected_row(
                    agent,
                    side,
                    params,
                    &format!("unconfirmed after reconciliation: {detail}"),
                )))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn cancel(
        &self,
        agent: &AgentConfig,
        order_id: &str,
    ) -> Result<ExecutionOutcome, CycleError> {
        if !agent.mode.is_real() {
            let known = self
                .store
                .order_by_id(order_id)?
                .filter(|o| o.is_simulated && o.status == OrderStatus::Open);
            return Ok(match known {
                Some(_) => ExecutionOutcome::Cancelled {
                    order_id: order_id.to_string(),
                },
                None => ExecutionOutcome::CancelFailed {
                    order_id: order_id.to_string(),
                    reason: "no open simulated order with that id".to_string(),
                },
            });
        }

        let creds = self.credentials(agent)?;
        match self
            .exchange
            .cancel_order(&creds, &agent.symbol, order_id)
            .await
        {
            Ok(()) => Ok(ExecutionOutcome::Cancelled {
                order_id: order_id.to_string(),
            }),
            Err(ExchangeError::Rejected(reason)) => Ok(ExecutionOutcome::CancelFailed {
                order_id: order_id.to_string(),
                reason,
            }),
            Err(ExchangeError::Ambiguous(detail)) => {
                // Did the cancel land? The order being gone from the book
                // is the confirmation.
                let open = self
                    .exchange
                    .fetch_open_orders(&creds, &agent.symbol)
                    .await
                    .map_err(|e| {
                        CycleError::ExecutionAmbiguous(format!(
                            "cancel reconciliation query failed: {e}"
                        ))
                    })?;
                if open.iter().any(|o| o.order_id == order_id) {
                    Ok(ExecutionOutcome::CancelFailed {
                        order_id: order_id.to_string(),
                        reason: format!("unconfirmed cancel: {detail}"),
                    })
                } else {
                    Ok(ExecutionOutcome::Cancelled {
                        order_id: order_id.to_string(),
                    })
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    fn paper_close(
        &self,
        agent: &AgentConfig,
        snapshot: &MarketSnapshot,
        decision: &Decision,
        params: &cadence_models::CloseParams,
    ) -> ExecutionOutcome {
        let Some(position) = &snapshot.position else {
            return ExecutionOutcome::NothingToClose;
        };
        if let Some(side) = params.side {
            if side != position.side {
                return ExecutionOutcome::NothingToClose;
            }
        }

        let close_side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let size = match params.size {
            Some(size) if size > Decimal::ZERO && size < position.size => size,
            _ => position.size,
        };

        // Paper fills settle at the snapshot price; no slippage model.
        let order = Order {
            order_id: short_id("ST"),
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            side: close_side,
            price: snapshot.price,
            size,
            stop_loss: None,
            take_profit: None,
            status: OrderStatus::Filled,
            is_simulated: true,
            reason: decision.rationale.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
        };
        ExecutionOutcome::Closed(order)
    }

    async fn real_close(
        &self,
        agent: &AgentConfig,
        snapshot: &MarketSnapshot,
        decision: &Decision,
        params: &cadence_models::CloseParams,
    ) -> Result<ExecutionOutcome, CycleError> {
        let creds = self.credentials(agent)?;
        let request = CloseRequest {
            symbol: agent.symbol.clone(),
            side: params.side,
            price: params.price,
            size: params.size,
        };

        let ack = match self.exchange.close_position(&creds, &request).await {
            Ok(Some(ack)) => ack,
            Ok(None) => return Ok(ExecutionOutcome::NothingToClose),
            Err(ExchangeError::Rejected(reason)) => {
                let side = close_side_hint(snapshot);
                return Ok(ExecutionOutcome::Rejected(Order {
                    order_id: short_id("REJ"),
                    config_id: agent.config_id.clone(),
                    symbol: agent.symbol.clone(),
                    side,
                    price: params.price.unwrap_or(snapshot.price),
                    size: params.size.unwrap_or(Decimal::ZERO),
                    stop_loss: None,
                    take_profit: None,
                    status: OrderStatus::Rejected,
                    is_simulated: false,
                    reason,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    expires_at: None,
                }));
            }
            Err(ExchangeError::Ambiguous(detail)) => {
                return Err(CycleError::ExecutionAmbiguous(format!(
                    "close unconfirmed: {detail}"
                )));
            }
            Err(other) => return Err(other.into()),
        };

        let side = close_side_hint(snapshot);
        let size = params
            .size
            .or_else(|| snapshot.position.as_ref().map(|p| p.size))
            .unwrap_or(Decimal::ZERO);
        Ok(ExecutionOutcome::Closed(Order {
            order_id: ack.order_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            side,
            price: params.price.unwrap_or(snapshot.price),
            size,
            stop_loss: None,
            take_profit: None,
            status: ack.status,
            is_simulated: false,
            reason: decision.rationale.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
        }))
    }

    fn credentials(&self, agent: &AgentConfig) -> Result<ExchangeCredentials, CycleError> {
        let global = self.settings.global_credentials();
        agent.exchange_credentials(global.as_ref()).ok_or_else(|| {
            CycleError::DataUnavailable(format!("no exchange credentials for {}", agent.config_id))
        })
    }
}

/// Build the simulated order for a paper entry. A limit that crosses the
/// snapshot price fills immediately at that price; otherwise the order
/// rests with a validity window.
fn paper_entry(
    agent: &AgentConfig,
    snapshot: &MarketSnapshot,
    decision: &Decision,
    side: OrderSide,
    params: &EntryParams,
) -> Order {
    let crossing = match side {
        OrderSide::Buy => params.price >= snapshot.price,
        OrderSide::Sell => params.price <= snapshot.price,
    };
    let (status, price, expires_at) = if crossing {
        (OrderStatus::Filled, snapshot.price, None)
    } else {
        let hours = params.valid_hours.unwrap_or(DEFAULT_VALID_HOURS).max(1);
        (
            OrderStatus::Open,
            params.price,
            Some(Utc::now() + Duration::hours(hours)),
        )
    };

    order_row(
        agent,
        &short_id("ST"),
        side,
        price,
        params.size,
        params,
        status,
        true,
        &decision.rationale,
        expires_at,
    )
}

#[allow(clippy::too_many_arguments)]
fn order_row(
    agent: &AgentConfig,
    order_id: &str,
    side: OrderSide,
    price: Decimal,
    size: Decimal,
    params: &EntryParams,
    status: OrderStatus,
    is_simulated: bool,
    reason: &str,
    expires_at: Option<chrono::DateTime<Utc>>,
) -> Order {
    let now = Utc::now();
    Order {
        order_id: order_id.to_string(),
        config_id: agent.config_id.clone(),
        symbol: agent.symbol.clone(),
        side,
        price,
        size,
        stop_loss: params.stop_loss,
        take_profit: params.take_profit,
        status,
        is_simulated,
        reason: reason.to_string(),
        created_at: now,
        updated_at: now,
        expires_at,
    }
}

fn rejected_row(agent: &AgentConfig, side: OrderSide, params: &EntryParams, reason: &str) -> Order {
    let now = Utc::now();
    Order {
        order_id: short_id("REJ"),
        config_id: agent.config_id.clone(),
        symbol: agent.symbol.clone(),
        side,
        price: params.price,
        size: params.size,
        stop_loss: params.stop_loss,
        take_profit: params.take_profit,
        status: OrderStatus::Rejected,
        is_simulated: false,
        reason: reason.to_string(),
        created_at: now,
        updated_at: now,
        expires_at: None,
    }
}

fn close_side_hint(snapshot: &MarketSnapshot) -> OrderSide {
    match snapshot.position.as_ref().map(|p| p.side) {
        Some(PositionSide::Short) => OrderSide::Buy,
        _ => OrderSide::Sell,
    }
}

fn short_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..6])
}

fn prices_match(existing: Decimal, new: Decimal) -> bool {
    if existing <= Decimal::ZERO {
        return false;
    }
    let ratio: Decimal = PRICE_MATCH_RATIO.parse().unwrap_or(Decimal::ZERO);
    ((existing - new).abs() / existing) < ratio
}

fn is_duplicate_entry(open_orders: &[Order], side: OrderSide, price: Decimal) -> bool {
    open_orders
        .iter()
        .any(|o| o.status == OrderStatus::Open && o.side == side && prices_match(o.price, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_market::test_support::{resting_order, MockExchange};
    use cadence_models::{AgentMode, CloseParams, Position};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn agent(mode: AgentMode) -> AgentConfig {
        AgentConfig {
            config_id: "btc-agent-0".to_string(),
            symbol: "BTC/USDT".to_string(),
            mode,
            enabled: true,
            leverage: 20,
            model: "qwen3-max".to_string(),
            api_base: "https://api.example.com/v1".to_string(),
            api_key: "sk".to_string(),
            temperature: 0.5,
            prompt_file: None,
            exchange: None,
            summarizer: None,
        }
    }

    fn snapshot_at(price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTC/USDT".to_string(),
            taken_at: Utc::now(),
            price,
            frames: BTreeMap::new(),
            position: None,
            open_orders: vec![],
            balance: dec!(10000),
            recent_summaries: vec![],
        }
    }

    fn buy(price: Decimal, size: Decimal) -> Decision {
        Decision {
            action: TradeAction::Buy(EntryParams {
                price,
                size,
                stop_loss: Some(price - dec!(1000)),
                take_profit: Some(price + dec!(2000)),
                valid_hours: Some(12),
            }),
            rationale: "test entry".to_string(),
        }
    }

    fn adapter(exchange: Arc<MockExchange>, store: Arc<Store>) -> ExecutionAdapter {
        let settings = ExchangeSettings {
            api_key: Some("k".to_string()),
            api_secret: Some("s".to_string()),
            ..ExchangeSettings::default()
        };
        ExecutionAdapter::new(exchange, store, settings)
    }

    #[tokio::test]
    async fn paper_entry_crossing_fills_at_snapshot_price() {
        let adapter = adapter(
            Arc::new(MockExchange::new()),
            Arc::new(Store::open_in_memory().unwrap()),
        );
        let outcome = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &buy(dec!(64500), dec!(0.1)),
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Placed(order) => {
                assert_eq!(order.status, OrderStatus::Filled);
                assert_eq!(order.price, dec!(64000));
                assert!(order.is_simulated);
                assert!(order.expires_at.is_none());
            }
            other => panic!("expected Placed, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn paper_entry_below_market_rests_with_expiry() {
        let adapter = adapter(
            Arc::new(MockExchange::new()),
            Arc::new(Store::open_in_memory().unwrap()),
        );
        let outcome = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Placed(order) => {
                assert_eq!(order.status, OrderStatus::Open);
                assert_eq!(order.price, dec!(62000));
                assert!(order.expires_at.is_some());
            }
            other => panic!("expected Placed, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn duplicate_entry_is_skipped() {
        let exchange = Arc::new(MockExchange::new());
        let adapter = adapter(exchange.clone(), Arc::new(Store::open_in_memory().unwrap()));

        let mut snapshot = snapshot_at(dec!(64000));
        snapshot.open_orders = vec![Order {
            order_id: "EX-9".to_string(),
            config_id: "btc-agent-0".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: OrderSide::Buy,
            price: dec!(62005), // within 0.1% of 62000
            size: dec!(0.1),
            stop_loss: None,
            take_profit: None,
            status: OrderStatus::Open,
            is_simulated: false,
            reason: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
        }];

        let outcome = adapter
            .apply(
                &agent(AgentMode::Real),
                &snapshot,
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::DuplicateSkipped);
        assert_eq!(exchange.place_calls(), 0);
    }

    #[tokio::test]
    async fn real_rejection_becomes_rejected_row() {
        let exchange = Arc::new(MockExchange::new());
        exchange.queue_place_result(Err(ExchangeError::Rejected(
            "Margin is insufficient (code -2019)".to_string(),
        )));
        let adapter = adapter(exchange, Arc::new(Store::open_in_memory().unwrap()));

        let outcome = adapter
            .apply(
                &agent(AgentMode::Real),
                &snapshot_at(dec!(64000)),
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Rejected(order) => {
                assert_eq!(order.status, OrderStatus::Rejected);
                assert!(order.reason.contains("insufficient"));
                assert!(!order.is_simulated);
            }
            other => panic!("expected Rejected, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn ambiguous_with_no_order_on_book_retries_once() {
        let exchange = Arc::new(MockExchange::new());
        exchange.queue_place_result(Err(ExchangeError::Ambiguous("timeout".to_string())));
        // Book is empty, so reconciliation finds nothing and the retry runs
        // with the default success result.
        let adapter = adapter(exchange.clone(), Arc::new(Store::open_in_memory().unwrap()));

        let outcome = adapter
            .apply(
                &agent(AgentMode::Real),
                &snapshot_at(dec!(64000)),
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Placed(_)));
        assert_eq!(exchange.place_calls(), 2);
    }

    #[tokio::test]
    async fn ambiguous_with_order_on_book_adopts_without_retry() {
        let exchange = Arc::new(MockExchange::new());
        exchange.queue_place_result(Err(ExchangeError::Ambiguous("timeout".to_string())));
        exchange.set_open_orders(vec![resting_order(
            "EX-42",
            OrderSide::Buy,
            dec!(62000),
            dec!(0.1),
        )]);
        let adapter = adapter(exchange.clone(), Arc::new(Store::open_in_memory().unwrap()));

        let outcome = adapter
            .apply(
                &agent(AgentMode::Real),
                &snapshot_at(dec!(64000)),
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Adopted(order) => {
                assert_eq!(order.order_id, "EX-42");
                assert_eq!(order.status, OrderStatus::Open);
            }
            other => panic!("expected Adopted, got {}", other.label()),
        }
        assert_eq!(exchange.place_calls(), 1, "no duplicate placement");
    }

    #[tokio::test]
    async fn twice_ambiguous_records_failure() {
        let exchange = Arc::new(MockExchange::new());
        exchange.queue_place_result(Err(ExchangeError::Ambiguous("timeout 1".to_string())));
        exchange.queue_place_result(Err(ExchangeError::Ambiguous("timeout 2".to_string())));
        let adapter = adapter(exchange.clone(), Arc::new(Store::open_in_memory().unwrap()));

        let outcome = adapter
            .apply(
                &agent(AgentMode::Real),
                &snapshot_at(dec!(64000)),
                &buy(dec!(62000), dec!(0.1)),
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Rejected(order) => {
                assert!(order.reason.contains("unconfirmed after reconciliation"));
            }
            other => panic!("expected Rejected, got {}", other.label()),
        }
        assert_eq!(exchange.place_calls(), 2);
    }

    #[tokio::test]
    async fn paper_cancel_known_and_unknown() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        store
            .insert_order(&Order {
                order_id: "ST-live".to_string(),
                config_id: "btc-agent-0".to_string(),
                symbol: "BTC/USDT".to_string(),
                side: OrderSide::Buy,
                price: dec!(62000),
                size: dec!(0.1),
                stop_loss: None,
                take_profit: None,
                status: OrderStatus::Open,
                is_simulated: true,
                reason: String::new(),
                created_at: now,
                updated_at: now,
                expires_at: None,
            })
            .unwrap();
        let adapter = adapter(Arc::new(MockExchange::new()), store);

        let cancel = |id: &str| Decision {
            action: TradeAction::Cancel(cadence_models::CancelParams {
                order_id: id.to_string(),
            }),
            rationale: "stale".to_string(),
        };

        let ok = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &cancel("ST-live"),
            )
            .await
            .unwrap();
        assert_eq!(
            ok,
            ExecutionOutcome::Cancelled {
                order_id: "ST-live".to_string()
            }
        );

        let missing = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &cancel("ST-ghost"),
            )
            .await
            .unwrap();
        assert!(matches!(missing, ExecutionOutcome::CancelFailed { .. }));
    }

    #[tokio::test]
    async fn paper_close_nets_position_at_snapshot_price() {
        let adapter = adapter(
            Arc::new(MockExchange::new()),
            Arc::new(Store::open_in_memory().unwrap()),
        );
        let mut snapshot = snapshot_at(dec!(64000));
        snapshot.position = Some(Position {
            symbol: "BTC/USDT".to_string(),
            side: PositionSide::Long,
            size: dec!(0.5),
            entry_price: dec!(63000),
            unrealized_pnl: None,
        });

        let close = Decision {
            action: TradeAction::Close(CloseParams::default()),
            rationale: "take profit".to_string(),
        };
        let outcome = adapter
            .apply(&agent(AgentMode::Strategy), &snapshot, &close)
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Closed(order) => {
                assert_eq!(order.side, OrderSide::Sell);
                assert_eq!(order.size, dec!(0.5));
                assert_eq!(order.price, dec!(64000));
                assert_eq!(order.status, OrderStatus::Filled);
            }
            other => panic!("expected Closed, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn paper_close_without_position_is_noop() {
        let adapter = adapter(
            Arc::new(MockExchange::new()),
            Arc::new(Store::open_in_memory().unwrap()),
        );
        let close = Decision {
            action: TradeAction::Close(CloseParams::default()),
            rationale: "flat".to_string(),
        };
        let outcome = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &close,
            )
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::NothingToClose);
    }

    #[tokio::test]
    async fn no_action_has_no_side_effects() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(Store::open_in_memory().unwrap());
        let adapter = adapter(exchange.clone(), store.clone());

        let decision = Decision {
            action: TradeAction::NoAction,
            rationale: "no edge".to_string(),
        };
        let outcome = adapter
            .apply(
                &agent(AgentMode::Strategy),
                &snapshot_at(dec!(64000)),
                &decision,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ExecutionOutcome::NoAction);
        assert_eq!(exchange.place_calls(), 0);
        assert_eq!(store.order_count().unwrap(), 0);
    }
}
