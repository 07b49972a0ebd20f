use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use cadence_models::{
    AgentConfig, AgentMode, ExchangeSettings, MarketSnapshot, Order, OrderStatus, Position,
    PositionSide, Timeframe,
};
use cadence_store::Store;

use crate::error::MarketError;
use crate::exchange::ExchangeApi;
use crate::indicators::compute_frame;

/// Builds the per-cycle `MarketSnapshot`.
///
/// Pure with respect to core state: it reads the exchange and the store
/// and never writes. The primary timeframe's candles are the only hard
/// requirement; everything else degrades to absent fields so a thin data
/// outage does not abort the cycle.
pub struct SnapshotProvider {
    exchange: Arc<dyn ExchangeApi>,
    store: Arc<Store>,
    settings: ExchangeSettings,
    context_summaries: usize,
}

impl SnapshotProvider {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        store: Arc<Store>,
        settings: ExchangeSettings,
        context_summaries: usize,
    ) -> Self {
        Self {
            exchange,
            store,
            settings,
            context_summaries,
        }
    }

    pub async fn build(&self, agent: &AgentConfig) -> Result<MarketSnapshot, MarketError> {
        let taken_at = Utc::now();
        let timeframes = Timeframe::set_for(agent.mode);

        let mut frames = BTreeMap::new();
        let mut price: Option<Decimal> = None;

        for (i, timeframe) in timeframes.iter().enumerate() {
            let primary = i == 0;
            match self
                .exchange
                .fetch_candles(&agent.symbol, *timeframe, self.settings.candle_limit)
                .await
            {
                Ok(candles) if !candles.is_empty() => {
                    if primary {
                        price = candles.last().map(|c| c.close);
                    }
                    frames.insert(*timeframe, compute_frame(&candles));
                }
                Ok(_) if primary => {
                    return Err(MarketError::MissingData(format!(
                        "empty primary candle window for {} {}",
                        agent.symbol,
                        timeframe.as_str()
                    )));
                }
                Err(e) if primary => {
                    return Err(MarketError::MissingData(format!(
                        "primary candle window for {} {}: {e}",
                        agent.symbol,
                        timeframe.as_str()
                    )));
                }
                Ok(_) => {
                    debug!(symbol = %agent.symbol, timeframe = timeframe.as_str(), "Empty candle window, frame omitted");
                }
                Err(e) => {
                    warn!(symbol = %agent.symbol, timeframe = timeframe.as_str(), error = %e, "Candle fetch failed, frame omitted");
                }
            }
        }

        let price = price.ok_or_else(|| {
            MarketError::MissingData(format!("no primary price for {}", agent.symbol))
        })?;

        let (balance, position, open_orders) = match agent.mode {
            AgentMode::Real => self.real_account_state(agent).await?,
            AgentMode::Strategy => self.paper_account_state(agent, price)?,
        };

        let recent_summaries = self
            .store
            .recent_summaries(&agent.config_id, self.context_summaries)
            .await?;

        Ok(MarketSnapshot {
            symbol: agent.symbol.clone(),
            taken_at,
            price,
            frames,
            position,
            open_orders,
            balance,
            recent_summaries,
        })
    }

    /// Live account state. Balance, position and order fetches degrade to
    /// empty values with a warning; only missing credentials are fatal.
    async fn real_account_state(
        &self,
        agent: &AgentConfig,
    ) -> Result<(Decimal, Option<Position>, Vec<Order>), MarketError> {
        let global = self.settings.global_credentials();
        let creds = agent.exchange_credentials(global.as_ref()).ok_or_else(|| {
            MarketError::MissingData(format!("no exchange credentials for {}", agent.config_id))
        })?;

        let balance = match self.exchange.fetch_balance(&creds).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(config_id = %agent.config_id, error = %e, "Balance fetch failed");
                Decimal::ZERO
            }
        };

        let position = match self.exchange.fetch_position(&creds, &agent.symbol).await {
            Ok(position) => position,
            Err(e) => {
                warn!(config_id = %agent.config_id, error = %e, "Position fetch failed");
                None
            }
        };

        let now = Utc::now();
        let open_orders = match self.exchange.fetch_open_orders(&creds, &agent.symbol).await {
            Ok(orders) => orders
                .into_iter()
                .map(|o| Order {
                    order_id: o.order_id,
                    config_id: agent.config_id.clone(),
                    symbol: agent.symbol.clone(),
                    side: o.side,
                    price: o.price,
                    size: o.size,
                    stop_loss: None,
                    take_profit: None,
                    status: OrderStatus::Open,
                    is_simulated: false,
                    reason: String::new(),
                    created_at: now,
                    updated_at: now,
                    expires_at: None,
                })
                .collect(),
            Err(e) => {
                warn!(config_id = %agent.config_id, error = %e, "Open order fetch failed");
                Vec::new()
            }
        };

        Ok((balance, position, open_orders))
    }

    /// Simulated account state, derived entirely from the store. The
    /// position nets all agents' paper fills on the symbol, which is what
    /// makes an earlier agent's fill visible to a later agent in the same
    /// tick.
    fn paper_account_state(
        &self,
        agent: &AgentConfig,
        price: Decimal,
    ) -> Result<(Decimal, Option<Position>, Vec<Order>), MarketError> {
        let now = Utc::now();
        let open_orders = self.store.open_simulated_orders(&agent.symbol, now)?;

        let position = self.store.simulated_position(&agent.symbol)?.map(|p| {
            let pnl = match p.side {
                PositionSide::Long => (price - p.entry_price) * p.size,
                PositionSide::Short => (p.entry_price - price) * p.size,
            };
            Position {
                unrealized_pnl: Some(pnl),
                ..p
            }
        });

        Ok((self.settings.paper_balance, position, open_orders))
    }
}
