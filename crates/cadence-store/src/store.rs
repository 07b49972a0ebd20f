use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use cadence_models::{
    AgentSummary, AnalysisLog, Order, OrderStatus, Position, StoreSettings, TokenUsage,
};

use crate::error::StoreError;
use crate::memory::SummaryCache;
use crate::sqlite::SqliteStore;

/// Shared persistence handle: SQLite behind a mutex plus a moka hot cache
/// for summary context reads.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection`
/// is not `Sync`. All operations are scoped single-record writes or reads;
/// callers hold the lock only for the duration of one statement.
pub struct Store {
    sqlite: Mutex<SqliteStore>,
    summaries: SummaryCache,
}

impl Store {
    pub fn open(settings: &StoreSettings) -> Result<Self, StoreError> {
        let sqlite = SqliteStore::open(&settings.sqlite_path)?;
        Ok(Self::with_sqlite(sqlite, settings))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let sqlite = SqliteStore::open_in_memory()?;
        Ok(Self::with_sqlite(sqlite, &StoreSettings::default()))
    }

    fn with_sqlite(sqlite: SqliteStore, settings: &StoreSettings) -> Self {
        Self {
            sqlite: Mutex::new(sqlite),
            summaries: SummaryCache::new(
                settings.hot_cache_capacity,
                Duration::from_secs(settings.hot_cache_ttl_seconds),
            ),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteStore>, StoreError> {
        self.sqlite
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    // --- orders ---

    pub fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.lock()?.insert_order(order)
    }

    pub fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<usize, StoreError> {
        self.lock()?.update_order_status(order_id, status)
    }

    pub fn order_by_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        self.lock()?.order_by_id(order_id)
    }

    pub fn open_orders(&self, config_id: &str, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        self.lock()?.open_orders(config_id, now)
    }

    pub fn open_simulated_orders(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        self.lock()?.open_simulated_orders(symbol, now)
    }

    pub fn recent_orders(&self, config_id: &str, limit: usize) -> Result<Vec<Order>, StoreError> {
        self.lock()?.recent_orders(config_id, limit)
    }

    pub fn expire_resting_orders(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.lock()?.expire_resting_orders(now)
    }

    pub fn simulated_position(&self, symbol: &str) -> Result<Option<Position>, StoreError> {
        self.lock()?.simulated_position(symbol)
    }

    pub fn order_count(&self) -> Result<usize, StoreError> {
        self.lock()?.order_count()
    }

    // --- analysis logs ---

    pub fn insert_analysis_log(&self, log: &AnalysisLog) -> Result<(), StoreError> {
        self.lock()?.insert_analysis_log(log)
    }

    pub fn recent_analysis_logs(
        &self,
        config_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisLog>, StoreError> {
        self.lock()?.recent_analysis_logs(config_id, limit)
    }

    pub fn analysis_log_count(&self) -> Result<usize, StoreError> {
        self.lock()?.analysis_log_count()
    }

    // --- summaries ---

    /// Write a summary and drop the agent's cached context so the next
    /// GATHER sees it.
    pub async fn insert_summary(&self, summary: &AgentSummary) -> Result<(), StoreError> {
        self.lock()?.insert_summary(summary)?;
        self.summaries.invalidate(&summary.config_id).await;
        Ok(())
    }

    /// Read-through: moka first, SQLite on miss, promoting the result.
    pub async fn recent_summaries(
        &self,
        config_id: &str,
        limit: usize,
    ) -> Result<Vec<AgentSummary>, StoreError> {
        if let Some(cached) = self.summaries.get(config_id).await {
            if cached.len() >= limit {
                return Ok(cached[..limit].to_vec());
            }
            // Cached entry is narrower than requested; fall through.
        }

        let rows = self.lock()?.recent_summaries(config_id, limit)?;
        debug!(config_id, count = rows.len(), "Promoting summaries to hot cache");
        self.summaries
            .insert(config_id.to_string(), rows.clone())
            .await;
        Ok(rows)
    }

    // --- token usage ---

    pub fn insert_token_usage(&self, usage: &TokenUsage) -> Result<(), StoreError> {
        self.lock()?.insert_token_usage(usage)
    }

    pub fn token_usage_rows(&self, config_id: &str) -> Result<Vec<TokenUsage>, StoreError> {
        self.lock()?.token_usage_rows(config_id)
    }

    pub fn token_usage_totals(&self, config_id: &str) -> Result<(u64, u64), StoreError> {
        self.lock()?.token_usage_totals(config_id)
    }

    pub async fn hot_cache_entries(&self) -> u64 {
        self.summaries.entry_count().await
    }
}
