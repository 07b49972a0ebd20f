use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use cadence_models::{
    AgentSummary, AnalysisLog, CycleStatus, Order, OrderSide, OrderStatus, Position, PositionSide,
    TokenUsage,
};

use crate::error::StoreError;
use crate::schema::STORE_DDL;

/// Synchronous SQLite accessor owning the connection.
///
/// This is the single durable source of truth: orders, analysis logs,
/// summaries and token usage all live here. Writes are scoped per-record
/// operations; readers (the snapshot provider, the dashboard layer) see
/// committed rows only.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at `path`. Applies the schema and enables
    /// WAL so snapshot reads do not block cycle writes.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(STORE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_DDL)?;
        Ok(Self { conn })
    }

    // --- orders ---

    pub fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO orders \
             (order_id, config_id, symbol, side, price, size, stop_loss, take_profit, \
              status, is_simulated, reason, created_at, updated_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                order.order_id,
                order.config_id,
                order.symbol,
                order.side.as_str(),
                order.price.to_string(),
                order.size.to_string(),
                order.stop_loss.map(|d| d.to_string()),
                order.take_profit.map(|d| d.to_string()),
                order.status.as_str(),
                order.is_simulated,
                order.reason,
                order.created_at,
                order.updated_at,
                order.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Set an order's status. Returns the number of rows touched (0 when
    /// the order id is unknown).
    pub fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<usize, StoreError> {
        let touched = self.conn.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3",
            params![status.as_str(), Utc::now(), order_id],
        )?;
        Ok(touched)
    }

    pub fn order_by_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ORDER_SELECT} WHERE order_id = ?1"))?;
        let mut rows = stmt
            .query_map(params![order_id], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.pop())
    }

    /// Open, unexpired orders owned by one agent.
    pub fn open_orders(&self, config_id: &str, now: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ORDER_SELECT} WHERE config_id = ?1 AND status = 'OPEN' \
             AND (expires_at IS NULL OR expires_at > ?2) ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map(params![config_id, now], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Open, unexpired simulated orders across all agents on a symbol.
    /// Feeds the paper snapshot so that same-tick agents observe each
    /// other's resting orders.
    pub fn open_simulated_orders(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ORDER_SELECT} WHERE symbol = ?1 AND is_simulated = 1 AND status = 'OPEN' \
             AND (expires_at IS NULL OR expires_at > ?2) ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map(params![symbol, now], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn recent_orders(&self, config_id: &str, limit: usize) -> Result<Vec<Order>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ORDER_SELECT} WHERE config_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![config_id, limit], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Cancel simulated resting orders whose validity window has passed.
    /// Returns the number of orders expired.
    pub fn expire_resting_orders(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let touched = self.conn.execute(
            "UPDATE orders SET status = 'CANCELLED', updated_at = ?1 \
             WHERE status = 'OPEN' AND is_simulated = 1 \
             AND expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        Ok(touched)
    }

    /// Net simulated position on a symbol, derived from filled simulated
    /// orders. This is what a later agent in the same tick observes after
    /// an earlier agent's paper fill.
    pub fn simulated_position(&self, symbol: &str) -> Result<Option<Position>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ORDER_SELECT} WHERE symbol = ?1 AND is_simulated = 1 AND status = 'FILLED' \
             ORDER BY created_at"
        ))?;
        let fills = stmt
            .query_map(params![symbol], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut net = Decimal::ZERO;
        let mut cost = Decimal::ZERO;
        for fill in &fills {
            let signed = fill.signed_size();
            net += signed;
            cost += fill.price * signed;
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
            unrealized_pnl: None,
        }))
    }

    pub fn order_count(&self) -> Result<usize, StoreError> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count)
    }

    // --- analysis logs ---

    /// Keyed by cycle id; re-inserting replaces the row, which lets a
    /// failed FINALIZE overwrite a completed record with the failure.
    pub fn insert_analysis_log(&self, log: &AnalysisLog) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO analysis_logs \
             (cycle_id, config_id, symbol, action, rationale, status, failure_reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                log.cycle_id.to_string(),
                log.config_id,
                log.symbol,
                log.action,
                log.rationale,
                log.status.as_str(),
                log.failure_reason,
                log.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn recent_analysis_logs(
        &self,
        config_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisLog>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cycle_id, config_id, symbol, action, rationale, status, failure_reason, \
             created_at FROM analysis_logs WHERE config_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![config_id, limit], |row| {
                Ok(AnalysisLog {
                    cycle_id: uuid_column(row, 0)?,
                    config_id: row.get(1)?,
                    symbol: row.get(2)?,
                    action: row.get(3)?,
                    rationale: row.get(4)?,
                    status: cycle_status_column(row, 5)?,
                    failure_reason: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn analysis_log_count(&self) -> Result<usize, StoreError> {
        let count: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM analysis_logs", [], |row| row.get(0))?;
        Ok(count)
    }

    // --- summaries ---

    pub fn insert_summary(&self, summary: &AgentSummary) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO summaries (cycle_id, config_id, symbol, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                summary.cycle_id.to_string(),
                summary.config_id,
                summary.symbol,
                summary.content,
                summary.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent summaries for one agent, newest first.
    pub fn recent_summaries(
        &self,
        config_id: &str,
        limit: usize,
    ) -> Result<Vec<AgentSummary>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cycle_id, config_id, symbol, content, created_at FROM summaries \
             WHERE config_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![config_id, limit], |row| {
                Ok(AgentSummary {
                    cycle_id: uuid_column(row, 0)?,
                    config_id: row.get(1)?,
                    symbol: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- token usage ---

    pub fn insert_token_usage(&self, usage: &TokenUsage) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO token_usage \
             (config_id, symbol, model, prompt_tokens, completion_tokens, total_tokens, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                usage.config_id,
                usage.symbol,
                usage.model,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens(),
                usage.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn token_usage_rows(&self, config_id: &str) -> Result<Vec<TokenUsage>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT config_id, symbol, model, prompt_tokens, completion_tokens, created_at \
             FROM token_usage WHERE config_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![config_id], |row| {
                Ok(TokenUsage {
                    config_id: row.get(0)?,
                    symbol: row.get(1)?,
                    model: row.get(2)?,
                    prompt_tokens: row.get(3)?,
                    completion_tokens: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total (prompt, completion) tokens spent by one agent.
    pub fn token_usage_totals(&self, config_id: &str) -> Result<(u64, u64), StoreError> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(completion_tokens), 0) \
             FROM token_usage WHERE config_id = ?1",
            params![config_id],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?)),
        )?;
        Ok(totals)
    }
}

const ORDER_SELECT: &str = "SELECT order_id, config_id, symbol, side, price, size, stop_loss, \
                            take_profit, status, is_simulated, reason, created_at, updated_at, \
                            expires_at FROM orders";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        order_id: row.get(0)?,
        config_id: row.get(1)?,
        symbol: row.get(2)?,
        side: side_column(row, 3)?,
        price: decimal_column(row, 4)?,
        size: decimal_column(row, 5)?,
        stop_loss: optional_decimal_column(row, 6)?,
        take_profit: optional_decimal_column(row, 7)?,
        status: status_column(row, 8)?,
        is_simulated: row.get(9)?,
        reason: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        expires_at: row.get(13)?,
    })
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn side_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OrderSide> {
    let raw: String = row.get(idx)?;
    OrderSide::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(format!("unknown side: {raw}")),
        )
    })
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OrderStatus> {
    let raw: String = row.get(idx)?;
    OrderStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(format!("unknown status: {raw}")),
        )
    })
}

fn cycle_status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<CycleStatus> {
    let raw: String = row.get(idx)?;
    CycleStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(format!("unknown cycle status: {raw}")),
        )
    })
}
