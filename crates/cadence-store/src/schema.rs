/// DDL for the cadence store. Applied on every open; all statements are
/// idempotent.
///
/// Conventions:
/// - timestamps are RFC 3339 TEXT in UTC
/// - prices/sizes are decimal strings (exact, no float drift)
/// - `orders.is_simulated` mirrors the owning agent's mode
pub const STORE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS orders (
    order_id     TEXT PRIMARY KEY,
    config_id    TEXT NOT NULL,
    symbol       TEXT NOT NULL,
    side         TEXT NOT NULL,
    price        TEXT NOT NULL,
    size         TEXT NOT NULL,
    stop_loss    TEXT,
    take_profit  TEXT,
    status       TEXT NOT NULL,
    is_simulated INTEGER NOT NULL,
    reason       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    expires_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_orders_config ON orders(config_id);
CREATE INDEX IF NOT EXISTS idx_orders_symbol_status ON orders(symbol, status);

CREATE TABLE IF NOT EXISTS analysis_logs (
    cycle_id       TEXT PRIMARY KEY,
    config_id      TEXT NOT NULL,
    symbol         TEXT NOT NULL,
    action         TEXT NOT NULL,
    rationale      TEXT NOT NULL,
    status         TEXT NOT NULL,
    failure_reason TEXT,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_config ON analysis_logs(config_id);

CREATE TABLE IF NOT EXISTS summaries (
    cycle_id   TEXT PRIMARY KEY,
    config_id  TEXT NOT NULL,
    symbol     TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_config ON summaries(config_id);

CREATE TABLE IF NOT EXISTS token_usage (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    config_id         TEXT NOT NULL,
    symbol            TEXT NOT NULL,
    model             TEXT NOT NULL,
    prompt_tokens     INTEGER NOT NULL,
    completion_tokens INTEGER NOT NULL,
    total_tokens      INTEGER NOT NULL,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_config ON token_usage(config_id);
";
