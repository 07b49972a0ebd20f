use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, ExchangeCredentials};

/// Top-level configuration for cadence.
///
/// The scheduler re-reads this at the start of every tick, so edits to the
/// file (including the agent list and the enable flag) take effect at the
/// next tick boundary without a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub exchange: ExchangeSettings,
    #[serde(default)]
    pub summarizer: SummarizerSettings,
    /// Ordered agent list. Order matters: agents sharing a symbol execute
    /// in this order within a tick.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentConfig>,
}

/// Heartbeat timing and concurrency bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Master switch, honored per tick.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base tick interval; REAL agents run on every tick.
    #[serde(default = "default_base_interval")]
    pub base_interval_minutes: u64,
    /// STRATEGY agents run only on ticks aligned to this boundary.
    #[serde(default = "default_coarse_interval")]
    pub coarse_interval_minutes: u64,
    /// How many symbol groups may run concurrently.
    #[serde(default = "default_workers")]
    pub max_concurrent_symbols: usize,
    /// Hard deadline for a single agent cycle.
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_seconds: u64,
    /// Offset after the slot boundary before the tick fires, so candle data
    /// for the just-closed bar is available.
    #[serde(default = "default_start_delay")]
    pub start_delay_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            base_interval_minutes: default_base_interval(),
            coarse_interval_minutes: default_coarse_interval(),
            max_concurrent_symbols: default_workers(),
            cycle_timeout_seconds: default_cycle_timeout(),
            start_delay_seconds: default_start_delay(),
        }
    }
}

/// Decision pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Re-prompts allowed when the reasoning service fails to produce a
    /// structured action. The total attempt count is `decide_retries + 1`.
    #[serde(default = "default_decide_retries")]
    pub decide_retries: u32,
    /// Per-call timeout for the reasoning service.
    #[serde(default = "default_reasoning_timeout")]
    pub reasoning_timeout_seconds: u64,
    /// How many stored summaries to feed back as previous context.
    #[serde(default = "default_context_summaries")]
    pub context_summaries: usize,
    /// Directory searched for agent prompt template files.
    #[serde(default)]
    pub prompt_dir: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            decide_retries: default_decide_retries(),
            reasoning_timeout_seconds: default_reasoning_timeout(),
            context_summaries: default_context_summaries(),
            prompt_dir: None,
        }
    }
}

/// Durable store location and hot-cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSettings {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_hot_capacity")]
    pub hot_cache_capacity: u64,
    #[serde(default = "default_hot_ttl")]
    pub hot_cache_ttl_seconds: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            hot_cache_capacity: default_hot_capacity(),
            hot_cache_ttl_seconds: default_hot_ttl(),
        }
    }
}

/// Exchange endpoint, global credentials and paper-trading defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeSettings {
    #[serde(default = "default_exchange_base")]
    pub api_base: String,
    /// Global credential fallback for agents without their own pair.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Candles fetched per timeframe for snapshots.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_exchange_timeout")]
    pub request_timeout_seconds: u64,
    /// Account balance assumed for STRATEGY agents.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

impl ExchangeSettings {
    pub fn global_credentials(&self) -> Option<ExchangeCredentials> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some(ExchangeCredentials {
                api_key: key.clone(),
                api_secret: secret.clone(),
            }),
            _ => None,
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_base: default_exchange_base(),
            api_key: None,
            api_secret: None,
            recv_window_ms: default_recv_window(),
            candle_limit: default_candle_limit(),
            request_timeout_seconds: default_exchange_timeout(),
            paper_balance: default_paper_balance(),
        }
    }
}

/// Summarizer queue sizing. Model selection is per agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizerSettings {
    #[serde(default = "default_summarizer_workers")]
    pub workers: usize,
    /// Backpressure bound: jobs past this are dropped, never blocking the
    /// decision path.
    #[serde(default = "default_summarizer_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_summarizer_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            workers: default_summarizer_workers(),
            queue_capacity: default_summarizer_capacity(),
            request_timeout_seconds: default_summarizer_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_base_interval() -> u64 {
    15
}
fn default_coarse_interval() -> u64 {
    60
}
fn default_workers() -> usize {
    5
}
fn default_cycle_timeout() -> u64 {
    300
}
fn default_start_delay() -> u64 {
    10
}
fn default_decide_retries() -> u32 {
    2
}
fn default_reasoning_timeout() -> u64 {
    120
}
fn default_context_summaries() -> usize {
    4
}
fn default_sqlite_path() -> String {
    "data/cadence.db".to_string()
}
fn default_hot_capacity() -> u64 {
    1024
}
fn default_hot_ttl() -> u64 {
    60
}
fn default_exchange_base() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_recv_window() -> u64 {
    60_000
}
fn default_candle_limit() -> usize {
    120
}
fn default_exchange_timeout() -> u64 {
    30
}
fn default_paper_balance() -> Decimal {
    Decimal::from(10_000)
}
fn default_summarizer_workers() -> usize {
    2
}
fn default_summarizer_capacity() -> usize {
    32
}
fn default_summarizer_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentMode;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CadenceConfig = toml::from_str("").unwrap();
        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.base_interval_minutes, 15);
        assert_eq!(config.scheduler.coarse_interval_minutes, 60);
        assert_eq!(config.engine.decide_retries, 2);
        assert_eq!(config.store.sqlite_path, "data/cadence.db");
        assert_eq!(config.exchange.paper_balance, Decimal::from(10_000));
        assert!(config.agents.is_empty());
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[scheduler]
base_interval_minutes = 15
coarse_interval_minutes = 60
max_concurrent_symbols = 3

[engine]
decide_retries = 1
prompt_dir = "prompts"

[store]
sqlite_path = "/tmp/cadence_test.db"

[exchange]
api_base = "https://fapi.binance.com"
api_key = "global-key"
api_secret = "global-secret"

[[agents]]
config_id = "btc-strategy-0"
symbol = "BTC/USDT"
mode = "STRATEGY"
model = "qwen3-max"
api_base = "https://api.example.com/v1"
api_key = "sk-a"

[[agents]]
config_id = "eth-real-0"
symbol = "ETH/USDT"
mode = "REAL"
enabled = false
leverage = 10
model = "gpt-4o"
api_base = "https://api.example.com/v1"
api_key = "sk-b"

[agents.summarizer]
model = "gpt-4o-mini"
"#;
        let config: CadenceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_concurrent_symbols, 3);
        assert_eq!(config.engine.decide_retries, 1);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].mode, AgentMode::Strategy);
        assert!(!config.agents[1].enabled);
        assert_eq!(config.agents[1].leverage, 10);
        assert_eq!(
            config.agents[1]
                .summarizer
                .as_ref()
                .unwrap()
                .model
                .as_deref(),
            Some("gpt-4o-mini")
        );
        let creds = config.exchange.global_credentials().unwrap();
        assert_eq!(creds.api_key, "global-key");
    }

    #[test]
    fn roundtrip_config() {
        let config: CadenceConfig = toml::from_str("").unwrap();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CadenceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_credentials_means_no_global_pair() {
        let config: CadenceConfig = toml::from_str("[exchange]\napi_key = \"k\"").unwrap();
        assert!(config.exchange.global_credentials().is_none());
    }
}
