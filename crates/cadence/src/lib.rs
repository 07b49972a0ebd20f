//! cadence - a multi-agent trading heartbeat.
//!
//! A scheduler wakes on a fixed base interval, re-reads the configured
//! agent set, and runs every due agent through a GATHER -> DECIDE -> ACT
//! -> FINALIZE cycle: market snapshot in, structured model decision out,
//! applied against the real exchange or a simulated ledger, with the full
//! audit trail persisted.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use cadence::config_source::{ConfigSource, FileConfigSource};
//! use cadence::scheduler::Scheduler;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let source = FileConfigSource::new("config/cadence.toml");
//! let snapshot = source.load()?;
//! let cancel = CancellationToken::new();
//! let (engine, store) = cadence::bootstrap(&snapshot.config, cancel)?;
//! let scheduler = Scheduler::new(engine, std::sync::Arc::new(source), store);
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config_source;
pub mod scheduler;

pub use config_source::{ConfigError, ConfigSnapshot, ConfigSource, FileConfigSource};
pub use scheduler::{Scheduler, TickSummary};

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use cadence_engine::{
    ChatCompletionsClient, CycleReport, DecisionEngine, ExecutionAdapter, FilePromptSource,
    ReasoningClient, SummarizerQueue,
};
use cadence_market::{BinanceFutures, ExchangeApi, SnapshotProvider};
use cadence_models::CadenceConfig;
use cadence_store::Store;

/// Build the production runtime from configuration: file-backed store,
/// Binance futures client, OpenAI-compatible reasoning client, and the
/// summarizer worker pool tied to `cancel`.
pub fn bootstrap(
    config: &CadenceConfig,
    cancel: CancellationToken,
) -> anyhow::Result<(Arc<DecisionEngine>, Arc<Store>)> {
    let store = Arc::new(Store::open(&config.store)?);
    let exchange: Arc<dyn ExchangeApi> = Arc::new(BinanceFutures::new(&config.exchange)?);
    let reasoning: Arc<dyn ReasoningClient> = Arc::new(ChatCompletionsClient::new(
        Duration::from_secs(config.engine.reasoning_timeout_seconds),
    )?);
    let summarizer =
        SummarizerQueue::spawn(store.clone(), reasoning.clone(), &config.summarizer, cancel);

    let engine = Arc::new(build_engine(
        config,
        store.clone(),
        exchange,
        reasoning,
        Some(summarizer),
    ));
    Ok((engine, store))
}

/// Assemble a `DecisionEngine` from its collaborators. Tests inject mock
/// exchange/reasoning implementations here; `bootstrap` passes the real
/// ones.
pub fn build_engine(
    config: &CadenceConfig,
    store: Arc<Store>,
    exchange: Arc<dyn ExchangeApi>,
    reasoning: Arc<dyn ReasoningClient>,
    summarizer: Option<SummarizerQueue>,
) -> DecisionEngine {
    let snapshots = Arc::new(SnapshotProvider::new(
        exchange.clone(),
        store.clone(),
        config.exchange.clone(),
        config.engine.context_summaries,
    ));
    let execution = ExecutionAdapter::new(exchange, store.clone(), config.exchange.clone());
    let prompts = Arc::new(FilePromptSource::new(config.engine.prompt_dir.clone()));

    DecisionEngine::new(
        snapshots,
        reasoning,
        execution,
        store,
        prompts,
        summarizer,
        config.engine.clone(),
    )
}

/// Force-run one agent outside its normal cadence. Reuses the exact same
/// decision pipeline as the scheduler; there is no separate path.
pub async fn run_agent_once(
    engine: &DecisionEngine,
    config: &CadenceConfig,
    config_id: &str,
) -> anyhow::Result<CycleReport> {
    let agent = config
        .agents
        .iter()
        .find(|a| a.config_id == config_id)
        .ok_or_else(|| anyhow!("no agent with config_id '{config_id}'"))?;
    Ok(engine.run_cycle(agent).await)
}
