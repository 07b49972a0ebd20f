//! Integration tests for the scheduler's tick semantics: per-mode
//! due-ness, same-symbol ordering with read-your-writes visibility,
//! failure isolation, overlap guarding, timeouts, and hot reload.
//!
//! Each test wires the real engine and scheduler against the scriptable
//! mock exchange/reasoning clients and an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use cadence::config_source::StaticConfigSource;
use cadence::scheduler::{plan_tick, Scheduler};
use cadence_engine::test_support::{buy_arguments, decision_reply, MockReasoning};
use cadence_market::test_support::MockExchange;
use cadence_market::ExchangeApi;
use cadence_models::{AgentConfig, AgentMode, CadenceConfig, CycleStatus, SchedulerSettings};
use cadence_store::Store;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

fn agent(config_id: &str, symbol: &str, mode: AgentMode) -> AgentConfig {
    AgentConfig {
        config_id: config_id.to_string(),
        symbol: symbol.to_string(),
        mode,
        enabled: true,
        leverage: 20,
        model: "qwen3-max".to_string(),
        api_base: "https://api.example.com/v1".to_string(),
        api_key: "sk-test".to_string(),
        temperature: 0.5,
        prompt_file: None,
        exchange: None,
        summarizer: None,
    }
}

fn config_with(agents: Vec<AgentConfig>) -> CadenceConfig {
    CadenceConfig {
        agents,
        ..CadenceConfig::default()
    }
}

/// Wire a scheduler over mocks and an in-memory store.
fn world(
    config: CadenceConfig,
    reasoning: Arc<MockReasoning>,
    exchange: Arc<MockExchange>,
) -> (Scheduler, Arc<Store>, Arc<StaticConfigSource>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let exchange: Arc<dyn ExchangeApi> = exchange;
    let engine = Arc::new(cadence::build_engine(
        &config,
        store.clone(),
        exchange,
        reasoning,
        None,
    ));
    let source = Arc::new(StaticConfigSource::new(config));
    let scheduler = Scheduler::new(engine, source.clone(), store.clone());
    (scheduler, store, source)
}

// Scenario: agents [BTC/STRATEGY, ETH/REAL], ticks 09:00..10:00 at 15m.
// ETH runs on all five ticks; BTC only at 09:00 and 10:00.
#[test]
fn strategy_runs_on_the_hour_real_every_tick() {
    let agents = vec![
        agent("btc-strategy", "BTC/USDT", AgentMode::Strategy),
        agent("eth-real", "ETH/USDT", AgentMode::Real),
    ];

    let due_ids = |h: u32, m: u32| -> Vec<&str> {
        plan_tick(&agents, at(h, m), 60)
            .iter()
            .map(|a| a.config_id.as_str())
            .collect()
    };

    assert_eq!(due_ids(9, 0), vec!["btc-strategy", "eth-real"]);
    assert_eq!(due_ids(9, 15), vec!["eth-real"]);
    assert_eq!(due_ids(9, 30), vec!["eth-real"]);
    assert_eq!(due_ids(9, 45), vec!["eth-real"]);
    assert_eq!(due_ids(10, 0), vec!["btc-strategy", "eth-real"]);
}

// Scenario: two STRATEGY agents on the same symbol, configured [A, B].
// A buys and its simulated fill opens a position; B's snapshot in the
// same tick must already reflect that position.
#[tokio::test]
async fn later_agent_sees_earlier_agents_fill_in_same_tick() {
    let reasoning = Arc::new(MockReasoning::scripted(vec![decision_reply(
        // Crosses the 64000 snapshot price, so it fills immediately.
        &buy_arguments(65000.0, 0.5, "momentum entry"),
    )]));
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let (scheduler, store, _) = world(
        config_with(vec![
            agent("alpha", "BTC/USDT", AgentMode::Strategy),
            agent("beta", "BTC/USDT", AgentMode::Strategy),
        ]),
        reasoning.clone(),
        exchange,
    );

    let summary = scheduler.tick(at(9, 0)).await;
    assert_eq!(summary.due, 2);
    assert_eq!(summary.completed, 2);

    // Alpha's fill is a stored position now.
    let position = store.simulated_position("BTC/USDT").unwrap().unwrap();
    assert_eq!(position.size, dec!(0.5));

    // Both agents ran, in configuration order; beta's prompt carried the
    // position alpha had just opened, alpha's did not.
    let prompts = reasoning.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("(none)"), "alpha saw no position yet");
    assert!(prompts[1].contains("LONG"), "beta must see alpha's position");

    // Both cycles are audited as completed.
    assert_eq!(store.recent_analysis_logs("alpha", 10).unwrap().len(), 1);
    assert_eq!(store.recent_analysis_logs("beta", 10).unwrap().len(), 1);
}

// A tick boundary with no due agents performs zero writes, and repeating
// the same boundary is safe.
#[tokio::test]
async fn idle_tick_is_a_noop() {
    let reasoning = Arc::new(MockReasoning::no_action());
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let (scheduler, store, _) = world(
        config_with(vec![agent("btc-strategy", "BTC/USDT", AgentMode::Strategy)]),
        reasoning.clone(),
        exchange,
    );

    for _ in 0..2 {
        let summary = scheduler.tick(at(9, 15)).await;
        assert_eq!(summary.due, 0);
    }

    assert_eq!(store.order_count().unwrap(), 0);
    assert_eq!(store.analysis_log_count().unwrap(), 0);
    assert_eq!(reasoning.decide_calls(), 0);
}

#[tokio::test]
async fn disabled_scheduler_skips_everything() {
    let reasoning = Arc::new(MockReasoning::no_action());
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let mut config = config_with(vec![agent("btc-real", "BTC/USDT", AgentMode::Real)]);
    config.scheduler = SchedulerSettings {
        enabled: false,
        ..SchedulerSettings::default()
    };
    let (scheduler, store, _) = world(config, reasoning.clone(), exchange);

    let summary = scheduler.tick(at(9, 0)).await;
    assert_eq!(summary.due, 0);
    assert_eq!(store.analysis_log_count().unwrap(), 0);
    assert_eq!(reasoning.decide_calls(), 0);
}

// One agent's failure must not block other agents in the same tick.
#[tokio::test]
async fn agent_failure_is_isolated() {
    let reasoning = Arc::new(MockReasoning::no_action());
    // Candles exist only for ETH; the BTC agent aborts in GATHER.
    let exchange = Arc::new(MockExchange::with_symbol("ETH/USDT", dec!(3200), 60));
    let (scheduler, store, _) = world(
        config_with(vec![
            agent("btc-broken", "BTC/USDT", AgentMode::Strategy),
            agent("eth-ok", "ETH/USDT", AgentMode::Strategy),
        ]),
        reasoning,
        exchange,
    );

    let summary = scheduler.tick(at(9, 0)).await;
    assert_eq!(summary.due, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let broken_logs = store.recent_analysis_logs("btc-broken", 10).unwrap();
    assert_eq!(broken_logs[0].status, CycleStatus::Failed);
    let ok_logs = store.recent_analysis_logs("eth-ok", 10).unwrap();
    assert_eq!(ok_logs[0].status, CycleStatus::Completed);
}

// No overlapping cycles per config_id: a tick that fires while the same
// agent's previous cycle is still in flight skips that agent.
#[tokio::test]
async fn in_flight_agent_is_skipped() {
    let reasoning =
        Arc::new(MockReasoning::no_action().with_delay(Duration::from_millis(300)));
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let (scheduler, _store, _) = world(
        config_with(vec![agent("btc-strategy", "BTC/USDT", AgentMode::Strategy)]),
        reasoning,
        exchange,
    );

    let (first, second) = tokio::join!(scheduler.tick(at(9, 0)), scheduler.tick(at(9, 0)));

    assert_eq!(first.completed + second.completed, 1);
    assert_eq!(first.skipped + second.skipped, 1);
}

// A cycle hitting the tick deadline is abandoned, recorded as failed, and
// only retried on the next natural tick.
#[tokio::test]
async fn timed_out_cycle_is_recorded_as_failed() {
    let reasoning = Arc::new(MockReasoning::no_action().with_delay(Duration::from_secs(3)));
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let mut config = config_with(vec![agent("btc-slow", "BTC/USDT", AgentMode::Strategy)]);
    config.scheduler.cycle_timeout_seconds = 1;
    let (scheduler, store, _) = world(config, reasoning, exchange);

    let summary = scheduler.tick(at(9, 0)).await;
    assert_eq!(summary.failed, 1);

    let logs = store.recent_analysis_logs("btc-slow", 10).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, CycleStatus::Failed);
    assert!(logs[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

// Config edits apply at the next tick: the scheduler re-reads the source
// instead of caching the agent set.
#[tokio::test]
async fn hot_reload_applies_at_next_tick() {
    let reasoning = Arc::new(MockReasoning::no_action());
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    exchange.add_symbol("ETH/USDT", dec!(3200), 60);

    let initial = config_with(vec![agent("btc-0", "BTC/USDT", AgentMode::Strategy)]);
    let (scheduler, store, source) = world(initial.clone(), reasoning, exchange);

    let first = scheduler.tick(at(9, 0)).await;
    assert_eq!(first.completed, 1);

    let mut updated = initial;
    updated
        .agents
        .push(agent("eth-0", "ETH/USDT", AgentMode::Strategy));
    source.replace(updated);

    let second = scheduler.tick(at(10, 0)).await;
    assert_eq!(second.due, 2);
    assert_eq!(second.completed, 2);

    assert_eq!(store.recent_analysis_logs("btc-0", 10).unwrap().len(), 2);
    assert_eq!(store.recent_analysis_logs("eth-0", 10).unwrap().len(), 1);
}

// The manual trigger runs the identical pipeline outside the cadence.
#[tokio::test]
async fn manual_trigger_reuses_cycle_path() {
    let reasoning = Arc::new(MockReasoning::no_action());
    let exchange = Arc::new(MockExchange::with_symbol("BTC/USDT", dec!(64000), 60));
    let config = config_with(vec![agent("btc-0", "BTC/USDT", AgentMode::Strategy)]);

    let store = Arc::new(Store::open_in_memory().unwrap());
    let engine = cadence::build_engine(
        &config,
        store.clone(),
        exchange,
        reasoning,
        None,
    );

    let report = cadence::run_agent_once(&engine, &config, "btc-0").await.unwrap();
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(store.recent_analysis_logs("btc-0", 10).unwrap().len(), 1);

    let missing = cadence::run_agent_once(&engine, &config, "ghost").await;
    assert!(missing.is_err());
}
