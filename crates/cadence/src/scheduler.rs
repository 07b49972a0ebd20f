use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use cadence_engine::DecisionEngine;
use cadence_models::{AgentConfig, AgentMode, AnalysisLog, CycleStatus};
use cadence_store::Store;

use crate::config_source::ConfigSource;

/// Counters for one tick, mainly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    /// Agents skipped because their previous cycle was still in flight.
    pub skipped: usize,
}

/// The heartbeat. Owns wall-clock timing, decides which agents are due on
/// each tick, and runs them with bounded concurrency while keeping agents
/// that share a symbol strictly sequential in configuration order.
pub struct Scheduler {
    engine: Arc<DecisionEngine>,
    config_source: Arc<dyn ConfigSource>,
    store: Arc<Store>,
    cancel: CancellationToken,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<DecisionEngine>,
        config_source: Arc<dyn ConfigSource>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            engine,
            config_source,
            store,
            cancel: CancellationToken::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled: sleep to the next aligned slot, tick, repeat.
    pub async fn run(&self) {
        info!("Scheduler starting");
        loop {
            let (interval, delay) = match self.config_source.load() {
                Ok(snapshot) => (
                    snapshot.config.scheduler.base_interval_minutes.max(1),
                    snapshot.config.scheduler.start_delay_seconds,
                ),
                Err(e) => {
                    error!(error = %e, "Config load failed, using fallback heartbeat");
                    (15, 10)
                }
            };

            let slot = next_slot(Utc::now(), interval);
            let fire_at = slot + chrono::Duration::seconds(delay as i64);
            let sleep = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            info!(
                next_tick = %slot.format("%H:%M:%S"),
                sleep_secs = sleep.as_secs(),
                "Scheduler idle"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(sleep) => {
                    self.tick(slot).await;
                }
            }
        }
    }

    /// Evaluate one tick boundary. Re-reads the configuration, expires
    /// stale simulated orders, then runs all due agents. Safe to call for
    /// the same boundary twice: decisions derive from freshly fetched
    /// state, and a tick with no due agents performs no writes.
    pub async fn tick(&self, tick_time: DateTime<Utc>) -> TickSummary {
        let snapshot = match self.config_source.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Config load failed, tick skipped");
                return TickSummary::default();
            }
        };
        let config = snapshot.config;

        if !config.scheduler.enabled {
            info!(version = snapshot.version, "Scheduler disabled, tick skipped");
            return TickSummary::default();
        }

        let due: Vec<AgentConfig> = plan_tick(
            &config.agents,
            tick_time,
            config.scheduler.coarse_interval_minutes,
        )
        .into_iter()
        .cloned()
        .collect();

        if due.is_empty() {
            info!(tick = %tick_time.format("%H:%M"), "No agents due, tick is a no-op");
            return TickSummary::default();
        }

        // Tick-boundary maintenance: expired simulated orders drop out
        // before any snapshot is taken.
        match self.store.expire_resting_orders(Utc::now()) {
            Ok(expired) if expired > 0 => info!(expired, "Expired stale simulated orders"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Order expiry sweep failed"),
        }

        info!(
            tick = %tick_time.format("%Y-%m-%d %H:%M"),
            version = snapshot.version,
            due = due.len(),
            configured = config.agents.len(),
            "Tick starting"
        );

        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };
        let semaphore = Arc::new(Semaphore::new(config.scheduler.max_concurrent_symbols.max(1)));
        let cycle_timeout = Duration::from_secs(config.scheduler.cycle_timeout_seconds.max(1));

        let mut groups = JoinSet::new();
        for group in group_by_symbol(due) {
            let engine = self.engine.clone();
            let store = self.store.clone();
            let in_flight = self.in_flight.clone();
            let semaphore = semaphore.clone();
            groups.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TickSummary::default();
                };
                run_symbol_group(engine, store, in_flight, group, cycle_timeout).await
            });
        }

        while let Some(joined) = groups.join_next().await {
            match joined {
                Ok(group_summary) => {
                    summary.completed += group_summary.completed;
                    summary.failed += group_summary.failed;
                    summary.skipped += group_summary.skipped;
                }
                Err(e) => {
                    // A panicking group must not take the tick down.
                    error!(error = %e, "Symbol group task panicked");
                }
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Tick finished"
        );
        summary
    }
}

/// Run one symbol's agents strictly in configuration order, so an earlier
/// agent's FINALIZE is visible to a later agent's GATHER within the same
/// tick. Failures and timeouts are isolated per agent.
async fn run_symbol_group(
    engine: Arc<DecisionEngine>,
    store: Arc<Store>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    group: Vec<AgentConfig>,
    cycle_timeout: Duration,
) -> TickSummary {
    let mut summary = TickSummary::default();

    for agent in group {
        let claimed = match in_flight.lock() {
            Ok(mut running) => running.insert(agent.config_id.clone()),
            Err(e) => {
                error!(error = %e, "In-flight set poisoned");
                false
            }
        };
        if !claimed {
            warn!(
                config_id = %agent.config_id,
                "Previous cycle still in flight, agent skipped this tick"
            );
            summary.skipped += 1;
            continue;
        }

        let outcome = tokio::time::timeout(cycle_timeout, engine.run_cycle(&agent)).await;

        if let Ok(mut running) = in_flight.lock() {
            running.remove(&agent.config_id);
        }

        match outcome {
            Ok(report) if report.status == CycleStatus::Completed => summary.completed += 1,
            Ok(_) => summary.failed += 1,
            Err(_) => {
                warn!(
                    config_id = %agent.config_id,
                    timeout_secs = cycle_timeout.as_secs(),
                    "Cycle timed out, abandoned until the next tick"
                );
                record_timeout(&store, &agent, cycle_timeout);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// A timed-out cycle was dropped mid-flight, so the engine could not write
/// its own failure record; the scheduler does it instead.
fn record_timeout(store: &Store, agent: &AgentConfig, cycle_timeout: Duration) {
    let reason = format!("cycle timed out after {}s", cycle_timeout.as_secs());
    if let Err(e) = store.insert_analysis_log(&AnalysisLog {
        cycle_id: Uuid::new_v4(),
        config_id: agent.config_id.clone(),
        symbol: agent.symbol.clone(),
        action: "NONE".to_string(),
        rationale: format!("Cycle aborted: {reason}"),
        status: CycleStatus::Failed,
        failure_reason: Some(reason),
        created_at: Utc::now(),
    }) {
        error!(config_id = %agent.config_id, error = %e, "Failed to record timeout");
    }
}

/// Stateless due-ness: REAL agents run on every tick, STRATEGY agents only
/// when the tick boundary aligns to the coarse period. No per-agent
/// countdowns, so configuration changes apply on the very next tick.
pub fn is_due(mode: AgentMode, tick_time: DateTime<Utc>, coarse_minutes: u64) -> bool {
    match mode {
        AgentMode::Real => true,
        AgentMode::Strategy => aligns_to(tick_time, coarse_minutes),
    }
}

pub fn aligns_to(tick_time: DateTime<Utc>, interval_minutes: u64) -> bool {
    let secs = (interval_minutes.max(1) * 60) as i64;
    tick_time.timestamp() % secs == 0
}

/// Enabled agents due at this boundary, in configuration order.
pub fn plan_tick(
    agents: &[AgentConfig],
    tick_time: DateTime<Utc>,
    coarse_minutes: u64,
) -> Vec<&AgentConfig> {
    agents
        .iter()
        .filter(|a| a.enabled && is_due(a.mode, tick_time, coarse_minutes))
        .collect()
}

/// Partition due agents into per-symbol groups, preserving configuration
/// order inside each group. Group order follows first appearance.
pub fn group_by_symbol(due: Vec<AgentConfig>) -> Vec<Vec<AgentConfig>> {
    let mut groups: Vec<(String, Vec<AgentConfig>)> = Vec::new();
    for agent in due {
        match groups.iter_mut().find(|(symbol, _)| *symbol == agent.symbol) {
            Some((_, group)) => group.push(agent),
            None => groups.push((agent.symbol.clone(), vec![agent])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// The next wall-clock boundary aligned to the interval (epoch-based, like
/// "every quarter hour on the quarter hour").
pub fn next_slot(now: DateTime<Utc>, interval_minutes: u64) -> DateTime<Utc> {
    let secs = (interval_minutes.max(1) * 60) as i64;
    let next = (now.timestamp() / secs + 1) * secs;
    Utc.timestamp_opt(next, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

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
            api_key: "sk".to_string(),
            temperature: 0.5,
            prompt_file: None,
            exchange: None,
            summarizer: None,
        }
    }

    #[test]
    fn alignment() {
        assert!(aligns_to(at(9, 0), 60));
        assert!(!aligns_to(at(9, 15), 60));
        assert!(aligns_to(at(9, 15), 15));
        assert!(aligns_to(at(10, 0), 60));
    }

    #[test]
    fn real_due_every_tick_strategy_on_coarse_boundary() {
        for minute in [0, 15, 30, 45] {
            assert!(is_due(AgentMode::Real, at(9, minute), 60));
        }
        assert!(is_due(AgentMode::Strategy, at(9, 0), 60));
        for minute in [15, 30, 45] {
            assert!(!is_due(AgentMode::Strategy, at(9, minute), 60));
        }
    }

    #[test]
    fn plan_skips_disabled_agents() {
        let mut off = agent("off", "BTC/USDT", AgentMode::Real);
        off.enabled = false;
        let agents = vec![off, agent("on", "ETH/USDT", AgentMode::Real)];

        let due = plan_tick(&agents, at(9, 15), 60);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].config_id, "on");
    }

    #[test]
    fn grouping_preserves_config_order() {
        let due = vec![
            agent("a", "BTC/USDT", AgentMode::Strategy),
            agent("b", "ETH/USDT", AgentMode::Strategy),
            agent("c", "BTC/USDT", AgentMode::Strategy),
        ];
        let groups = group_by_symbol(due);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].config_id, "a");
        assert_eq!(groups[0][1].config_id, "c");
        assert_eq!(groups[1][0].config_id, "b");
    }

    #[test]
    fn next_slot_rounds_up() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 7, 31).unwrap();
        assert_eq!(next_slot(now, 15), at(9, 15));
        assert_eq!(next_slot(now, 60), at(10, 0));
        // Exactly on a boundary moves to the next one.
        assert_eq!(next_slot(at(9, 15), 15), at(9, 30));
    }
}
