use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_market::SnapshotProvider;
use cadence_models::{
    AgentConfig, AnalysisLog, CycleStatus, Decision, EngineSettings, OrderStatus, TokenUsage,
};
use cadence_store::Store;

use crate::error::CycleError;
use crate::execution::{ExecutionAdapter, ExecutionOutcome};
use crate::parser;
use crate::prompt::{self, PromptSource};
use crate::reasoning::{ReasoningClient, ReasoningEndpoint};
use crate::summarizer::{SummarizerQueue, SummaryJob};

/// Result of one agent cycle, as reported to the scheduler. Failures are
/// already converted into persisted audit records by the time this is
/// returned; the report itself never carries an error to propagate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub config_id: String,
    pub symbol: String,
    pub status: CycleStatus,
    /// Action tag, when a decision was produced.
    pub action: Option<String>,
    /// Execution outcome label, when ACT ran.
    pub outcome: Option<&'static str>,
    pub failure: Option<String>,
    pub elapsed_ms: u64,
}

/// The per-agent decision pipeline: GATHER -> DECIDE -> ACT -> FINALIZE,
/// with a bounded re-prompt loop inside DECIDE for replies that carry no
/// structured action call.
pub struct DecisionEngine {
    snapshots: Arc<SnapshotProvider>,
    reasoning: Arc<dyn ReasoningClient>,
    execution: ExecutionAdapter,
    store: Arc<Store>,
    prompts: Arc<dyn PromptSource>,
    summarizer: Option<SummarizerQueue>,
    settings: EngineSettings,
}

impl DecisionEngine {
    pub fn new(
        snapshots: Arc<SnapshotProvider>,
        reasoning: Arc<dyn ReasoningClient>,
        execution: ExecutionAdapter,
        store: Arc<Store>,
        prompts: Arc<dyn PromptSource>,
        summarizer: Option<SummarizerQueue>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            snapshots,
            reasoning,
            execution,
            store,
            prompts,
            summarizer,
            settings,
        }
    }

    /// Run one full cycle for one agent. All failures are caught here and
    /// converted into audit records; the scheduler only sees the report.
    pub async fn run_cycle(&self, agent: &AgentConfig) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            config_id = %agent.config_id,
            symbol = %agent.symbol,
            mode = agent.mode.as_str(),
            %cycle_id,
            "Cycle starting"
        );

        let mut usage = Vec::new();
        match self.drive(agent, &mut usage).await {
            Ok((decision, outcome)) => {
                self.finalize_completed(agent, cycle_id, decision, outcome, usage, started)
            }
            Err(e) => self.finalize_failed(agent, cycle_id, e, usage, started),
        }
    }

    /// GATHER through ACT. Token usage is accumulated by the caller so a
    /// failing cycle still gets its usage rows persisted.
    async fn drive(
        &self,
        agent: &AgentConfig,
        usage: &mut Vec<TokenUsage>,
    ) -> Result<(Decision, ExecutionOutcome), CycleError> {
        debug!(config_id = %agent.config_id, stage = "GATHER", "Assembling snapshot");
        let snapshot = self.snapshots.build(agent).await?;
        let template = self.prompts.resolve(agent);
        let rendered = prompt::render(&template, &prompt::build_context(agent, &snapshot));

        debug!(config_id = %agent.config_id, stage = "DECIDE", "Requesting decision");
        let decision = self.decide(agent, &rendered, usage).await?;

        debug!(
            config_id = %agent.config_id,
            stage = "ACT",
            action = decision.action.tag(),
            "Dispatching to execution adapter"
        );
        let outcome = self.execution.apply(agent, &snapshot, &decision).await?;
        Ok((decision, outcome))
    }

    /// The DECIDE loop. A reply without a structured action call (or with
    /// arguments that fail validation) consumes one attempt; the budget is
    /// `decide_retries` re-prompts on top of the first attempt.
    async fn decide(
        &self,
        agent: &AgentConfig,
        rendered_prompt: &str,
        usage: &mut Vec<TokenUsage>,
    ) -> Result<Decision, CycleError> {
        let endpoint = ReasoningEndpoint::for_agent(agent);
        let attempts = self.settings.decide_retries + 1;
        let timeout = Duration::from_secs(self.settings.reasoning_timeout_seconds);
        let mut last_detail = String::new();

        for attempt in 1..=attempts {
            let reply = tokio::time::timeout(
                timeout,
                self.reasoning.decide(&endpoint, rendered_prompt),
            )
            .await
            .map_err(|_| {
                CycleError::Reasoning(format!("decide timed out after {}s", timeout.as_secs()))
            })??;

            usage.push(TokenUsage {
                config_id: agent.config_id.clone(),
                symbol: agent.symbol.clone(),
                model: endpoint.model.clone(),
                prompt_tokens: reply.usage.prompt,
                completion_tokens: reply.usage.completion,
                created_at: Utc::now(),
            });

            match reply.decision_call.as_deref() {
                Some(arguments) => match parser::parse_decision(arguments) {
                    Ok(decision) => {
                        debug!(attempt, action = decision.action.tag(), "Decision accepted");
                        return Ok(decision);
                    }
                    Err(detail) => {
                        warn!(config_id = %agent.config_id, attempt, %detail, "Decision arguments malformed");
                        last_detail = detail;
                    }
                },
                None => {
                    warn!(
                        config_id = %agent.config_id,
                        attempt,
                        "Reply carried narrative text but no structured action call"
                    );
                    last_detail = "no structured action call in reply".to_string();
                }
            }
        }

        Err(CycleError::MalformedDecision {
            attempts,
            detail: last_detail,
        })
    }

    fn finalize_completed(
        &self,
        agent: &AgentConfig,
        cycle_id: Uuid,
        decision: Decision,
        outcome: ExecutionOutcome,
        usage: Vec<TokenUsage>,
        started: Instant,
    ) -> CycleReport {
        debug!(config_id = %agent.config_id, stage = "FINALIZE", outcome = outcome.label(), "Persisting cycle");

        if let Err(e) = self.persist_completed(agent, cycle_id, &decision, &outcome, &usage) {
            error!(config_id = %agent.config_id, error = %e, "FINALIZE persistence failed");
            // Overwrite the cycle's log row so the order and the log are
            // recorded as failed together.
            let _ = self.store.insert_analysis_log(&AnalysisLog {
                cycle_id,
                config_id: agent.config_id.clone(),
                symbol: agent.symbol.clone(),
                action: decision.action.tag().to_string(),
                rationale: decision.rationale.clone(),
                status: CycleStatus::Failed,
                failure_reason: Some(format!("persistence failure in FINALIZE: {e}")),
                created_at: Utc::now(),
            });
            return CycleReport {
                cycle_id,
                config_id: agent.config_id.clone(),
                symbol: agent.symbol.clone(),
                status: CycleStatus::Failed,
                action: Some(decision.action.tag().to_string()),
                outcome: Some(outcome.label()),
                failure: Some(e.to_string()),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        self.enqueue_summary(agent, cycle_id, &decision);

        info!(
            config_id = %agent.config_id,
            action = decision.action.tag(),
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        CycleReport {
            cycle_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            status: CycleStatus::Completed,
            action: Some(decision.action.tag().to_string()),
            outcome: Some(outcome.label()),
            failure: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn persist_completed(
        &self,
        agent: &AgentConfig,
        cycle_id: Uuid,
        decision: &Decision,
        outcome: &ExecutionOutcome,
        usage: &[TokenUsage],
    ) -> Result<(), CycleError> {
        if let Some(order) = outcome.order() {
            self.store.insert_order(order)?;
        }
        if let ExecutionOutcome::Cancelled { order_id } = outcome {
            let touched = self
                .store
                .update_order_status(order_id, OrderStatus::Cancelled)?;
            if touched == 0 {
                warn!(config_id = %agent.config_id, %order_id, "Cancelled order has no stored row");
            }
        }
        for row in usage {
            self.store.insert_token_usage(row)?;
        }
        self.store.insert_analysis_log(&AnalysisLog {
            cycle_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            action: decision.action.tag().to_string(),
            rationale: decision.rationale.clone(),
            status: CycleStatus::Completed,
            failure_reason: None,
            created_at: Utc::now(),
        })?;
        Ok(())
    }

    fn finalize_failed(
        &self,
        agent: &AgentConfig,
        cycle_id: Uuid,
        error: CycleError,
        usage: Vec<TokenUsage>,
        started: Instant,
    ) -> CycleReport {
        warn!(
            config_id = %agent.config_id,
            symbol = %agent.symbol,
            error = %error,
            "Cycle failed"
        );

        // Usage rows are persisted even for failed cycles: every model
        // invocation that happened gets its record.
        for row in &usage {
            if let Err(e) = self.store.insert_token_usage(row) {
                error!(config_id = %agent.config_id, error = %e, "Failed to persist token usage");
            }
        }
        if let Err(e) = self.store.insert_analysis_log(&AnalysisLog {
            cycle_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            action: "NONE".to_string(),
            rationale: format!("Cycle aborted: {error}"),
            status: CycleStatus::Failed,
            failure_reason: Some(error.to_string()),
            created_at: Utc::now(),
        }) {
            error!(config_id = %agent.config_id, error = %e, "Failed to persist failure log");
        }

        CycleReport {
            cycle_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            status: CycleStatus::Failed,
            action: None,
            outcome: None,
            failure: Some(error.to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Fire-and-forget: a full queue drops the job with a warning rather
    /// than delaying the cycle.
    fn enqueue_summary(&self, agent: &AgentConfig, cycle_id: Uuid, decision: &Decision) {
        let Some(queue) = &self.summarizer else {
            return;
        };
        if decision.rationale.trim().is_empty() {
            return;
        }
        queue.enqueue(SummaryJob {
            cycle_id,
            config_id: agent.config_id.clone(),
            symbol: agent.symbol.clone(),
            endpoint: ReasoningEndpoint::for_summarizer(agent),
            rationale: decision.rationale.clone(),
        });
    }
}
