//! Asynchronous rationale compression, decoupled from the decision path.
//!
//! FINALIZE drops a job into a bounded queue and moves on; a small worker
//! pool drains it, calling the (possibly cheaper) summarizer model and
//! writing the result back as the agent's next "previous context" entry.
//! A full queue drops jobs, a failed job is logged and dropped - the
//! decision path never waits on any of this.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_models::{AgentSummary, SummarizerSettings, TokenUsage};
use cadence_store::Store;

use crate::reasoning::{ReasoningClient, ReasoningEndpoint};

const SUMMARY_INSTRUCTION: &str = "\
Compress the following trading analysis into at most three sentences. \
Keep the directional view, the key levels, and the intended plan; drop \
everything else. Reply with the summary text only.\n\n";

#[derive(Debug, Clone)]
pub struct SummaryJob {
    pub cycle_id: Uuid,
    pub config_id: String,
    pub symbol: String,
    pub endpoint: ReasoningEndpoint,
    pub rationale: String,
}

/// Handle used by the engine to enqueue jobs. Cheap to clone.
#[derive(Clone)]
pub struct SummarizerQueue {
    tx: mpsc::Sender<SummaryJob>,
}

impl SummarizerQueue {
    /// Spawn the worker pool and return the enqueue handle. Workers run
    /// until the token is cancelled and the queue is drained or dropped.
    pub fn spawn(
        store: Arc<Store>,
        reasoning: Arc<dyn ReasoningClient>,
        settings: &SummarizerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let timeout = Duration::from_secs(settings.request_timeout_seconds);

        for worker in 0..settings.workers.max(1) {
            let rx = rx.clone();
            let store = store.clone();
            let reasoning = reasoning.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                worker_loop(worker, rx, store, reasoning, timeout, cancel).await;
            });
        }

        Self { tx }
    }

    /// Non-blocking enqueue. Backpressure policy: drop with a warning.
    pub fn enqueue(&self, job: SummaryJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(config_id = %job.config_id, "Summarizer queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(config_id = %job.config_id, "Summarizer stopped, dropping job");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<SummaryJob>>>,
    store: Arc<Store>,
    reasoning: Arc<dyn ReasoningClient>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    debug!(worker, "Summarizer worker started");
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Err(e) = process(&job, &store, &reasoning, timeout).await {
            warn!(
                worker,
                config_id = %job.config_id,
                cycle_id = %job.cycle_id,
                error = %e,
                "Summarization failed, job dropped"
            );
        }
    }
    info!(worker, "Summarizer worker stopped");
}

async fn process(
    job: &SummaryJob,
    store: &Store,
    reasoning: &Arc<dyn ReasoningClient>,
    timeout: Duration,
) -> Result<(), String> {
    let prompt = format!("{SUMMARY_INSTRUCTION}{}", job.rationale);
    let reply = tokio::time::timeout(timeout, reasoning.summarize(&job.endpoint, &prompt))
        .await
        .map_err(|_| format!("timed out after {}s", timeout.as_secs()))?
        .map_err(|e| e.to_string())?;

    // Completion time is the write time: overlapping summarizations for
    // the same agent settle last-write-wins.
    store
        .insert_summary(&AgentSummary {
            cycle_id: job.cycle_id,
            config_id: job.config_id.clone(),
            symbol: job.symbol.clone(),
            content: reply.text.clone(),
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| e.to_string())?;

    store
        .insert_token_usage(&TokenUsage {
            config_id: job.config_id.clone(),
            symbol: job.symbol.clone(),
            model: job.endpoint.model.clone(),
            prompt_tokens: reply.usage.prompt,
            completion_tokens: reply.usage.completion,
            created_at: Utc::now(),
        })
        .map_err(|e| e.to_string())?;

    debug!(config_id = %job.config_id, cycle_id = %job.cycle_id, "Summary stored");
    Ok(())
}
