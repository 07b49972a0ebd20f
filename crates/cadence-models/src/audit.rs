use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of a decision cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    Completed,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMPLETED" => Some(CycleStatus::Completed),
            "FAILED" => Some(CycleStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only record of one decision cycle: the full rationale plus the
/// outcome. Failed cycles are recorded too, with the failure reason, so the
/// audit trail never has gaps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisLog {
    pub cycle_id: Uuid,
    pub config_id: String,
    pub symbol: String,
    /// Action tag of the decision, or "NONE" when the cycle failed before
    /// a decision was produced.
    pub action: String,
    pub rationale: String,
    pub status: CycleStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Compressed summary of one cycle's rationale, written asynchronously by
/// the summarizer. The most recent entries per `config_id` feed the next
/// cycle's snapshot as previous context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub cycle_id: Uuid,
    pub config_id: String,
    pub symbol: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One row per reasoning-model invocation, including summarizer calls.
/// Append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub config_id: String,
    pub symbol: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub created_at: DateTime<Utc>,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}
