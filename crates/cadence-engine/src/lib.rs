pub mod engine;
pub mod error;
pub mod execution;
pub mod parser;
pub mod prompt;
pub mod reasoning;
pub mod summarizer;

pub mod test_support;

pub use engine::{CycleReport, DecisionEngine};
pub use error::CycleError;
pub use execution::{ExecutionAdapter, ExecutionOutcome};
pub use prompt::{FilePromptSource, PromptSource};
pub use reasoning::{
    ChatCompletionsClient, DecisionReply, ReasoningClient, ReasoningEndpoint, SummaryReply,
    TokenCounts,
};
pub use summarizer::{SummarizerQueue, SummaryJob};
