//! Scriptable reasoning-service mock used by engine and scheduler tests.
//!
//! Replies are consumed from a queue; when the queue is empty the mock
//! falls back to a fixed behavior (structured NO_ACTION, or narrative text
//! with no action call to exercise the malformed-decision path). Every
//! prompt the mock sees is recorded for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CycleError;
use crate::reasoning::{
    DecisionReply, ReasoningClient, ReasoningEndpoint, SummaryReply, TokenCounts,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Structured NO_ACTION call on every request.
    NoAction,
    /// Narrative text without a structured call - the malformed case.
    TextOnly,
}

pub struct MockReasoning {
    behavior: MockBehavior,
    script: Mutex<VecDeque<DecisionReply>>,
    pub prompts: Mutex<Vec<String>>,
    pub summary_requests: Mutex<Vec<String>>,
    pub summary_text: String,
    delay: Option<Duration>,
}

impl MockReasoning {
    pub fn no_action() -> Self {
        Self::with_behavior(MockBehavior::NoAction)
    }

    pub fn text_only() -> Self {
        Self::with_behavior(MockBehavior::TextOnly)
    }

    pub fn scripted(replies: Vec<DecisionReply>) -> Self {
        let mock = Self::with_behavior(MockBehavior::NoAction);
        mock.script.lock().unwrap().extend(replies);
        mock
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            summary_requests: Mutex::new(Vec::new()),
            summary_text: "Compressed summary of the cycle.".to_string(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_summary_text(mut self, text: &str) -> Self {
        self.summary_text = text.to_string();
        self
    }

    pub fn queue(&self, reply: DecisionReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn decide_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoning {
    async fn decide(
        &self,
        _endpoint: &ReasoningEndpoint,
        system_prompt: &str,
    ) -> Result<DecisionReply, CycleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.prompts.lock().unwrap().push(system_prompt.to_string());

        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        Ok(match self.behavior {
            MockBehavior::NoAction => decision_reply(&no_action_arguments("nothing to do")),
            MockBehavior::TextOnly => {
                text_reply("Let me walk through the market structure in detail...")
            }
        })
    }

    async fn summarize(
        &self,
        _endpoint: &ReasoningEndpoint,
        prompt: &str,
    ) -> Result<SummaryReply, CycleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.summary_requests
            .lock()
            .unwrap()
            .push(prompt.to_string());
        Ok(SummaryReply {
            text: self.summary_text.clone(),
            usage: TokenCounts {
                prompt: 300,
                completion: 40,
            },
        })
    }
}

/// A reply carrying a structured action call with the given arguments.
pub fn decision_reply(arguments: &str) -> DecisionReply {
    DecisionReply {
        decision_call: Some(arguments.to_string()),
        text: None,
        usage: TokenCounts {
            prompt: 1200,
            completion: 150,
        },
    }
}

/// A reply with narrative text and no structured call.
pub fn text_reply(text: &str) -> DecisionReply {
    DecisionReply {
        decision_call: None,
        text: Some(text.to_string()),
        usage: TokenCounts {
            prompt: 1200,
            completion: 400,
        },
    }
}

pub fn no_action_arguments(rationale: &str) -> String {
    serde_json::json!({ "action": "NO_ACTION", "rationale": rationale }).to_string()
}

pub fn buy_arguments(price: f64, size: f64, rationale: &str) -> String {
    serde_json::json!({
        "action": "BUY",
        "price": price,
        "size": size,
        "stop_loss": price * 0.97,
        "take_profit": price * 1.05,
        "rationale": rationale,
    })
    .to_string()
}

pub fn sell_arguments(price: f64, size: f64, rationale: &str) -> String {
    serde_json::json!({
        "action": "SELL",
        "price": price,
        "size": size,
        "rationale": rationale,
    })
    .to_string()
}
