use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_models::AgentConfig;

use crate::error::CycleError;

/// Token counts reported by one model invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
}

/// Where and how to call a reasoning model. Each agent carries its own
/// endpoint; the summarizer may override parts of it with a cheaper model.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningEndpoint {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

impl ReasoningEndpoint {
    pub fn for_agent(agent: &AgentConfig) -> Self {
        Self {
            api_base: agent.api_base.clone(),
            api_key: agent.api_key.clone(),
            model: agent.model.clone(),
            temperature: agent.temperature,
        }
    }

    /// The summarizer endpoint: the agent's own, with any per-field
    /// overrides from the agent's summarizer sub-config applied.
    pub fn for_summarizer(agent: &AgentConfig) -> Self {
        let mut endpoint = Self::for_agent(agent);
        if let Some(overrides) = &agent.summarizer {
            if let Some(model) = &overrides.model {
                endpoint.model = model.clone();
            }
            if let Some(api_base) = &overrides.api_base {
                endpoint.api_base = api_base.clone();
            }
            if let Some(api_key) = &overrides.api_key {
                endpoint.api_key = api_key.clone();
            }
            if let Some(temperature) = overrides.temperature {
                endpoint.temperature = temperature;
            }
        }
        endpoint
    }
}

/// Reply to a decision request. `decision_call` holds the raw arguments of
/// the structured action call when the model made one; `text` holds any
/// narrative content. A reply with no call is the malformed case handled
/// by the engine's retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionReply {
    pub decision_call: Option<String>,
    pub text: Option<String>,
    pub usage: TokenCounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReply {
    pub text: String,
    pub usage: TokenCounts,
}

/// Client boundary to the reasoning service. Mockable for tests.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Request a structured trade decision for the rendered prompt.
    async fn decide(
        &self,
        endpoint: &ReasoningEndpoint,
        system_prompt: &str,
    ) -> Result<DecisionReply, CycleError>;

    /// Request a plain-text compression of a cycle rationale.
    async fn summarize(
        &self,
        endpoint: &ReasoningEndpoint,
        prompt: &str,
    ) -> Result<SummaryReply, CycleError>;
}

/// Name of the function the model must call to submit its decision.
pub const DECISION_FUNCTION: &str = "submit_decision";

/// JSON schema for the decision call, constrained to the five-action
/// vocabulary. The parser re-validates everything; the schema exists to
/// steer the model.
pub fn decision_tool() -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": DECISION_FUNCTION,
            "description": "Submit exactly one trading decision for this cycle.",
            "parameters": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["BUY", "SELL", "CLOSE", "CANCEL", "NO_ACTION"],
                        "description": "BUY/SELL place a limit entry, CLOSE exits the open position, CANCEL removes a resting order, NO_ACTION does nothing."
                    },
                    "price": { "type": "number", "description": "Limit price for BUY/SELL, optional exit price for CLOSE." },
                    "size": { "type": "number", "description": "Quantity in base units for BUY/SELL, optional partial size for CLOSE." },
                    "stop_loss": { "type": "number" },
                    "take_profit": { "type": "number" },
                    "valid_hours": { "type": "integer", "description": "Hours a resting entry stays valid (default 24)." },
                    "order_id": { "type": "string", "description": "Order to cancel; required for CANCEL." },
                    "side": { "type": "string", "enum": ["LONG", "SHORT"], "description": "Position side to close; optional for CLOSE." },
                    "rationale": { "type": "string", "description": "Reasoning behind the decision." }
                },
                "required": ["action", "rationale"]
            }
        }
    })
}

// --- OpenAI-compatible wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible chat-completions client. One HTTP client is shared
/// across all agents; the endpoint (base URL, key, model, temperature)
/// varies per call.
pub struct ChatCompletionsClient {
    http: Client,
}

impl ChatCompletionsClient {
    pub fn new(timeout: Duration) -> Result<Self, CycleError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CycleError::Reasoning(format!("http client: {e}")))?;
        Ok(Self { http })
    }

    async fn chat(
        &self,
        endpoint: &ReasoningEndpoint,
        request: &ChatRequest<'_>,
    ) -> Result<ChatResponse, CycleError> {
        let url = format!(
            "{}/chat/completions",
            endpoint.api_base.trim_end_matches('/')
        );
        debug!(model = %endpoint.model, url, "Reasoning request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| CycleError::Reasoning(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CycleError::Reasoning(e.to_string()))?;
        if !status.is_success() {
            return Err(CycleError::Reasoning(format!("{status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| CycleError::Reasoning(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl ReasoningClient for ChatCompletionsClient {
    async fn decide(
        &self,
        endpoint: &ReasoningEndpoint,
        system_prompt: &str,
    ) -> Result<DecisionReply, CycleError> {
        let request = ChatRequest {
            model: &endpoint.model,
            temperature: endpoint.temperature,
            messages: vec![ChatMessage {
                role: "system",
                content: system_prompt,
            }],
            tools: Some(vec![decision_tool()]),
            tool_choice: Some(serde_json::json!({
                "type": "function",
                "function": { "name": DECISION_FUNCTION }
            })),
        };

        let response = self.chat(endpoint, &request).await?;
        let usage = token_counts(&response);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CycleError::Reasoning("response has no choices".to_string()))?;

        let decision_call = choice.message.tool_calls.and_then(|calls| {
            calls
                .into_iter()
                .find(|call| call.function.name == DECISION_FUNCTION)
                .map(|call| call.function.arguments)
        });

        Ok(DecisionReply {
            decision_call,
            text: choice.message.content,
            usage,
        })
    }

    async fn summarize(
        &self,
        endpoint: &ReasoningEndpoint,
        prompt: &str,
    ) -> Result<SummaryReply, CycleError> {
        let request = ChatRequest {
            model: &endpoint.model,
            temperature: endpoint.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            tools: None,
            tool_choice: None,
        };

        let response = self.chat(endpoint, &request).await?;
        let usage = token_counts(&response);
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CycleError::Reasoning("empty summary response".to_string()));
        }

        Ok(SummaryReply {
            text: text.trim().to_string(),
            usage,
        })
    }
}

fn token_counts(response: &ChatResponse) -> TokenCounts {
    response
        .usage
        .as_ref()
        .map(|u| TokenCounts {
            prompt: u.prompt_tokens,
            completion: u.completion_tokens,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_models::SummarizerConfig;

    fn agent() -> AgentConfig {
        AgentConfig {
            config_id: "a1".to_string(),
            symbol: "BTC/USDT".to_string(),
            mode: cadence_models::AgentMode::Strategy,
            enabled: true,
            leverage: 20,
            model: "qwen3-max".to_string(),
            api_base: "https://api.example.com/v1".to_string(),
            api_key: "sk-main".to_string(),
            temperature: 0.5,
            prompt_file: None,
            exchange: None,
            summarizer: Some(SummarizerConfig {
                model: Some("qwen-turbo".to_string()),
                api_base: None,
                api_key: None,
                temperature: Some(0.2),
            }),
        }
    }

    #[test]
    fn summarizer_endpoint_applies_overrides() {
        let agent = agent();
        let endpoint = ReasoningEndpoint::for_summarizer(&agent);
        assert_eq!(endpoint.model, "qwen-turbo");
        assert_eq!(endpoint.temperature, 0.2);
        // Unset fields fall back to the agent endpoint.
        assert_eq!(endpoint.api_base, agent.api_base);
        assert_eq!(endpoint.api_key, agent.api_key);
    }

    #[test]
    fn agent_endpoint_copies_agent_fields() {
        let agent = agent();
        let endpoint = ReasoningEndpoint::for_agent(&agent);
        assert_eq!(endpoint.model, "qwen3-max");
        assert_eq!(endpoint.temperature, 0.5);
    }

    #[test]
    fn decision_tool_schema_lists_five_actions() {
        let tool = decision_tool();
        let actions = tool["function"]["parameters"]["properties"]["action"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(actions.len(), 5);
        assert!(actions.contains(&serde_json::json!("NO_ACTION")));
    }

    #[test]
    fn parse_tool_call_response() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "submit_decision",
                            "arguments": "{\"action\": \"NO_ACTION\", \"rationale\": \"wait\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 3200, "completion_tokens": 80}
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices.len(), 1);
        let counts = token_counts(&response);
        assert_eq!(counts.prompt, 3200);
        assert_eq!(counts.completion, 80);
    }

    #[test]
    fn parse_text_only_response() {
        let body = r#"{
            "choices": [{"message": {"content": "Let me think about the market..."}}]
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(response.choices[0].message.tool_calls.is_none());
        assert_eq!(token_counts(&response), TokenCounts::default());
    }
}
