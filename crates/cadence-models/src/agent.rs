use serde::{Deserialize, Serialize};

/// Execution mode of a single trading agent.
///
/// REAL agents trade against the exchange and run on every scheduler tick.
/// STRATEGY agents trade a simulated ledger and only run when the tick
/// aligns to the coarse cadence boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentMode {
    Real,
    Strategy,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Real => "REAL",
            AgentMode::Strategy => "STRATEGY",
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, AgentMode::Real)
    }
}

/// API credentials for the exchange. Agents may carry their own pair;
/// otherwise the global pair from `ExchangeSettings` is used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Per-agent override for the summary-compression model. Fields left unset
/// fall back to the agent's own reasoning endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Identity and behavior of one trading agent.
///
/// `config_id` uniquely addresses all persisted rows for the agent and is
/// the isolation key for orders, logs, summaries and token usage. The core
/// treats an `AgentConfig` as read-only within a tick; edits take effect at
/// the next tick when the scheduler re-reads the configuration source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub config_id: String,
    /// Instrument, e.g. "BTC/USDT".
    pub symbol: String,
    pub mode: AgentMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Prompt-only: embedded in the decision context, never sent to the
    /// exchange.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Reasoning model identifier, e.g. "qwen3-max".
    pub model: String,
    /// OpenAI-compatible endpoint base, e.g. "https://api.example.com/v1".
    pub api_base: String,
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional prompt template file name, resolved by the prompt source.
    #[serde(default)]
    pub prompt_file: Option<String>,
    /// Optional agent-specific exchange credentials.
    #[serde(default)]
    pub exchange: Option<ExchangeCredentials>,
    #[serde(default)]
    pub summarizer: Option<SummarizerConfig>,
}

impl AgentConfig {
    /// Resolve exchange credentials: agent-specific pair first, then the
    /// global fallback.
    pub fn exchange_credentials(
        &self,
        global: Option<&ExchangeCredentials>,
    ) -> Option<ExchangeCredentials> {
        self.exchange.clone().or_else(|| global.cloned())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_leverage() -> u32 {
    20
}

fn default_temperature() -> f32 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent() -> AgentConfig {
        AgentConfig {
            config_id: "btc-qwen-0".to_string(),
            symbol: "BTC/USDT".to_string(),
            mode: AgentMode::Strategy,
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

    #[test]
    fn mode_serialization() {
        assert_eq!(serde_json::to_string(&AgentMode::Real).unwrap(), "\"REAL\"");
        assert_eq!(
            serde_json::to_string(&AgentMode::Strategy).unwrap(),
            "\"STRATEGY\""
        );
    }

    #[test]
    fn roundtrip_agent_config() {
        let agent = sample_agent();
        let json = serde_json::to_string(&agent).unwrap();
        let deserialized: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(agent, deserialized);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let json = r#"{
            "config_id": "eth-1",
            "symbol": "ETH/USDT",
            "mode": "REAL",
            "model": "gpt-4o",
            "api_base": "https://api.example.com/v1",
            "api_key": "sk-test"
        }"#;
        let agent: AgentConfig = serde_json::from_str(json).unwrap();
        assert!(agent.enabled);
        assert_eq!(agent.leverage, 20);
        assert_eq!(agent.temperature, 0.5);
        assert!(agent.exchange.is_none());
    }

    #[test]
    fn credential_fallback_order() {
        let global = ExchangeCredentials {
            api_key: "global-key".to_string(),
            api_secret: "global-secret".to_string(),
        };

        let mut agent = sample_agent();
        assert_eq!(
            agent.exchange_credentials(Some(&global)).unwrap().api_key,
            "global-key"
        );

        agent.exchange = Some(ExchangeCredentials {
            api_key: "own-key".to_string(),
            api_secret: "own-secret".to_string(),
        });
        assert_eq!(
            agent.exchange_credentials(Some(&global)).unwrap().api_key,
            "own-key"
        );

        agent.exchange = None;
        assert!(agent.exchange_credentials(None).is_none());
    }
}
