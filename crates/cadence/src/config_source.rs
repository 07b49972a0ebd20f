use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use cadence_models::CadenceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One tick's immutable view of the configuration. The version increments
/// on every load, which makes hot reloads visible in the logs.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: CadenceConfig,
}

/// Source of the agent configuration. The scheduler calls `load` at the
/// start of every tick instead of caching across ticks, so edits take
/// effect at the next tick boundary with no restart and no carried state.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError>;
}

/// TOML file re-read on every load.
pub struct FileConfigSource {
    path: PathBuf,
    version: AtomicU64,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: AtomicU64::new(0),
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let config: CadenceConfig = toml::from_str(&text)?;
        validate(&config)?;

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(version, agents = config.agents.len(), "Configuration loaded");
        Ok(ConfigSnapshot { version, config })
    }
}

/// In-memory source for tests and embedding; `replace` simulates a hot
/// reload between ticks.
pub struct StaticConfigSource {
    config: Mutex<CadenceConfig>,
    version: AtomicU64,
}

impl StaticConfigSource {
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config: Mutex::new(config),
            version: AtomicU64::new(0),
        }
    }

    pub fn replace(&self, config: CadenceConfig) {
        *self.config.lock().expect("config mutex poisoned") = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let config = self
            .config
            .lock()
            .map_err(|e| ConfigError::Invalid(format!("config mutex poisoned: {e}")))?
            .clone();
        validate(&config)?;
        Ok(ConfigSnapshot {
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
            config,
        })
    }
}

/// `config_id` addresses every persisted row for an agent, so duplicates
/// would silently interleave two agents' histories. Refuse them outright.
fn validate(config: &CadenceConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for agent in &config.agents {
        if agent.config_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "agent for {} has an empty config_id",
                agent.symbol
            )));
        }
        if !seen.insert(agent.config_id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate config_id: {}",
                agent.config_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_models::{AgentConfig, AgentMode};

    fn agent(config_id: &str) -> AgentConfig {
        AgentConfig {
            config_id: config_id.to_string(),
            symbol: "BTC/USDT".to_string(),
            mode: AgentMode::Strategy,
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
    fn versions_increment_per_load() {
        let source = StaticConfigSource::new(CadenceConfig::default());
        assert_eq!(source.load().unwrap().version, 1);
        assert_eq!(source.load().unwrap().version, 2);
    }

    #[test]
    fn replace_is_visible_on_next_load() {
        let source = StaticConfigSource::new(CadenceConfig::default());
        assert!(source.load().unwrap().config.agents.is_empty());

        let mut config = CadenceConfig::default();
        config.agents.push(agent("a1"));
        source.replace(config);
        assert_eq!(source.load().unwrap().config.agents.len(), 1);
    }

    #[test]
    fn duplicate_config_ids_are_rejected() {
        let mut config = CadenceConfig::default();
        config.agents.push(agent("a1"));
        config.agents.push(agent("a1"));
        let source = StaticConfigSource::new(config);
        assert!(matches!(source.load(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn file_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
base_interval_minutes = 15

[[agents]]
config_id = "btc-0"
symbol = "BTC/USDT"
mode = "STRATEGY"
model = "qwen3-max"
api_base = "https://api.example.com/v1"
api_key = "sk"
"#,
        )
        .unwrap();

        let source = FileConfigSource::new(&path);
        let snapshot = source.load().unwrap();
        assert_eq!(snapshot.config.agents.len(), 1);
        assert_eq!(snapshot.config.agents[0].config_id, "btc-0");

        let missing = FileConfigSource::new(dir.path().join("absent.toml"));
        assert!(matches!(missing.load(), Err(ConfigError::Io { .. })));
    }
}
