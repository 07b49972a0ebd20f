//! Prompt assembly for the GATHER stage. Templates are opaque strings with
//! `{placeholder}` slots; resolution of which template an agent uses lives
//! behind `PromptSource` so the storage/editing side stays external.

use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use cadence_models::{AgentConfig, MarketSnapshot, Order, Position};

pub trait PromptSource: Send + Sync {
    /// Template text for this agent. Must always return something usable;
    /// fall back to the built-in default on any resolution problem.
    fn resolve(&self, agent: &AgentConfig) -> String;
}

/// Resolves `prompt_file` names against a directory, defaulting to the
/// built-in template when the agent has no file or it cannot be read.
pub struct FilePromptSource {
    dir: Option<PathBuf>,
}

impl FilePromptSource {
    pub fn new(dir: Option<String>) -> Self {
        Self {
            dir: dir.map(PathBuf::from),
        }
    }
}

impl PromptSource for FilePromptSource {
    fn resolve(&self, agent: &AgentConfig) -> String {
        let Some(file) = &agent.prompt_file else {
            return DEFAULT_TEMPLATE.to_string();
        };
        let path = match &self.dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(config_id = %agent.config_id, path = %path.display(), error = %e, "Prompt file unreadable, using default template");
                DEFAULT_TEMPLATE.to_string()
            }
        }
    }
}

pub const DEFAULT_TEMPLATE: &str = "\
You are a disciplined crypto futures trading agent analyzing {symbol}.
Mode: {mode}. You see the market once per cycle; there is no intra-cycle monitoring.

Current time: {current_time}
Last price: {price}
Account balance: {balance} USDT
Leverage (informational): {leverage}x

Open position:
{positions}

Open orders:
{orders}

Market data by timeframe:
{market_data}

Previous analysis history (newest first):
{history}

Decide on exactly one action for this cycle and submit it through the
structured decision call. Manage existing orders before adding exposure:
cancel resting orders that no longer make sense, close the position when
the thesis is invalidated, and only enter when the setup justifies it.
Entries must state price and size{stops_clause}. Explain your reasoning in
the rationale.";

/// Substitute `{name}` placeholders. Unknown placeholders render empty,
/// so template edits never break an older agent config. Braces inside
/// substituted values are left untouched.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['}', '{', '\n']) {
            Some(end) if after.as_bytes()[end] == b'}' && is_placeholder(&after[..end]) => {
                let name = &after[..end];
                if let Some((_, value)) = vars.iter().find(|(k, _)| *k == name) {
                    out.push_str(value);
                }
                rest = &after[end + 1..];
            }
            _ => {
                // Not a placeholder: emit the brace literally and move on.
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Variables available to every template.
pub fn build_context(agent: &AgentConfig, snapshot: &MarketSnapshot) -> Vec<(&'static str, String)> {
    let stops_clause = match agent.mode {
        cadence_models::AgentMode::Strategy => {
            ", and must set both stop_loss and take_profit".to_string()
        }
        cadence_models::AgentMode::Real => String::new(),
    };

    vec![
        ("symbol", snapshot.symbol.clone()),
        ("mode", agent.mode.as_str().to_string()),
        (
            "current_time",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("price", snapshot.price.to_string()),
        ("balance", snapshot.balance.to_string()),
        ("leverage", agent.leverage.to_string()),
        ("positions", position_text(snapshot.position.as_ref())),
        ("orders", orders_text(&snapshot.open_orders)),
        ("market_data", market_data_text(snapshot)),
        ("history", history_text(snapshot)),
        ("stops_clause", stops_clause),
    ]
}

fn position_text(position: Option<&Position>) -> String {
    match position {
        None => "(none)".to_string(),
        Some(p) => {
            let pnl = p
                .unrealized_pnl
                .map(|v| format!(", unrealized PnL {v}"))
                .unwrap_or_default();
            format!(
                "{} {} @ entry {}{}",
                p.side.as_str(),
                p.size,
                p.entry_price,
                pnl
            )
        }
    }
}

fn orders_text(orders: &[Order]) -> String {
    if orders.is_empty() {
        return "(none)".to_string();
    }
    orders
        .iter()
        .map(|o| {
            let mut line = format!("- id {} | {} {} @ {}", o.order_id, o.side.as_str(), o.size, o.price);
            if let Some(tp) = o.take_profit {
                line.push_str(&format!(" | tp {tp}"));
            }
            if let Some(sl) = o.stop_loss {
                line.push_str(&format!(" | sl {sl}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn market_data_text(snapshot: &MarketSnapshot) -> String {
    if snapshot.frames.is_empty() {
        return "(no indicator data)".to_string();
    }
    snapshot
        .frames
        .iter()
        .map(|(tf, frame)| {
            let mut parts = vec![format!("close {:.4}", frame.close)];
            if let Some(v) = frame.ema_21 {
                parts.push(format!("ema21 {v:.4}"));
            }
            if let Some(v) = frame.rsi_14 {
                parts.push(format!("rsi14 {v:.1}"));
            }
            if let Some(v) = frame.atr_14 {
                parts.push(format!("atr14 {v:.4}"));
            }
            if let Some(m) = &frame.macd {
                parts.push(format!("macd {:.4}/{:.4}", m.macd, m.signal));
            }
            if let Some(b) = &frame.bollinger {
                parts.push(format!("bb {:.4}..{:.4}", b.lower, b.upper));
            }
            parts.push(format!(
                "recent closes {}",
                frame
                    .recent_closes
                    .iter()
                    .map(|c| format!("{c:.4}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            ));
            format!("[{}] {}", tf.as_str(), parts.join(" | "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn history_text(snapshot: &MarketSnapshot) -> String {
    if snapshot.recent_summaries.is_empty() {
        return "(no history yet)".to_string();
    }
    snapshot
        .recent_summaries
        .iter()
        .map(|s| {
            format!(
                "[{}] {}",
                s.created_at.format("%Y-%m-%d %H:%M"),
                s.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
