//! Validation boundary between the reasoning service and the typed
//! `Decision`. Anything that does not resolve to exactly one action from
//! the five-action vocabulary is reported back as malformed; the engine
//! decides whether to re-prompt.

use rust_decimal::Decimal;
use serde::Deserialize;

use cadence_models::{CancelParams, CloseParams, Decision, EntryParams, PositionSide, TradeAction};

/// Raw fields as models actually emit them: numbers or numeric strings,
/// legacy action aliases, `reason` instead of `rationale`.
#[derive(Debug, Deserialize)]
struct WireDecision {
    action: String,
    #[serde(default)]
    price: Option<serde_json::Value>,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    stop_loss: Option<serde_json::Value>,
    #[serde(default)]
    take_profit: Option<serde_json::Value>,
    #[serde(default)]
    valid_hours: Option<serde_json::Value>,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    cancel_order_id: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the arguments of a structured action call into a `Decision`.
/// The error string describes what was malformed, for the audit log.
pub fn parse_decision(arguments: &str) -> Result<Decision, String> {
    let json = extract_json(arguments)?;
    let wire: WireDecision =
        serde_json::from_str(&json).map_err(|e| format!("arguments are not a decision: {e}"))?;

    let rationale = wire
        .rationale
        .clone()
        .or(wire.reason.clone())
        .unwrap_or_default()
        .trim()
        .to_string();

    let action = match wire.action.trim().to_uppercase().as_str() {
        "BUY" | "BUY_LIMIT" => TradeAction::Buy(entry_params(&wire)?),
        "SELL" | "SELL_LIMIT" => TradeAction::Sell(entry_params(&wire)?),
        "CLOSE" => TradeAction::Close(CloseParams {
            side: wire.side.as_deref().map(parse_side).transpose()?,
            price: optional_decimal(&wire.price, "price")?,
            size: optional_decimal(&wire.size, "size")?
                .or(optional_decimal(&wire.amount, "amount")?),
        }),
        "CANCEL" => {
            let order_id = wire
                .order_id
                .or(wire.cancel_order_id)
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| "CANCEL without an order_id".to_string())?;
            TradeAction::Cancel(CancelParams { order_id })
        }
        "NO_ACTION" | "NOACTION" | "HOLD" | "WAIT" => TradeAction::NoAction,
        other => return Err(format!("unknown action '{other}'")),
    };

    Ok(Decision { action, rationale })
}

fn entry_params(wire: &WireDecision) -> Result<EntryParams, String> {
    let price = optional_decimal(&wire.price, "price")?
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| "entry without a positive price".to_string())?;
    let size = optional_decimal(&wire.size, "size")?
        .or(optional_decimal(&wire.amount, "amount")?)
        .filter(|s| *s > Decimal::ZERO)
        .ok_or_else(|| "entry without a positive size".to_string())?;

    Ok(EntryParams {
        price,
        size,
        stop_loss: optional_decimal(&wire.stop_loss, "stop_loss")?.filter(|v| !v.is_zero()),
        take_profit: optional_decimal(&wire.take_profit, "take_profit")?.filter(|v| !v.is_zero()),
        valid_hours: optional_i64(&wire.valid_hours).filter(|h| *h > 0),
    })
}

fn parse_side(raw: &str) -> Result<PositionSide, String> {
    match raw.trim().to_uppercase().as_str() {
        "LONG" => Ok(PositionSide::Long),
        "SHORT" => Ok(PositionSide::Short),
        other => Err(format!("unknown position side '{other}'")),
    }
}

/// Accept both JSON numbers and numeric strings.
fn optional_decimal(
    value: &Option<serde_json::Value>,
    field: &str,
) -> Result<Option<Decimal>, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .to_string()
            .parse()
            .map(Some)
            .map_err(|e| format!("{field}: {e}")),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{field} '{s}': {e}")),
        Some(other) => Err(format!("{field} has unexpected type: {other}")),
    }
}

fn optional_i64(value: &Option<serde_json::Value>) -> Option<i64> {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Extract the first JSON object from text that may carry surrounding
/// noise. Some providers return tool arguments wrapped in markdown fences
/// or prefixed with prose.
pub fn extract_json(text: &str) -> Result<String, String> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json) = extract_from_fence(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json).is_ok() {
            return Ok(json);
        }
    }

    if let Some(json) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json).is_ok() {
            return Ok(json);
        }
    }

    Err(format!(
        "no JSON object in arguments (length={})",
        text.len()
    ))
}

fn extract_from_fence(text: &str) -> Option<String> {
    for marker in ["```json\n", "```json\r\n", "```\n", "```\r\n"] {
        if let Some(start) = text.find(marker) {
            let body_start = start + marker.len();
            if let Some(end) = text[body_start..].find("```") {
                return Some(text[body_start..body_start + end].trim().to_string());
            }
        }
    }
    None
}

/// First balanced `{ ... }`, string-aware.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}
