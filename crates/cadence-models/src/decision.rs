use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::PositionSide;

/// Parameters for a BUY or SELL limit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryParams {
    pub price: Decimal,
    /// Quantity in base units of the instrument.
    pub size: Decimal,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Simulated orders expire after this many hours (default 24).
    #[serde(default)]
    pub valid_hours: Option<i64>,
}

/// Parameters for closing an existing position. All optional: a bare CLOSE
/// nets out the whole position at market.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CloseParams {
    #[serde(default)]
    pub side: Option<PositionSide>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub size: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelParams {
    pub order_id: String,
}

/// The five-action decision vocabulary. A decision cycle produces exactly
/// one terminal action; anything the reasoning service emits outside this
/// schema is rejected as malformed rather than interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy(EntryParams),
    Sell(EntryParams),
    Close(CloseParams),
    Cancel(CancelParams),
    NoAction,
}

impl TradeAction {
    /// Stable tag used in logs and persisted records.
    pub fn tag(&self) -> &'static str {
        match self {
            TradeAction::Buy(_) => "BUY",
            TradeAction::Sell(_) => "SELL",
            TradeAction::Close(_) => "CLOSE",
            TradeAction::Cancel(_) => "CANCEL",
            TradeAction::NoAction => "NO_ACTION",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, TradeAction::Buy(_) | TradeAction::Sell(_))
    }
}

/// Structured output of one decision cycle.
///
/// The rationale is kept even for NO_ACTION; it is persisted in the
/// analysis log for audit and later compressed by the summarizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    #[serde(flatten)]
    pub action: TradeAction,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn action_tags() {
        assert_eq!(TradeAction::NoAction.tag(), "NO_ACTION");
        assert_eq!(
            TradeAction::Cancel(CancelParams {
                order_id: "abc".to_string()
            })
            .tag(),
            "CANCEL"
        );
    }

    #[test]
    fn buy_action_serialization() {
        let action = TradeAction::Buy(EntryParams {
            price: dec!(64000),
            size: dec!(0.1),
            stop_loss: Some(dec!(62500)),
            take_profit: Some(dec!(67000)),
            valid_hours: Some(12),
        });
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "BUY");
        assert_eq!(json["price"], "64000");

        let parsed: TradeAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn no_action_roundtrip() {
        let decision = Decision {
            action: TradeAction::NoAction,
            rationale: "Sideways chop, no edge at current levels".to_string(),
        };
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("NO_ACTION"));
        let parsed: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }

    #[test]
    fn parse_decision_from_wire_json() {
        // The shape the reasoning service emits through the tool call.
        let json = r#"{
            "action": "SELL",
            "price": "65800",
            "size": "0.25",
            "stop_loss": "66900",
            "rationale": "Rejection at range high with fading volume"
        }"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        match &decision.action {
            TradeAction::Sell(params) => {
                assert_eq!(params.price, dec!(65800));
                assert_eq!(params.take_profit, None);
            }
            other => panic!("expected SELL, got {}", other.tag()),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let json = r#"{"action": "HEDGE", "rationale": "?"}"#;
        assert!(serde_json::from_str::<Decision>(json).is_err());
    }

    #[test]
    fn close_defaults_are_empty() {
        let json = r#"{"action": "CLOSE", "rationale": "Take profit into strength"}"#;
        let decision: Decision = serde_json::from_str(json).unwrap();
        match &decision.action {
            TradeAction::Close(params) => {
                assert_eq!(*params, CloseParams::default());
            }
            other => panic!("expected CLOSE, got {}", other.tag()),
        }
    }
}
