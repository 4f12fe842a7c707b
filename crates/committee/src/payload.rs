use serde_json::{Map, Value};
use trade_core::{clamp_unit, AdvisoryOpinion, Bias, ReviewAction, ReviewOpinion};

/// Result of decoding a free-form advisor reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    Parsed(AdvisoryOpinion),
    ParseError { raw_text: String, cause: String },
}

impl ParsedPayload {
    fn error(raw_text: &str, cause: impl Into<String>) -> Self {
        ParsedPayload::ParseError {
            raw_text: raw_text.to_string(),
            cause: cause.into(),
        }
    }
}

/// Strip markdown fences and decode the JSON object in a model reply.
///
/// Falls back to the widest `{...}` span when the reply wraps the object in prose.
pub fn extract_json_object(raw_text: &str) -> Result<Map<String, Value>, String> {
    let trimmed = strip_fences(raw_text.trim());

    let parsed = serde_json::from_str::<Value>(trimmed).or_else(|first_err| {
        match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<Value>(&trimmed[start..=end]).map_err(|e| e.to_string())
            }
            _ => Err(first_err.to_string()),
        }
    })?;

    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected JSON object, got {}", type_name(&other))),
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_bias(value: Option<&Value>) -> Result<Bias, String> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| "missing bias".to_string())?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "long" | "buy" => Ok(Bias::Long),
        "short" | "sell" => Ok(Bias::Short),
        "no-trade" | "no_trade" | "notrade" | "hold" | "none" | "flat" => Ok(Bias::NoTrade),
        other => Err(format!("unknown bias '{}'", other)),
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Positive finite price, or None.
fn price(value: Option<&Value>) -> Option<f64> {
    number(value).filter(|v| *v > 0.0)
}

/// Accepts 0..1 or 0..100 scales.
fn confidence(value: Option<&Value>) -> f64 {
    let raw = number(value).unwrap_or(0.0);
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    clamp_unit(scaled)
}

fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

/// Decode an advisor reply into a clamped opinion.
pub fn parse_opinion(source_id: &str, raw_text: &str) -> ParsedPayload {
    let map = match extract_json_object(raw_text) {
        Ok(map) => map,
        Err(cause) => return ParsedPayload::error(raw_text, cause),
    };

    let bias = match parse_bias(first(&map, &["bias", "decision", "direction"])) {
        Ok(bias) => bias,
        Err(cause) => return ParsedPayload::error(raw_text, cause),
    };

    let mut opinion = AdvisoryOpinion::new(source_id, bias, confidence(map.get("confidence")));
    opinion.entry = price(first(&map, &["entry", "entry_price"]));
    opinion.stop = price(first(&map, &["stop", "sl", "stop_loss"]));
    opinion.take = price(first(&map, &["take", "tp", "take_profit"]));
    opinion.rr = number(first(&map, &["rr", "risk_reward"])).filter(|v| *v > 0.0);
    opinion.position_size = number(first(&map, &["position_size", "qty", "quantity"]))
        .filter(|v| *v > 0.0);
    opinion.risk_score = number(map.get("risk_score")).map(clamp_unit);
    opinion.quality_score = number(map.get("quality_score")).map(clamp_unit);
    opinion.raw = Value::Object(map);

    ParsedPayload::Parsed(opinion)
}

/// Decode a position-review reply. Unknown actions are treated as hold.
pub fn parse_review(raw_text: &str) -> Result<ReviewOpinion, String> {
    let map = extract_json_object(raw_text)?;

    let reason = map
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let action = match map
        .get("action")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("close") => ReviewAction::Close,
        Some("adjust") => ReviewAction::Adjust {
            new_stop: price(first(&map, &["new_stop_loss", "new_stop"])),
            new_take: price(first(&map, &["new_take_profit", "new_take"])),
            new_rr: number(map.get("new_rr")).filter(|v| *v > 0.0),
        },
        _ => ReviewAction::Hold,
    };

    Ok(ReviewOpinion {
        action,
        reason,
        confidence: confidence(map.get("confidence")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(raw: &str) -> AdvisoryOpinion {
        match parse_opinion("deepseek", raw) {
            ParsedPayload::Parsed(op) => op,
            ParsedPayload::ParseError { cause, .. } => panic!("unexpected parse error: {}", cause),
        }
    }

    #[test]
    fn test_fenced_reply() {
        let op = parsed("```json\n{\"bias\": \"long\", \"confidence\": 0.72, \"entry\": 100, \"sl\": 98, \"tp\": 105}\n```");
        assert_eq!(op.bias, Bias::Long);
        assert_eq!(op.confidence, 0.72);
        assert_eq!(op.entry, Some(100.0));
        assert_eq!(op.stop, Some(98.0));
        assert_eq!(op.take, Some(105.0));
    }

    #[test]
    fn test_object_embedded_in_prose() {
        let op = parsed("Here is my view: {\"bias\": \"no_trade\", \"confidence\": 65} thanks");
        assert_eq!(op.bias, Bias::NoTrade);
        assert_eq!(op.confidence, 0.65);
    }

    #[test]
    fn test_numeric_fields_clamped_at_boundary() {
        let op = parsed(r#"{"bias": "SELL", "confidence": 250, "entry": "-1", "sl": "abc", "tp": 90, "risk_score": 3}"#);
        assert_eq!(op.bias, Bias::Short);
        assert_eq!(op.confidence, 1.0);
        assert_eq!(op.entry, None);
        assert_eq!(op.stop, None);
        assert_eq!(op.take, Some(90.0));
        assert_eq!(op.risk_score, Some(1.0));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        match parse_opinion("gpt", "I cannot answer that") {
            ParsedPayload::ParseError { raw_text, .. } => assert_eq!(raw_text, "I cannot answer that"),
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(matches!(
            parse_opinion("gpt", r#"{"bias": "sideways"}"#),
            ParsedPayload::ParseError { .. }
        ));
        assert!(matches!(parse_opinion("gpt", "[1, 2]"), ParsedPayload::ParseError { .. }));
    }

    #[test]
    fn test_review_adjust() {
        let review = parse_review(
            r#"{"action": "adjust", "new_stop_loss": 99.5, "new_take_profit": null, "reason": "trail", "confidence": 80}"#,
        )
        .unwrap();
        assert_eq!(
            review.action,
            ReviewAction::Adjust {
                new_stop: Some(99.5),
                new_take: None,
                new_rr: None
            }
        );
        assert_eq!(review.reason, "trail");
        assert_eq!(review.confidence, 0.8);
    }

    #[test]
    fn test_review_unknown_action_is_hold() {
        let review = parse_review(r#"{"action": "pyramid"}"#).unwrap();
        assert_eq!(review.action, ReviewAction::Hold);
        assert!(parse_review("nope").is_err());
    }
}
