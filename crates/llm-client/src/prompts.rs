use serde_json::json;
use trade_core::{FeatureContext, PositionProbe};

pub const ADVISOR_SYSTEM: &str = "You are a disciplined trading advisor. Reply with one JSON object only: \
{\"bias\": \"long|short|no_trade\", \"confidence\": 0-1, \"entry\": number, \"stop_loss\": number, \
\"take_profit\": number, \"position_size\": number|null, \"risk_score\": 0-1, \"quality_score\": 0-1, \
\"reason\": string}. Use no_trade when the edge is unclear.";

pub const REVIEW_SYSTEM: &str = "You manage an open trading position. Reply with one JSON object only: \
{\"action\": \"hold|close|adjust\", \"new_stop_loss\": number|null, \"new_take_profit\": number|null, \
\"new_rr\": number|null, \"confidence\": 0-1, \"reason\": string}. Stops may only be tightened.";

pub const GATE_SYSTEM: &str = "You classify market structure before a trading decision. Reply with one JSON object only: \
{\"trend_consistency\": \"strong|medium|weak|conflicting\", \"volatility_status\": \"low|normal|high|extreme\", \
\"structure_relevance\": \"near_support|near_resistance|breakout_zone|mid_range|missing\", \
\"pattern_candidate\": \"none|breakout|reversal|trend_continuation\", \"danger_flags\": [string], \"reason\": string}.";

fn position_json(position: &PositionProbe) -> serde_json::Value {
    json!({
        "side": position.side.as_str(),
        "entry": position.entry,
        "stop": position.stop,
        "take": position.take,
    })
}

pub fn advisor_prompt(symbol: &str, ctx: &FeatureContext) -> String {
    json!({
        "task": "propose_trade",
        "symbol": symbol,
        "features": ctx,
    })
    .to_string()
}

pub fn review_prompt(symbol: &str, position: &PositionProbe, ctx: &FeatureContext) -> String {
    json!({
        "task": "review_position",
        "symbol": symbol,
        "position": position_json(position),
        "features": ctx,
    })
    .to_string()
}

pub fn gate_prompt(symbol: &str, ctx: &FeatureContext, position: Option<&PositionProbe>) -> String {
    json!({
        "task": "classify_market",
        "symbol": symbol,
        "position": position.map(position_json),
        "features": ctx,
    })
    .to_string()
}
