use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendConsistency {
    Strong,
    Medium,
    Weak,
    Conflicting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityStatus {
    Low,
    Normal,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureRelevance {
    NearSupport,
    NearResistance,
    BreakoutZone,
    MidRange,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCandidate {
    None,
    Breakout,
    Reversal,
    TrendContinuation,
}

impl TrendConsistency {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "strong" => Self::Strong,
            "medium" => Self::Medium,
            "conflicting" => Self::Conflicting,
            _ => Self::Weak,
        }
    }
}

impl VolatilityStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "low" => Self::Low,
            "high" => Self::High,
            "extreme" => Self::Extreme,
            _ => Self::Normal,
        }
    }
}

impl StructureRelevance {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "near_support" => Self::NearSupport,
            "near_resistance" => Self::NearResistance,
            "breakout_zone" => Self::BreakoutZone,
            "mid_range" => Self::MidRange,
            _ => Self::Missing,
        }
    }
}

impl PatternCandidate {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "breakout" => Self::Breakout,
            "reversal" => Self::Reversal,
            "trend_continuation" => Self::TrendContinuation,
            _ => Self::None,
        }
    }
}

/// Flags that always block admission.
pub const BLOCKING_FLAGS: [&str; 4] = ["wick_noise", "whipsaw", "low_liquidity", "chop_range"];

/// Fold synonyms onto the canonical flag names.
pub fn normalize_flag(raw: &str) -> String {
    let flag = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match flag.as_str() {
        "wick" | "noise" | "wick_noise" => "wick_noise".to_string(),
        "chop" | "choppy" | "chop_range" => "chop_range".to_string(),
        _ => flag,
    }
}

/// Market labels produced by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierLabels {
    pub trend: TrendConsistency,
    pub volatility: VolatilityStatus,
    pub structure: StructureRelevance,
    pub pattern: PatternCandidate,
    pub danger_flags: Vec<String>,
    pub reason: String,
}

impl Default for ClassifierLabels {
    fn default() -> Self {
        Self {
            trend: TrendConsistency::Weak,
            volatility: VolatilityStatus::Normal,
            structure: StructureRelevance::Missing,
            pattern: PatternCandidate::None,
            danger_flags: Vec::new(),
            reason: String::new(),
        }
    }
}

impl ClassifierLabels {
    /// Build labels from a classifier's JSON object, defaulting unknown values.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let text = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        };

        let danger_flags = match map.get("danger_flags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(normalize_flag)
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(normalize_flag)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            trend: TrendConsistency::parse(&text(&["trend_consistency", "trend"])),
            volatility: VolatilityStatus::parse(&text(&["volatility_status", "volatility"])),
            structure: StructureRelevance::parse(&text(&["structure_relevance", "structure"])),
            pattern: PatternCandidate::parse(&text(&["pattern_candidate", "pattern"])),
            danger_flags,
            reason: map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_with_defaults() {
        let value = serde_json::json!({
            "trend_consistency": "Strong",
            "volatility_status": "wild",
            "structure_relevance": "near_support",
            "danger_flags": ["Choppy", "wick", ""],
            "reason": "clean pullback"
        });
        let labels = ClassifierLabels::from_json(value.as_object().unwrap());
        assert_eq!(labels.trend, TrendConsistency::Strong);
        assert_eq!(labels.volatility, VolatilityStatus::Normal);
        assert_eq!(labels.structure, StructureRelevance::NearSupport);
        assert_eq!(labels.pattern, PatternCandidate::None);
        assert_eq!(labels.danger_flags, vec!["chop_range", "wick_noise"]);
    }

    #[test]
    fn test_flag_string_list() {
        let value = serde_json::json!({ "danger_flags": "low liquidity, whipsaw" });
        let labels = ClassifierLabels::from_json(value.as_object().unwrap());
        assert_eq!(labels.danger_flags, vec!["low_liquidity", "whipsaw"]);
    }
}
