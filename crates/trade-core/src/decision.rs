use std::fmt;

use serde::{Deserialize, Serialize};

/// Directional stance of one advisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Long,
    Short,
    NoTrade,
    /// The advisor failed or timed out and casts no vote.
    Abstain,
}

impl Bias {
    pub fn signed(&self) -> f64 {
        match self {
            Bias::Long => 1.0,
            Bias::Short => -1.0,
            Bias::NoTrade | Bias::Abstain => 0.0,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Bias::Long => Direction::Long,
            Bias::Short => Direction::Short,
            Bias::NoTrade | Bias::Abstain => Direction::NoTrade,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    NoTrade,
}

impl Direction {
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::NoTrade => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConflictLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictLevel::Low => "low",
            ConflictLevel::Medium => "medium",
            ConflictLevel::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryOpinion {
    pub source_id: String,
    pub bias: Bias,
    pub confidence: f64,
    pub entry: Option<f64>,
    pub stop: Option<f64>,
    pub take: Option<f64>,
    pub rr: Option<f64>,
    pub position_size: Option<f64>,
    pub risk_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub raw: serde_json::Value,
}

impl AdvisoryOpinion {
    pub fn new(source_id: impl Into<String>, bias: Bias, confidence: f64) -> Self {
        Self {
            source_id: source_id.into(),
            bias,
            confidence: clamp_unit(confidence),
            entry: None,
            stop: None,
            take: None,
            rr: None,
            position_size: None,
            risk_score: None,
            quality_score: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Placeholder vote for an advisor whose call failed.
    pub fn abstain(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut opinion = Self::new(source_id, Bias::Abstain, 0.0);
        opinion.raw = serde_json::json!({ "error": reason.into() });
        opinion
    }

    pub fn with_levels(mut self, entry: f64, stop: f64, take: f64) -> Self {
        self.entry = Some(entry);
        self.stop = Some(stop);
        self.take = Some(take);
        self
    }

    pub fn has_levels(&self) -> bool {
        self.entry.is_some() && self.stop.is_some() && self.take.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeVerdict {
    pub final_decision: Direction,
    pub final_confidence: f64,
    pub weighted_score: f64,
    pub conflict_level: ConflictLevel,
    pub members: Vec<AdvisoryOpinion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    Hold,
}

impl TradeAction {
    pub fn side(&self) -> Option<Side> {
        match self {
            TradeAction::OpenLong => Some(Side::Long),
            TradeAction::OpenShort => Some(Side::Short),
            TradeAction::Hold => None,
        }
    }
}

impl From<Side> for TradeAction {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => TradeAction::OpenLong,
            Side::Short => TradeAction::OpenShort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub risk_reward: f64,
    pub confidence: f64,
    pub position_size: Option<f64>,
    pub risk_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub reason: String,
}

impl TradeDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            entry: 0.0,
            stop: 0.0,
            take: 0.0,
            risk_reward: 0.0,
            confidence: 0.0,
            position_size: None,
            risk_score: None,
            quality_score: None,
            reason: reason.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == TradeAction::Hold
    }
}

/// Reviewer's instruction for an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Hold,
    Close,
    Adjust {
        new_stop: Option<f64>,
        new_take: Option<f64>,
        new_rr: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOpinion {
    pub action: ReviewAction,
    pub reason: String,
    pub confidence: f64,
}

impl ReviewOpinion {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: ReviewAction::Hold,
            reason: reason.into(),
            confidence: 0.0,
        }
    }
}

/// Read-only view of an open position passed to the gate and reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionProbe {
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Reward-to-risk ratio, or 0 when the stop distance is degenerate.
pub fn risk_reward(entry: f64, stop: f64, take: f64) -> f64 {
    let risk = (entry - stop).abs();
    if risk <= f64::EPSILON {
        return 0.0;
    }
    (take - entry).abs() / risk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abstain_casts_no_vote() {
        let opinion = AdvisoryOpinion::abstain("gpt", "timeout");
        assert_eq!(opinion.bias, Bias::Abstain);
        assert_eq!(opinion.bias.signed(), 0.0);
        assert_eq!(opinion.confidence, 0.0);
        assert_eq!(opinion.raw["error"], "timeout");
    }

    #[test]
    fn test_confidence_clamped_on_construction() {
        assert_eq!(AdvisoryOpinion::new("a", Bias::Long, 1.7).confidence, 1.0);
        assert_eq!(AdvisoryOpinion::new("a", Bias::Long, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_risk_reward() {
        assert_eq!(risk_reward(100.0, 98.0, 104.0), 2.0);
        assert_eq!(risk_reward(100.0, 100.0, 104.0), 0.0);
    }

    #[test]
    fn test_review_action_serde_tag() {
        let json = serde_json::to_value(ReviewAction::Adjust {
            new_stop: Some(99.0),
            new_take: None,
            new_rr: None,
        })
        .unwrap();
        assert_eq!(json["action"], "adjust");
    }
}
