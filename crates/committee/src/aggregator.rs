use serde::{Deserialize, Serialize};
use trade_core::{clamp_unit, AdvisoryOpinion, Bias, CommitteeVerdict, ConflictLevel, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeMode {
    /// Weighted vote with a deadband.
    Full,
    /// Two cheap advisors that must agree before the full committee is consulted.
    FrontGate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitteeConfig {
    pub mode: CommitteeMode,
    /// Weights by advisor priority, highest first.
    pub weights: Vec<f64>,
    pub deadband: f64,
    pub confidence_floor: f64,
    pub low_conflict_above: f64,
    pub medium_conflict_from: f64,
}

impl CommitteeConfig {
    pub fn full() -> Self {
        Self {
            mode: CommitteeMode::Full,
            weights: vec![0.5, 0.3, 0.2],
            deadband: 0.25,
            confidence_floor: 0.0,
            low_conflict_above: 0.75,
            medium_conflict_from: 0.4,
        }
    }

    pub fn front_gate() -> Self {
        Self {
            mode: CommitteeMode::FrontGate,
            weights: vec![0.6, 0.4],
            deadband: 0.0,
            confidence_floor: 0.55,
            low_conflict_above: 0.75,
            medium_conflict_from: 0.4,
        }
    }

    fn conflict_for(&self, score: f64) -> ConflictLevel {
        let magnitude = score.abs();
        if magnitude > self.low_conflict_above {
            ConflictLevel::Low
        } else if magnitude >= self.medium_conflict_from {
            ConflictLevel::Medium
        } else {
            ConflictLevel::High
        }
    }
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self::full()
    }
}

/// Reduce opinions to a verdict according to the configured mode.
///
/// Opinions are matched to weights by position. `placeholder` is only
/// consulted in front-gate mode when every advisor abstained.
pub fn aggregate(
    config: &CommitteeConfig,
    opinions: &[AdvisoryOpinion],
    placeholder: Option<&AdvisoryOpinion>,
) -> CommitteeVerdict {
    match config.mode {
        CommitteeMode::Full => aggregate_full(config, opinions),
        CommitteeMode::FrontGate => aggregate_front_gate(config, opinions, placeholder),
    }
}

fn aggregate_full(config: &CommitteeConfig, opinions: &[AdvisoryOpinion]) -> CommitteeVerdict {
    // Missing members vote 0.
    let signed: Vec<f64> = (0..config.weights.len())
        .map(|i| opinions.get(i).map(|o| o.bias.signed()).unwrap_or(0.0))
        .collect();

    let mut score: f64 = config
        .weights
        .iter()
        .zip(&signed)
        .map(|(w, s)| w * s)
        .sum();

    if is_deadlock(&signed) {
        tracing::debug!("Committee deadlock veto: lead vote {} opposed by both others", signed[0]);
        score = 0.0;
    }

    let score = score.clamp(-1.0, 1.0);
    let final_decision = if score > config.deadband {
        Direction::Long
    } else if score < -config.deadband {
        Direction::Short
    } else {
        Direction::NoTrade
    };

    CommitteeVerdict {
        final_decision,
        final_confidence: clamp_unit(score.abs()),
        weighted_score: score,
        conflict_level: config.conflict_for(score),
        members: opinions.to_vec(),
    }
}

/// Lead vote directional and both remaining votes identical and opposite.
fn is_deadlock(signed: &[f64]) -> bool {
    match signed {
        [lead, a, b] => *lead != 0.0 && *a == -*lead && *b == -*lead,
        _ => false,
    }
}

fn aggregate_front_gate(
    config: &CommitteeConfig,
    opinions: &[AdvisoryOpinion],
    placeholder: Option<&AdvisoryOpinion>,
) -> CommitteeVerdict {
    let live: Vec<&AdvisoryOpinion> = opinions
        .iter()
        .filter(|o| o.bias != Bias::Abstain)
        .collect();

    match live.as_slice() {
        [] => match placeholder {
            Some(fallback) => {
                tracing::warn!("Front gate: all advisors failed, using placeholder {}", fallback.source_id);
                let mut members = opinions.to_vec();
                members.push(fallback.clone());
                single_opinion(fallback, members)
            }
            None => CommitteeVerdict {
                final_decision: Direction::NoTrade,
                final_confidence: 0.0,
                weighted_score: 0.0,
                conflict_level: ConflictLevel::High,
                members: opinions.to_vec(),
            },
        },
        [only] => single_opinion(only, opinions.to_vec()),
        [first, second, ..] => front_gate_pair(config, first, second, opinions.to_vec()),
    }
}

fn single_opinion(opinion: &AdvisoryOpinion, members: Vec<AdvisoryOpinion>) -> CommitteeVerdict {
    let final_decision = opinion.bias.direction();
    let confidence = if final_decision == Direction::NoTrade {
        0.0
    } else {
        clamp_unit(opinion.confidence)
    };
    CommitteeVerdict {
        final_decision,
        final_confidence: confidence,
        weighted_score: opinion.bias.signed() * confidence,
        conflict_level: ConflictLevel::Low,
        members,
    }
}

fn front_gate_pair(
    config: &CommitteeConfig,
    first: &AdvisoryOpinion,
    second: &AdvisoryOpinion,
    members: Vec<AdvisoryOpinion>,
) -> CommitteeVerdict {
    let w_first = config.weights.first().copied().unwrap_or(0.5);
    let w_second = config.weights.get(1).copied().unwrap_or(0.5);

    let no_trade = |conflict_level, final_confidence| CommitteeVerdict {
        final_decision: Direction::NoTrade,
        final_confidence,
        weighted_score: 0.0,
        conflict_level,
        members: members.clone(),
    };

    if first.bias != second.bias {
        return no_trade(ConflictLevel::High, 0.0);
    }
    if first.bias == Bias::NoTrade {
        return no_trade(ConflictLevel::Low, 0.0);
    }

    let confidence = clamp_unit(first.confidence.min(second.confidence));
    if confidence < config.confidence_floor {
        return no_trade(ConflictLevel::Medium, confidence);
    }

    let score = (w_first * first.confidence + w_second * second.confidence) * first.bias.signed();
    CommitteeVerdict {
        final_decision: first.bias.direction(),
        final_confidence: confidence,
        weighted_score: score.clamp(-1.0, 1.0),
        conflict_level: ConflictLevel::Low,
        members,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn op(id: &str, bias: Bias, confidence: f64) -> AdvisoryOpinion {
        AdvisoryOpinion::new(id, bias, confidence)
    }

    fn full(biases: [Bias; 3]) -> CommitteeVerdict {
        let opinions = vec![
            op("deepseek", biases[0], 0.8),
            op("gpt", biases[1], 0.7),
            op("glm", biases[2], 0.6),
        ];
        aggregate(&CommitteeConfig::full(), &opinions, None)
    }

    #[test]
    fn test_lead_opposed_by_unanimous_minority_is_vetoed() {
        let verdict = full([Bias::Long, Bias::Short, Bias::Short]);
        assert_eq!(verdict.weighted_score, 0.0);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.conflict_level, ConflictLevel::High);

        let verdict = full([Bias::Short, Bias::Long, Bias::Long]);
        assert_eq!(verdict.weighted_score, 0.0);
    }

    #[test]
    fn test_majority_long_is_medium_conflict() {
        let verdict = full([Bias::Long, Bias::Long, Bias::Short]);
        assert_relative_eq!(verdict.weighted_score, 0.6, epsilon = 1e-9);
        assert_eq!(verdict.final_decision, Direction::Long);
        assert_eq!(verdict.conflict_level, ConflictLevel::Medium);
        assert_relative_eq!(verdict.final_confidence, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_lead_alone_with_neutral_others() {
        let opinions = vec![
            op("deepseek", Bias::Long, 0.5),
            op("gpt", Bias::NoTrade, 0.0),
            op("glm", Bias::NoTrade, 0.0),
        ];
        let verdict = aggregate(&CommitteeConfig::full(), &opinions, None);
        assert_relative_eq!(verdict.weighted_score, 0.5);
        assert_eq!(verdict.final_decision, Direction::Long);
        assert_eq!(verdict.conflict_level, ConflictLevel::Medium);
    }

    #[test]
    fn test_unanimous_is_low_conflict() {
        let verdict = full([Bias::Short, Bias::Short, Bias::Short]);
        assert_relative_eq!(verdict.weighted_score, -1.0);
        assert_eq!(verdict.final_decision, Direction::Short);
        assert_eq!(verdict.conflict_level, ConflictLevel::Low);
    }

    #[test]
    fn test_score_inside_deadband_is_no_trade() {
        // 0.3 - 0.2 = 0.1
        let verdict = full([Bias::NoTrade, Bias::Long, Bias::Short]);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.conflict_level, ConflictLevel::High);
    }

    #[test]
    fn test_score_bounded_for_every_triple() {
        let all = [Bias::Long, Bias::Short, Bias::NoTrade, Bias::Abstain];
        for a in all {
            for b in all {
                for c in all {
                    let verdict = full([a, b, c]);
                    assert!((-1.0..=1.0).contains(&verdict.weighted_score));
                    let vetoed = a.signed() != 0.0
                        && b.signed() == -a.signed()
                        && c.signed() == -a.signed();
                    if vetoed {
                        assert_eq!(verdict.weighted_score, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_partial_set_counts_missing_as_abstain() {
        let opinions = vec![op("deepseek", Bias::Long, 0.9)];
        let verdict = aggregate(&CommitteeConfig::full(), &opinions, None);
        assert_relative_eq!(verdict.weighted_score, 0.5);
        assert_eq!(verdict.final_decision, Direction::Long);
        assert_eq!(verdict.members.len(), 1);
    }

    #[test]
    fn test_front_gate_agreement_takes_min_confidence() {
        let opinions = vec![op("gpt", Bias::Long, 0.9), op("glm", Bias::Long, 0.7)];
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::Long);
        assert_relative_eq!(verdict.final_confidence, 0.7);
        assert_eq!(verdict.conflict_level, ConflictLevel::Low);
        assert!(verdict.weighted_score > 0.0);
    }

    #[test]
    fn test_front_gate_below_floor_is_medium_no_trade() {
        let opinions = vec![op("gpt", Bias::Short, 0.9), op("glm", Bias::Short, 0.5)];
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.conflict_level, ConflictLevel::Medium);
        assert_relative_eq!(verdict.final_confidence, 0.5);
    }

    #[test]
    fn test_front_gate_disagreement_is_high_conflict() {
        let opinions = vec![op("gpt", Bias::Long, 0.9), op("glm", Bias::NoTrade, 0.9)];
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.conflict_level, ConflictLevel::High);
    }

    #[test]
    fn test_front_gate_both_neutral() {
        let opinions = vec![op("gpt", Bias::NoTrade, 0.9), op("glm", Bias::NoTrade, 0.8)];
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.conflict_level, ConflictLevel::Low);
    }

    #[test]
    fn test_front_gate_degrades_to_single_advisor() {
        let opinions = vec![
            AdvisoryOpinion::abstain("gpt", "timeout"),
            op("glm", Bias::Short, 0.4),
        ];
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::Short);
        assert_relative_eq!(verdict.final_confidence, 0.4);
        assert_eq!(verdict.conflict_level, ConflictLevel::Low);
    }

    #[test]
    fn test_front_gate_all_failed_uses_placeholder() {
        let opinions = vec![
            AdvisoryOpinion::abstain("gpt", "timeout"),
            AdvisoryOpinion::abstain("glm", "http 500"),
        ];
        let fallback = op("cached", Bias::Long, 0.6);
        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, Some(&fallback));
        assert_eq!(verdict.final_decision, Direction::Long);
        assert_eq!(verdict.members.len(), 3);

        let verdict = aggregate(&CommitteeConfig::front_gate(), &opinions, None);
        assert_eq!(verdict.final_decision, Direction::NoTrade);
        assert_eq!(verdict.final_confidence, 0.0);
    }
}
