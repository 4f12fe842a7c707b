use crate::labels::{
    ClassifierLabels, PatternCandidate, StructureRelevance, TrendConsistency, VolatilityStatus,
    BLOCKING_FLAGS,
};

/// Admission outcome of the rule layer before it is wrapped into a verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub admit: bool,
    pub reason: String,
    pub met_conditions: Vec<String>,
    pub failed_conditions: Vec<String>,
}

/// Deterministic overrides applied to classifier labels.
///
/// Hard blocks win over everything, then a fully favourable setup, then the
/// review path, then the marginal path.
pub fn apply_rules(labels: &ClassifierLabels, review: bool, allow_marginal: bool) -> RuleOutcome {
    let mut met = Vec::new();
    let mut failed = Vec::new();

    let trend_ok = matches!(labels.trend, TrendConsistency::Strong | TrendConsistency::Medium);
    let volatility_ok = matches!(labels.volatility, VolatilityStatus::Normal | VolatilityStatus::High);
    let structure_ok = matches!(
        labels.structure,
        StructureRelevance::NearSupport
            | StructureRelevance::NearResistance
            | StructureRelevance::BreakoutZone
    );
    let pattern_ok = labels.pattern != PatternCandidate::None;

    for (ok, pass, fail) in [
        (trend_ok, "trend_ok", "trend_weak"),
        (volatility_ok, "volatility_ok", "volatility_outside"),
        (structure_ok, "structure_ok", "structure_not_ready"),
        (pattern_ok, "pattern_candidate_ok", "pattern_missing"),
    ] {
        if ok {
            met.push(pass.to_string());
        } else {
            failed.push(fail.to_string());
        }
    }

    let block = hard_block(labels);
    let (admit, reason) = if let Some(reason) = block {
        (false, reason)
    } else if trend_ok && volatility_ok && structure_ok && pattern_ok {
        (true, "ok: good_opportunity".to_string())
    } else if review {
        (true, "ok: review_priority".to_string())
    } else if structure_ok && pattern_ok {
        if allow_marginal {
            (true, "ok: marginal".to_string())
        } else {
            (false, "blocked: marginal_disabled".to_string())
        }
    } else {
        (false, "blocked: insufficient_edge".to_string())
    };

    RuleOutcome {
        admit,
        reason,
        met_conditions: met,
        failed_conditions: failed,
    }
}

/// First hard-block reason, if any.
fn hard_block(labels: &ClassifierLabels) -> Option<String> {
    if labels.trend == TrendConsistency::Conflicting {
        return Some("blocked: trend_conflict".to_string());
    }
    if labels.volatility == VolatilityStatus::Extreme {
        return Some("blocked: atr_extreme".to_string());
    }
    match labels.structure {
        StructureRelevance::MidRange => return Some("blocked: mid_range_structure".to_string()),
        StructureRelevance::Missing => return Some("blocked: structure_missing".to_string()),
        _ => {}
    }
    if labels.pattern == PatternCandidate::None {
        return Some("blocked: no_pattern_candidate".to_string());
    }
    labels
        .danger_flags
        .iter()
        .find(|flag| BLOCKING_FLAGS.contains(&flag.as_str()))
        .map(|flag| format!("blocked: danger_{}", flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> ClassifierLabels {
        ClassifierLabels {
            trend: TrendConsistency::Strong,
            volatility: VolatilityStatus::Normal,
            structure: StructureRelevance::NearSupport,
            pattern: PatternCandidate::TrendContinuation,
            danger_flags: vec![],
            reason: String::new(),
        }
    }

    #[test]
    fn test_good_opportunity() {
        let outcome = apply_rules(&good(), false, true);
        assert!(outcome.admit);
        assert_eq!(outcome.reason, "ok: good_opportunity");
        assert_eq!(outcome.met_conditions.len(), 4);
        assert!(outcome.failed_conditions.is_empty());
    }

    #[test]
    fn test_every_hard_block_denies_even_on_review() {
        let mut cases = Vec::new();
        let mut l = good();
        l.trend = TrendConsistency::Conflicting;
        cases.push((l, "blocked: trend_conflict"));
        let mut l = good();
        l.volatility = VolatilityStatus::Extreme;
        cases.push((l, "blocked: atr_extreme"));
        let mut l = good();
        l.structure = StructureRelevance::MidRange;
        cases.push((l, "blocked: mid_range_structure"));
        let mut l = good();
        l.structure = StructureRelevance::Missing;
        cases.push((l, "blocked: structure_missing"));
        let mut l = good();
        l.pattern = PatternCandidate::None;
        cases.push((l, "blocked: no_pattern_candidate"));
        for flag in BLOCKING_FLAGS {
            let mut l = good();
            l.danger_flags = vec!["news".to_string(), flag.to_string()];
            cases.push((l, "blocked: danger_"));
        }

        for (labels, expected) in cases {
            let outcome = apply_rules(&labels, true, true);
            assert!(!outcome.admit, "{:?} should block", labels);
            assert!(outcome.reason.starts_with(expected), "{}", outcome.reason);
        }
    }

    #[test]
    fn test_unlisted_flag_does_not_block() {
        let mut labels = good();
        labels.danger_flags = vec!["news_event".to_string()];
        assert!(apply_rules(&labels, false, true).admit);
    }

    #[test]
    fn test_review_priority() {
        let mut labels = good();
        labels.trend = TrendConsistency::Weak;
        labels.volatility = VolatilityStatus::Low;
        let outcome = apply_rules(&labels, true, false);
        assert!(outcome.admit);
        assert_eq!(outcome.reason, "ok: review_priority");
    }

    #[test]
    fn test_marginal_path() {
        let mut labels = good();
        labels.trend = TrendConsistency::Weak;
        let outcome = apply_rules(&labels, false, true);
        assert!(outcome.admit);
        assert_eq!(outcome.reason, "ok: marginal");
        assert!(outcome.failed_conditions.contains(&"trend_weak".to_string()));

        let outcome = apply_rules(&labels, false, false);
        assert!(!outcome.admit);
        assert_eq!(outcome.reason, "blocked: marginal_disabled");
    }
}
