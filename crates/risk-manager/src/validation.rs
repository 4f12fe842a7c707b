use trade_core::{risk_reward, Bias, CommitteeVerdict, Side, TradeDecision};

/// Decisions with a reward-to-risk above this are treated as malformed.
pub const MAX_RISK_REWARD: f64 = 50.0;

fn downgrade(decision: &TradeDecision, tag: &str) -> TradeDecision {
    tracing::info!("Decision downgraded to hold: {} ({})", tag, decision.reason);
    let mut hold = TradeDecision::hold(format!("rejected: {}", tag));
    hold.confidence = decision.confidence;
    hold
}

/// Enforce level ordering and recompute the reward-to-risk ratio.
///
/// Holds pass through untouched; any violation downgrades to hold.
pub fn validate_decision(decision: TradeDecision) -> TradeDecision {
    let Some(side) = decision.action.side() else {
        return decision;
    };

    let (entry, stop, take) = (decision.entry, decision.stop, decision.take);
    if [entry, stop, take].iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return downgrade(&decision, "invalid_prices");
    }
    match side {
        Side::Long if !(stop < entry && entry < take) => {
            return downgrade(&decision, "bad_long_levels");
        }
        Side::Short if !(take < entry && entry < stop) => {
            return downgrade(&decision, "bad_short_levels");
        }
        _ => {}
    }

    let rr = risk_reward(entry, stop, take);
    if !(rr > 0.0 && rr <= MAX_RISK_REWARD) {
        return downgrade(&decision, "rr_out_of_range");
    }

    TradeDecision {
        risk_reward: rr,
        ..decision
    }
}

/// Move the entry to an executable price and re-validate.
pub fn reprice(decision: TradeDecision, entry: f64) -> TradeDecision {
    if decision.is_hold() {
        return decision;
    }
    validate_decision(TradeDecision { entry, ..decision })
}

/// Turn a committee verdict into a trade decision.
///
/// Levels come from the highest-priority member that agrees with the verdict
/// and supplied a full set of levels.
pub fn decision_from_verdict(verdict: &CommitteeVerdict) -> TradeDecision {
    let Some(side) = verdict.final_decision.side() else {
        return TradeDecision::hold(format!("committee_no_trade: conflict={}", verdict.conflict_level));
    };
    let wanted = match side {
        Side::Long => Bias::Long,
        Side::Short => Bias::Short,
    };

    let Some(source) = verdict
        .members
        .iter()
        .find(|o| o.bias == wanted && o.has_levels())
    else {
        return TradeDecision::hold(format!("missing_levels: committee_{}", side));
    };

    let entry = source.entry.unwrap_or_default();
    let stop = source.stop.unwrap_or_default();
    let take = source.take.unwrap_or_default();

    TradeDecision {
        action: side.into(),
        entry,
        stop,
        take,
        risk_reward: risk_reward(entry, stop, take),
        confidence: verdict.final_confidence,
        position_size: source.position_size,
        risk_score: source.risk_score,
        quality_score: source.quality_score,
        reason: format!(
            "committee_{}: score={:.2} conflict={} levels={}",
            side, verdict.weighted_score, verdict.conflict_level, source.source_id
        ),
    }
}
