use chrono::{DateTime, Duration, Utc};
use position_store::PositionRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trade_core::{risk_reward, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTrigger {
    Interval,
    AdverseMove,
}

/// Price distance from entry in the losing direction, never negative.
pub fn adverse_move(position: &PositionRecord, price: f64) -> f64 {
    match position.side {
        Side::Long => (position.entry - price).max(0.0),
        Side::Short => (price - position.entry).max(0.0),
    }
}

/// Whether an open position is due for review, and why.
///
/// An adverse move of at least `adverse_atr` ATRs triggers immediately;
/// otherwise a review is due once `interval` has passed since the last one.
pub fn review_due(
    position: &PositionRecord,
    price: f64,
    atr: f64,
    now: DateTime<Utc>,
    interval: Duration,
    adverse_atr: f64,
) -> Option<ReviewTrigger> {
    if !position.is_open() {
        return None;
    }
    if atr > 0.0 && adverse_move(position, price) >= atr * adverse_atr {
        return Some(ReviewTrigger::AdverseMove);
    }
    if now - position.reviewed_or_created() >= interval {
        return Some(ReviewTrigger::Interval);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentPlan {
    pub stop: f64,
    pub take: f64,
    pub risk_reward: f64,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustSkip {
    #[error("no_change")]
    NoChange,
    #[error("invalid_levels")]
    InvalidLevels,
}

/// Resolve a reviewer's adjust request into concrete levels.
///
/// The stop only ever tightens. Without an explicit take, `new_rr`
/// retargets the take from the resulting stop distance.
pub fn plan_adjustment(
    position: &PositionRecord,
    new_stop: Option<f64>,
    new_take: Option<f64>,
    new_rr: Option<f64>,
) -> Result<AdjustmentPlan, AdjustSkip> {
    let entry = position.entry;
    let proposed_stop = new_stop.filter(|s| s.is_finite() && *s > 0.0);
    let stop = match (position.side, proposed_stop) {
        (Side::Long, Some(s)) => s.max(position.stop),
        (Side::Short, Some(s)) => s.min(position.stop),
        (_, None) => position.stop,
    };

    let take = match (new_take.filter(|t| t.is_finite() && *t > 0.0), new_rr) {
        (Some(t), _) => t,
        (None, Some(rr)) if rr > 0.0 => entry + position.side.sign() * rr * (entry - stop).abs(),
        _ => position.take,
    };

    // A stop may trail past entry; it only has to stay on its side of the take.
    let ordered = match position.side {
        Side::Long => stop < take,
        Side::Short => take < stop,
    };
    if !ordered {
        return Err(AdjustSkip::InvalidLevels);
    }

    let unchanged = (stop - position.stop).abs() <= f64::EPSILON * entry.abs().max(1.0)
        && (take - position.take).abs() <= f64::EPSILON * entry.abs().max(1.0);
    if unchanged {
        return Err(AdjustSkip::NoChange);
    }

    Ok(AdjustmentPlan {
        stop,
        take,
        risk_reward: risk_reward(entry, stop, take),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use position_store::{NewPosition, PositionStore};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn position(side: Side, entry: f64, stop: f64, take: f64) -> PositionRecord {
        let mut store = PositionStore::new();
        store.open(
            NewPosition {
                symbol: "BTCUSDm".to_string(),
                side,
                entry,
                stop,
                take,
                quantity: 0.1,
                paper_trade_id: None,
            },
            t0(),
        )
    }

    #[test]
    fn test_adverse_move_triggers_before_interval() {
        let long = position(Side::Long, 100.0, 95.0, 110.0);
        let interval = Duration::minutes(30);
        let soon = t0() + Duration::minutes(5);

        assert_eq!(
            review_due(&long, 98.0, 2.0, soon, interval, 0.8),
            Some(ReviewTrigger::AdverseMove)
        );
        assert_eq!(review_due(&long, 98.5, 2.0, soon, interval, 0.8), None);
        // Favourable moves never count.
        assert_eq!(review_due(&long, 120.0, 2.0, soon, interval, 0.8), None);
        assert_eq!(review_due(&long, 90.0, 0.0, soon, interval, 0.8), None);

        let short = position(Side::Short, 100.0, 105.0, 90.0);
        assert_eq!(
            review_due(&short, 102.0, 2.0, soon, interval, 0.8),
            Some(ReviewTrigger::AdverseMove)
        );
    }

    #[test]
    fn test_interval_trigger() {
        let long = position(Side::Long, 100.0, 95.0, 110.0);
        let interval = Duration::minutes(30);
        assert_eq!(
            review_due(&long, 100.0, 2.0, t0() + Duration::minutes(30), interval, 0.8),
            Some(ReviewTrigger::Interval)
        );
    }

    #[test]
    fn test_adjustment_keeps_tighter_stop() {
        let long = position(Side::Long, 100.0, 95.0, 110.0);
        let plan = plan_adjustment(&long, Some(90.0), Some(112.0), None).unwrap();
        assert_eq!(plan.stop, 95.0);
        assert_eq!(plan.take, 112.0);
        assert!((plan.risk_reward - 2.4).abs() < 1e-9);

        let plan = plan_adjustment(&long, Some(98.0), None, None).unwrap();
        assert_eq!(plan.stop, 98.0);
        assert_eq!(plan.take, 110.0);

        let short = position(Side::Short, 100.0, 105.0, 90.0);
        let plan = plan_adjustment(&short, Some(103.0), None, Some(3.0)).unwrap();
        assert_eq!(plan.stop, 103.0);
        assert!((plan.take - 91.0).abs() < 1e-9);
    }

    #[test]
    fn test_adjustment_rejections() {
        let long = position(Side::Long, 100.0, 95.0, 110.0);
        assert_eq!(
            plan_adjustment(&long, Some(90.0), None, None),
            Err(AdjustSkip::NoChange)
        );
        assert_eq!(
            plan_adjustment(&long, Some(111.0), None, None),
            Err(AdjustSkip::InvalidLevels)
        );
        assert_eq!(
            plan_adjustment(&long, None, Some(94.0), None),
            Err(AdjustSkip::InvalidLevels)
        );
        // Trailing into profit is allowed.
        let plan = plan_adjustment(&long, Some(102.0), None, None).unwrap();
        assert_eq!(plan.stop, 102.0);
    }
}
