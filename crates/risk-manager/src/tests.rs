use approx::assert_relative_eq;
use trade_core::{
    AdvisoryOpinion, Bias, CommitteeVerdict, ConflictLevel, Direction, TradeAction, TradeDecision,
};

use crate::models::{ContractSpec, SizingNote};
use crate::sizer::PositionSizer;
use crate::validation::{decision_from_verdict, reprice, validate_decision};

fn btc_spec() -> ContractSpec {
    ContractSpec {
        contract_size: 1.0,
        min_lot: 0.01,
        lot_step: 0.01,
        max_lot: 100.0,
        max_leverage: 200.0,
        margin_buffer: 1.2,
        volatility_discount: 1.0,
    }
}

fn long(entry: f64, stop: f64, take: f64) -> TradeDecision {
    TradeDecision {
        action: TradeAction::OpenLong,
        entry,
        stop,
        take,
        risk_reward: 0.0,
        confidence: 0.7,
        position_size: None,
        risk_score: None,
        quality_score: None,
        reason: "test".to_string(),
    }
}

fn short(entry: f64, stop: f64, take: f64) -> TradeDecision {
    TradeDecision {
        action: TradeAction::OpenShort,
        ..long(entry, stop, take)
    }
}

// --- ContractSpec ---

#[test]
fn test_quantize_floors_to_step() {
    let spec = btc_spec();
    assert_relative_eq!(spec.quantize(0.129), 0.12, epsilon = 1e-12);
    assert_relative_eq!(spec.quantize(0.03), 0.03, epsilon = 1e-12);
    assert_relative_eq!(spec.quantize(250.0), 100.0, epsilon = 1e-12);
    assert_eq!(spec.quantize(0.009), 0.0);
    assert_eq!(spec.quantize(-1.0), 0.0);
    assert_eq!(spec.quantize(f64::NAN), 0.0);
}

#[test]
fn test_margin_for() {
    let spec = btc_spec();
    // 50000 * 0.5 / 200 * 1.2
    assert_relative_eq!(spec.margin_for(50_000.0, 0.5), 150.0, epsilon = 1e-9);
}

#[test]
fn test_spec_validation() {
    assert!(ContractSpec::default().validate().is_ok());
    let bad = ContractSpec {
        lot_step: 0.0,
        ..ContractSpec::default()
    };
    assert!(bad.validate().is_err());
    let bad_buffer = ContractSpec {
        margin_buffer: 0.8,
        ..ContractSpec::default()
    };
    assert!(bad_buffer.validate().is_err());
}

// --- PositionSizer ---

#[test]
fn test_sizer_rejects_invalid_risk() {
    assert!(PositionSizer::new(0.0).is_err());
    assert!(PositionSizer::new(0.5).is_err());
    assert!(PositionSizer::new(0.02).is_ok());
}

#[test]
fn test_small_account_below_min_lot() {
    let plan = PositionSizer::default().size(&long(50_000.0, 49_500.0, 51_500.0), 10.0, &btc_spec());
    assert_eq!(plan.note, SizingNote::QtyBelowMin);
    assert_eq!(plan.quantity, 0.0);
    assert!(!plan.is_executable());
}

#[test]
fn test_fixed_fractional_size() {
    let plan =
        PositionSizer::default().size(&long(50_000.0, 49_500.0, 51_500.0), 25_000.0, &btc_spec());
    assert_eq!(plan.note, SizingNote::Ok);
    assert_relative_eq!(plan.quantity, 0.5, epsilon = 1e-9);
    assert_relative_eq!(plan.margin_required, 150.0, epsilon = 1e-6);
    assert_relative_eq!(plan.risk_amount, 250.0, epsilon = 1e-6);
    assert!(!plan.margin_shrunk);
}

#[test]
fn test_specified_quantity_shrinks_to_fit_margin() {
    let mut decision = long(50_000.0, 49_500.0, 51_500.0);
    decision.position_size = Some(0.05);
    let plan = PositionSizer::default().size(&decision, 5.0, &btc_spec());
    assert_eq!(plan.note, SizingNote::Ok);
    assert_relative_eq!(plan.quantity, 0.01, epsilon = 1e-9);
    assert_relative_eq!(plan.margin_required, 3.0, epsilon = 1e-6);
    assert!(plan.margin_shrunk);
    assert!(plan.margin_required <= 5.0);
}

#[test]
fn test_insufficient_equity_for_min_lot() {
    let mut decision = long(50_000.0, 49_500.0, 51_500.0);
    decision.position_size = Some(0.05);
    let plan = PositionSizer::default().size(&decision, 2.0, &btc_spec());
    assert_eq!(plan.note, SizingNote::InsufficientEquity);
    assert_eq!(plan.quantity, 0.0);
}

#[test]
fn test_volatility_discount_scales_specified_quantity() {
    let spec = ContractSpec {
        volatility_discount: 0.5,
        ..btc_spec()
    };
    let mut decision = long(50_000.0, 49_500.0, 51_500.0);
    decision.position_size = Some(0.2);
    let plan = PositionSizer::default().size(&decision, 100_000.0, &spec);
    assert_relative_eq!(plan.quantity, 0.1, epsilon = 1e-9);
}

#[test]
fn test_zero_stop_distance_has_no_risk_unit() {
    let plan = PositionSizer::default().size(&long(100.0, 100.0, 110.0), 10_000.0, &btc_spec());
    assert_eq!(plan.note, SizingNote::NoRiskUnit);
}

#[test]
fn test_hold_is_not_sized() {
    let plan = PositionSizer::default().size(&TradeDecision::hold("x"), 10_000.0, &btc_spec());
    assert_eq!(plan.quantity, 0.0);
    assert_eq!(plan.note.as_str(), "no_risk_unit");
}

#[test]
fn test_sizing_invariants_hold_across_inputs() {
    let lots = [(0.01, 0.01), (0.1, 0.1), (1.0, 1.0), (0.01, 0.1), (0.001, 0.01)];
    let mut executable = 0;
    for equity in [0.0, 50.0, 1_000.0, 25_000.0, 1_000_000.0] {
        for risk in [0.005, 0.01, 0.05, 0.2] {
            let sizer = PositionSizer::new(risk).unwrap();
            for entry in [1.1, 2_000.0, 60_000.0] {
                for stop_frac in [0.0, 0.001, 0.01, 0.1] {
                    for requested in [None, Some(0.5), Some(1_000.0)] {
                        for leverage in [1.0, 20.0, 500.0] {
                            for (lot_step, min_lot) in lots {
                                for max_lot in [5.0, 100.0] {
                                    let spec = ContractSpec {
                                        contract_size: 1.0,
                                        min_lot,
                                        lot_step,
                                        max_lot,
                                        max_leverage: leverage,
                                        margin_buffer: 1.2,
                                        volatility_discount: 1.0,
                                    };
                                    let decision = TradeDecision {
                                        position_size: requested,
                                        ..long(entry, entry * (1.0 - stop_frac), entry * 1.2)
                                    };
                                    let plan = sizer.size(&decision, equity, &spec);
                                    let case = format!(
                                        "equity={equity} risk={risk} entry={entry} stop_frac={stop_frac} \
                                         requested={requested:?} leverage={leverage} step={lot_step} \
                                         min={min_lot} max={max_lot} -> {plan:?}"
                                    );

                                    if plan.quantity == 0.0 {
                                        assert!(!plan.is_executable(), "{case}");
                                        continue;
                                    }
                                    executable += 1;
                                    assert_eq!(plan.note, SizingNote::Ok, "{case}");
                                    let steps = plan.quantity / lot_step;
                                    assert!((steps - steps.round()).abs() < 1e-6, "off-step: {case}");
                                    assert!(plan.quantity >= min_lot - 1e-12, "below min: {case}");
                                    assert!(plan.quantity <= max_lot + 1e-12, "above max: {case}");
                                    assert!(plan.margin_required <= equity * (1.0 + 1e-9), "margin: {case}");
                                    assert_relative_eq!(
                                        plan.margin_required,
                                        spec.margin_for(entry, plan.quantity),
                                        epsilon = 1e-9
                                    );
                                    if requested.is_none() {
                                        assert!(
                                            plan.risk_amount <= equity * risk * (1.0 + 1e-6),
                                            "risk: {case}"
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    assert!(executable > 0);
}

// --- validation ---

#[test]
fn test_valid_long_recomputes_rr() {
    let checked = validate_decision(long(100.0, 98.0, 106.0));
    assert_eq!(checked.action, TradeAction::OpenLong);
    assert_relative_eq!(checked.risk_reward, 3.0, epsilon = 1e-9);
}

#[test]
fn test_misordered_levels_downgrade_to_hold() {
    let bad_long = validate_decision(long(100.0, 101.0, 106.0));
    assert!(bad_long.is_hold());
    assert_eq!(bad_long.reason, "rejected: bad_long_levels");

    let bad_short = validate_decision(short(100.0, 98.0, 95.0));
    assert!(bad_short.is_hold());
    assert_eq!(bad_short.reason, "rejected: bad_short_levels");

    let invalid = validate_decision(long(0.0, 98.0, 106.0));
    assert_eq!(invalid.reason, "rejected: invalid_prices");
}

#[test]
fn test_extreme_rr_rejected() {
    let checked = validate_decision(long(100.0, 99.99, 200.0));
    assert_eq!(checked.reason, "rejected: rr_out_of_range");
}

#[test]
fn test_hold_passes_through() {
    let hold = TradeDecision::hold("committee_no_trade: conflict=high");
    assert_eq!(validate_decision(hold.clone()), hold);
}

#[test]
fn test_reprice_revalidates() {
    let moved = reprice(validate_decision(short(100.0, 102.0, 96.0)), 99.0);
    assert_eq!(moved.entry, 99.0);
    assert_relative_eq!(moved.risk_reward, 1.0, epsilon = 1e-9);

    // Entry slips past the stop.
    let broken = reprice(validate_decision(short(100.0, 102.0, 96.0)), 103.0);
    assert!(broken.is_hold());
}

fn verdict(decision: Direction, members: Vec<AdvisoryOpinion>) -> CommitteeVerdict {
    CommitteeVerdict {
        final_decision: decision,
        final_confidence: 0.7,
        weighted_score: 0.8,
        conflict_level: ConflictLevel::Low,
        members,
    }
}

#[test]
fn test_decision_takes_levels_from_first_agreeing_member() {
    let members = vec![
        AdvisoryOpinion::new("deepseek", Bias::Long, 0.8),
        AdvisoryOpinion::new("gpt", Bias::Short, 0.6).with_levels(100.0, 102.0, 96.0),
        AdvisoryOpinion::new("glm", Bias::Long, 0.7).with_levels(100.0, 98.0, 104.0),
    ];
    let decision = decision_from_verdict(&verdict(Direction::Long, members));
    assert_eq!(decision.action, TradeAction::OpenLong);
    assert_eq!(decision.stop, 98.0);
    assert_relative_eq!(decision.risk_reward, 2.0, epsilon = 1e-9);
    assert_relative_eq!(decision.confidence, 0.7, epsilon = 1e-9);
    assert!(decision.reason.contains("levels=glm"));
}

#[test]
fn test_decision_without_levels_holds() {
    let members = vec![AdvisoryOpinion::new("deepseek", Bias::Short, 0.8)];
    let decision = decision_from_verdict(&verdict(Direction::Short, members));
    assert!(decision.is_hold());
    assert!(decision.reason.starts_with("missing_levels"));

    let mut no_trade = verdict(Direction::NoTrade, vec![]);
    no_trade.conflict_level = ConflictLevel::High;
    assert_eq!(
        decision_from_verdict(&no_trade).reason,
        "committee_no_trade: conflict=high"
    );
}
