use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use trade_core::TradeDecision;

use crate::models::{ContractSpec, OrderPlan, SizingNote};

/// Fixed-fractional sizer with lot quantization and a margin check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizer {
    /// Fraction of equity risked between entry and stop (e.g. 0.01 = 1%).
    pub risk_per_trade: f64,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
        }
    }
}

impl PositionSizer {
    pub fn new(risk_per_trade: f64) -> Result<Self> {
        if risk_per_trade <= 0.0 || risk_per_trade > 0.2 {
            bail!("risk_per_trade must be between 0 and 0.2");
        }
        Ok(Self { risk_per_trade })
    }

    /// Size `decision` against `available_equity`.
    ///
    /// An advisor-specified quantity is honoured (scaled by the volatility
    /// discount); otherwise the quantity risks `risk_per_trade` of equity
    /// between entry and stop.
    pub fn size(
        &self,
        decision: &TradeDecision,
        available_equity: f64,
        spec: &ContractSpec,
    ) -> OrderPlan {
        if decision.is_hold() || decision.entry <= 0.0 || !decision.entry.is_finite() {
            return OrderPlan::rejected(SizingNote::NoRiskUnit);
        }
        let equity = available_equity.max(0.0);
        let unit_risk = (decision.entry - decision.stop).abs() * spec.contract_size;

        let raw_qty = match decision.position_size.filter(|q| *q > 0.0) {
            Some(requested) => requested * spec.volatility_discount,
            None => {
                if !unit_risk.is_finite() || unit_risk <= 1e-12 {
                    tracing::debug!("Sizing rejected: zero stop distance");
                    return OrderPlan::rejected(SizingNote::NoRiskUnit);
                }
                equity * self.risk_per_trade / unit_risk
            }
        };

        let mut quantity = spec.quantize(raw_qty);
        if quantity <= 0.0 {
            tracing::debug!("Sizing rejected: raw qty {:.6} below min lot {}", raw_qty, spec.min_lot);
            return OrderPlan::rejected(SizingNote::QtyBelowMin);
        }

        let mut margin_required = spec.margin_for(decision.entry, quantity);
        let mut margin_shrunk = false;
        if margin_required > equity {
            let per_unit_margin = spec.margin_for(decision.entry, 1.0);
            let mut affordable = if per_unit_margin > 0.0 {
                spec.quantize(equity / per_unit_margin)
            } else {
                0.0
            };
            // Rounding can leave the floored size one step over budget.
            if affordable > 0.0 && spec.margin_for(decision.entry, affordable) > equity {
                affordable = spec.quantize(affordable - spec.lot_step);
            }
            if affordable <= 0.0 {
                tracing::info!(
                    "Sizing rejected: margin {:.2} exceeds equity {:.2}",
                    margin_required,
                    equity
                );
                return OrderPlan::rejected(SizingNote::InsufficientEquity);
            }
            tracing::info!(
                "Sizing shrunk {} -> {} lots to fit equity {:.2}",
                quantity,
                affordable,
                equity
            );
            quantity = affordable;
            margin_required = spec.margin_for(decision.entry, quantity);
            margin_shrunk = true;
        }

        OrderPlan {
            quantity,
            margin_required,
            risk_amount: unit_risk * quantity,
            note: SizingNote::Ok,
            margin_shrunk,
        }
    }
}
