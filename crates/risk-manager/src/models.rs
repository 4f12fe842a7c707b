use std::fmt;

use anyhow::{bail, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading specification of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSpec {
    pub contract_size: f64,
    pub min_lot: f64,
    pub lot_step: f64,
    pub max_lot: f64,
    pub max_leverage: f64,
    /// Multiplier applied on top of exchange margin.
    pub margin_buffer: f64,
    /// Scale applied to advisor-specified quantities.
    pub volatility_discount: f64,
}

impl Default for ContractSpec {
    fn default() -> Self {
        Self {
            contract_size: 1.0,
            min_lot: 0.01,
            lot_step: 0.01,
            max_lot: 100.0,
            max_leverage: 100.0,
            margin_buffer: 1.2,
            volatility_discount: 1.0,
        }
    }
}

impl ContractSpec {
    pub fn validate(&self) -> Result<()> {
        if self.contract_size <= 0.0 {
            bail!("contract_size must be positive");
        }
        if self.lot_step <= 0.0 {
            bail!("lot_step must be positive");
        }
        if self.min_lot <= 0.0 || self.min_lot > self.max_lot {
            bail!("min_lot must be positive and <= max_lot");
        }
        if self.margin_buffer < 1.0 {
            bail!("margin_buffer must be >= 1.0");
        }
        if self.volatility_discount <= 0.0 || self.volatility_discount > 1.0 {
            bail!("volatility_discount must be between 0 and 1");
        }
        Ok(())
    }

    /// Floor to `lot_step`, cap at `max_lot`, and return 0 below `min_lot`.
    pub fn quantize(&self, raw: f64) -> f64 {
        if !raw.is_finite() || raw <= 0.0 {
            return 0.0;
        }
        let (Some(step), Some(min_lot)) = (
            Decimal::from_f64(self.lot_step),
            Decimal::from_f64(self.min_lot),
        ) else {
            return 0.0;
        };
        if step <= Decimal::ZERO {
            return 0.0;
        }
        // Tolerance absorbs binary float noise such as 0.03 / 0.01 = 2.9999999.
        let tolerance = Decimal::new(1, 9);
        let floor_to_step = |value: Decimal| ((value / step) + tolerance).floor() * step;

        let max_lot = Decimal::from_f64(self.max_lot).filter(|m| *m > Decimal::ZERO);
        let mut qty = match Decimal::from_f64(raw) {
            Some(q) => floor_to_step(q),
            None => match max_lot {
                Some(max) => floor_to_step(max),
                None => return 0.0,
            },
        };
        if let Some(max) = max_lot {
            if qty > max {
                qty = floor_to_step(max);
            }
        }
        if qty < min_lot {
            return 0.0;
        }
        qty.to_f64().unwrap_or(0.0)
    }

    /// Margin to reserve for `quantity` at `price`.
    pub fn margin_for(&self, price: f64, quantity: f64) -> f64 {
        let notional = price * self.contract_size * quantity;
        let leveraged = if self.max_leverage > 0.0 {
            notional / self.max_leverage
        } else {
            notional
        };
        leveraged * self.margin_buffer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingNote {
    Ok,
    QtyBelowMin,
    InsufficientEquity,
    NoRiskUnit,
}

impl SizingNote {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingNote::Ok => "ok",
            SizingNote::QtyBelowMin => "qty_below_min",
            SizingNote::InsufficientEquity => "insufficient_equity",
            SizingNote::NoRiskUnit => "no_risk_unit",
        }
    }
}

impl fmt::Display for SizingNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantized, margin-checked order size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub quantity: f64,
    pub margin_required: f64,
    pub risk_amount: f64,
    pub note: SizingNote,
    /// Quantity was reduced to fit available equity.
    pub margin_shrunk: bool,
}

impl OrderPlan {
    pub fn rejected(note: SizingNote) -> Self {
        Self {
            quantity: 0.0,
            margin_required: 0.0,
            risk_amount: 0.0,
            note,
            margin_shrunk: false,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.quantity > 0.0 && self.note == SizingNote::Ok
    }
}
