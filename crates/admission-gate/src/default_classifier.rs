use async_trait::async_trait;
use trade_core::{FeatureContext, PositionProbe};

use crate::labels::{
    ClassifierLabels, PatternCandidate, StructureRelevance, TrendConsistency, VolatilityStatus,
};
use crate::{GateClassifier, GateConfig, GateError};

/// Rule-of-thumb classifier used when no external classifier is configured.
pub struct DefaultClassifier {
    config: GateConfig,
}

impl DefaultClassifier {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn labels(&self, ctx: &FeatureContext) -> ClassifierLabels {
        let fast = ctx.timeframe(self.config.fast_timeframe);
        let slow = ctx.timeframe(self.config.slow_timeframe);
        let price = ctx.price;

        let trend = match (fast, slow) {
            (Some(f), Some(s)) if price > 0.0 => {
                if f.ema_diff == 0.0 || s.ema_diff == 0.0 {
                    TrendConsistency::Weak
                } else if f.ema_diff.signum() != s.ema_diff.signum() {
                    TrendConsistency::Conflicting
                } else if f.ema_diff.abs() / price >= 0.002 && s.ema_diff.abs() / price >= 0.002 {
                    TrendConsistency::Strong
                } else {
                    TrendConsistency::Medium
                }
            }
            _ => TrendConsistency::Weak,
        };

        let atr = fast.map(|f| f.atr).unwrap_or(0.0);
        let volatility = if price <= 0.0 || atr <= 0.0 {
            VolatilityStatus::Normal
        } else {
            match atr / price {
                r if r < 0.0008 => VolatilityStatus::Low,
                r if r < 0.01 => VolatilityStatus::Normal,
                r if r < 0.025 => VolatilityStatus::High,
                _ => VolatilityStatus::Extreme,
            }
        };

        let structure = match fast.map(|f| (f.support, f.resistance)) {
            Some((Some(support), Some(resistance))) if atr > 0.0 => {
                if price > resistance || price < support {
                    StructureRelevance::BreakoutZone
                } else if resistance - price <= 0.5 * atr {
                    StructureRelevance::NearResistance
                } else if price - support <= 0.5 * atr {
                    StructureRelevance::NearSupport
                } else {
                    StructureRelevance::MidRange
                }
            }
            _ => StructureRelevance::Missing,
        };

        let trending = matches!(trend, TrendConsistency::Strong | TrendConsistency::Medium);
        let pattern = match structure {
            StructureRelevance::BreakoutZone => PatternCandidate::Breakout,
            _ if trending => PatternCandidate::TrendContinuation,
            StructureRelevance::NearResistance | StructureRelevance::NearSupport => {
                PatternCandidate::Reversal
            }
            _ => PatternCandidate::None,
        };

        ClassifierLabels {
            trend,
            volatility,
            structure,
            pattern,
            danger_flags: Vec::new(),
            reason: format!(
                "default: atr/price={:.4}",
                if price > 0.0 { atr / price } else { 0.0 }
            ),
        }
    }
}

#[async_trait]
impl GateClassifier for DefaultClassifier {
    async fn classify(
        &self,
        _symbol: &str,
        ctx: &FeatureContext,
        _position: Option<&PositionProbe>,
    ) -> Result<ClassifierLabels, GateError> {
        Ok(self.labels(ctx))
    }
}
