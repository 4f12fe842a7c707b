use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trade_core::{
    AtrTrend, Bar, DataError, FeatureContext, FeatureProvider, MarketSnapshot, RegimeLabel,
    Timeframe, TimeframeFeatures,
};

use crate::indicators::{atr, ema, structure_levels, trend_label};

/// Feature provider built on EMA/ATR and rolling range structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorFeatureProvider {
    pub ema_fast_period: usize,
    pub ema_slow_period: usize,
    pub atr_period: usize,
    pub atr_trend_window: usize,
    pub recent_closes: usize,
}

impl Default for IndicatorFeatureProvider {
    fn default() -> Self {
        Self {
            ema_fast_period: 20,
            ema_slow_period: 60,
            atr_period: 14,
            atr_trend_window: 5,
            recent_closes: 20,
        }
    }
}

impl IndicatorFeatureProvider {
    /// Bars of range used for support/resistance, wider on lower timeframes.
    fn structure_window(tf: Timeframe) -> usize {
        match tf {
            Timeframe::M1 | Timeframe::M5 | Timeframe::M15 | Timeframe::M30 => 40,
            Timeframe::H1 => 30,
            Timeframe::H4 => 20,
            Timeframe::D1 => 15,
        }
    }

    fn timeframe_features(&self, tf: Timeframe, bars: &[Bar]) -> Option<TimeframeFeatures> {
        let last = bars.last()?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        // Short histories fall back to the latest close so a thin frame still contributes.
        let ema_fast = ema(&closes, self.ema_fast_period)
            .last()
            .copied()
            .unwrap_or(last.close);
        let ema_slow = ema(&closes, self.ema_slow_period)
            .last()
            .copied()
            .unwrap_or(last.close);

        let atr_series = atr(bars, self.atr_period);
        let atr_value = atr_series.last().copied().unwrap_or(0.0);
        let levels = structure_levels(bars, Self::structure_window(tf));

        Some(TimeframeFeatures {
            close: last.close,
            ema_fast,
            ema_slow,
            ema_diff: ema_fast - ema_slow,
            atr: atr_value,
            atr_trend: trend_label(&atr_series, self.atr_trend_window),
            support: levels.support,
            resistance: levels.resistance,
        })
    }

    /// Regime from the slowest timeframe with a usable ATR.
    fn regime(frames: &BTreeMap<Timeframe, TimeframeFeatures>) -> Option<RegimeLabel> {
        let features = frames.values().rev().find(|f| f.atr > 0.0)?;
        let strength = (features.ema_diff.abs() / features.atr).min(1.0);

        let (name, confidence) = if strength >= 0.5 {
            if features.ema_diff > 0.0 {
                ("trend_up", strength)
            } else {
                ("trend_down", strength)
            }
        } else if features.atr_trend == AtrTrend::Rising {
            ("volatile_range", 1.0 - strength)
        } else {
            ("range", 1.0 - strength)
        };

        Some(RegimeLabel {
            name: name.to_string(),
            confidence,
        })
    }
}

impl FeatureProvider for IndicatorFeatureProvider {
    fn compute(&self, snapshot: &MarketSnapshot) -> Result<FeatureContext, DataError> {
        let base_bars = snapshot
            .frames
            .values()
            .next()
            .filter(|bars| !bars.is_empty())
            .ok_or_else(|| {
                DataError::InsufficientData(format!("{}: no base timeframe bars", snapshot.symbol))
            })?;

        let mut frames = BTreeMap::new();
        for (tf, bars) in &snapshot.frames {
            if let Some(features) = self.timeframe_features(*tf, bars) {
                frames.insert(*tf, features);
            }
        }

        let last_close = base_bars.last().map(|b| b.close).unwrap_or_default();
        let price = snapshot.quote.mid().unwrap_or(last_close);

        let start = base_bars.len().saturating_sub(self.recent_closes);
        let recent_closes = base_bars[start..].iter().map(|b| b.close).collect();
        let regime = Self::regime(&frames);

        tracing::debug!(
            "Features for {}: price={:.5} timeframes={} regime={:?}",
            snapshot.symbol,
            price,
            frames.len(),
            regime.as_ref().map(|r| r.name.as_str())
        );

        Ok(FeatureContext {
            symbol: snapshot.symbol.clone(),
            price,
            frames,
            recent_closes,
            regime,
        })
    }
}
