use trade_core::{AtrTrend, FeatureContext, PositionProbe};

use crate::GateConfig;

/// Conditions that justify consulting the advisors without asking the classifier.
///
/// Returns the tags of every trigger that fired, in a stable order.
pub fn detect_triggers(
    config: &GateConfig,
    ctx: &FeatureContext,
    position: Option<&PositionProbe>,
) -> Vec<String> {
    let mut fired = Vec::new();

    if let [.., prev, last] = ctx.recent_closes.as_slice() {
        if *prev > 0.0 && ((last - prev) / prev).abs() >= config.price_move_pct {
            fired.push("price_move".to_string());
        }
    }

    if ctx.price > 0.0 {
        if let Some(resistance) = ctx.outer_resistance() {
            if ctx.price >= resistance * (1.0 + config.breakout_buffer_pct) {
                fired.push("breakout_up".to_string());
            }
        }
        if let Some(support) = ctx.outer_support() {
            if ctx.price <= support * (1.0 - config.breakout_buffer_pct) {
                fired.push("breakout_down".to_string());
            }
        }
    }

    for tf in [config.fast_timeframe, config.slow_timeframe] {
        if let Some(features) = ctx.timeframe(tf) {
            if features.atr_trend == AtrTrend::Rising {
                fired.push(format!("atr_rising_{}", tf));
            }
        }
    }

    if let (Some(fast), Some(slow)) = (
        ctx.timeframe(config.fast_timeframe),
        ctx.timeframe(config.slow_timeframe),
    ) {
        if fast.ema_diff * slow.ema_diff < 0.0 {
            fired.push("ema_flip".to_string());
        }
    }

    if let Some(position) = position {
        let atr = ctx
            .timeframe(config.fast_timeframe)
            .map(|f| f.atr)
            .unwrap_or(0.0);
        if atr > 0.0 && (ctx.price - position.entry).abs() >= config.review_deviation_atr * atr {
            fired.push("review_deviation".to_string());
        }
    }

    fired
}
