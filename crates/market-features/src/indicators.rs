use trade_core::{AtrTrend, Bar};

/// Exponential Moving Average, seeded with the SMA of the first `period` values.
/// Output is aligned to `data[period - 1..]`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut prev = data[..period].iter().sum::<f64>() / period as f64;
    result.push(prev);

    for value in &data[period..] {
        prev = (value - prev) * multiplier + prev;
        result.push(prev);
    }

    result
}

/// Average True Range (Wilder smoothing)
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let high_low = w[1].high - w[1].low;
            let high_close = (w[1].high - w[0].close).abs();
            let low_close = (w[1].low - w[0].close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect();

    let mut atr_values = Vec::with_capacity(true_ranges.len() - period + 1);
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    atr_values.push(atr);

    for tr in &true_ranges[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
        atr_values.push(atr);
    }

    atr_values
}

/// Direction of a series over its last `window` points.
pub fn trend_label(series: &[f64], window: usize) -> AtrTrend {
    if window < 2 || series.len() < window {
        return AtrTrend::Flat;
    }
    let tail = &series[series.len() - window..];
    let delta = tail[tail.len() - 1] - tail[0];
    if delta > 0.0 {
        AtrTrend::Rising
    } else if delta < 0.0 {
        AtrTrend::Falling
    } else {
        AtrTrend::Flat
    }
}

pub struct StructureLevels {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

/// Range of the `window` bars preceding the latest one.
///
/// The latest bar is excluded so that a close beyond the range reads as a
/// breakout instead of widening the range itself.
pub fn structure_levels(bars: &[Bar], window: usize) -> StructureLevels {
    if window == 0 || bars.len() < 2 {
        return StructureLevels {
            support: None,
            resistance: None,
        };
    }
    let prior = &bars[..bars.len() - 1];
    let start = prior.len().saturating_sub(window);
    let recent = &prior[start..];

    let support = recent.iter().map(|b| b.low).reduce(f64::min);
    let resistance = recent.iter().map(|b| b.high).reduce(f64::max);

    StructureLevels {
        support,
        resistance,
    }
}
