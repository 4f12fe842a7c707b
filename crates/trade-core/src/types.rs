use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Top-of-book quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Mid price, falling back to last and then to whichever side is quoted.
    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            return Some((self.bid + self.ask) / 2.0);
        }
        if self.last > 0.0 {
            return Some(self.last);
        }
        if self.bid > 0.0 {
            return Some(self.bid);
        }
        if self.ask > 0.0 {
            return Some(self.ask);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "m1" => Ok(Timeframe::M1),
            "5m" | "m5" => Ok(Timeframe::M5),
            "15m" | "m15" => Ok(Timeframe::M15),
            "30m" | "m30" => Ok(Timeframe::M30),
            "1h" | "h1" | "60m" => Ok(Timeframe::H1),
            "4h" | "h4" => Ok(Timeframe::H4),
            "1d" | "d1" => Ok(Timeframe::D1),
            other => Err(format!("unsupported timeframe '{}'", other)),
        }
    }
}

/// Quote plus candles for every tracked timeframe, as fetched from one source.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub quote: Quote,
    pub frames: BTreeMap<Timeframe, Vec<Bar>>,
}

impl MarketSnapshot {
    /// Smallest timeframe present in the snapshot.
    pub fn base_timeframe(&self) -> Option<Timeframe> {
        self.frames.keys().next().copied()
    }

    pub fn latest_base_bar(&self) -> Option<&Bar> {
        self.frames.values().next().and_then(|bars| bars.last())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtrTrend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeFeatures {
    pub close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_diff: f64,
    pub atr: f64,
    pub atr_trend: AtrTrend,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeLabel {
    pub name: String,
    pub confidence: f64,
}

/// Indicator context handed to the gate and the advisors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContext {
    pub symbol: String,
    pub price: f64,
    pub frames: BTreeMap<Timeframe, TimeframeFeatures>,
    /// Closes of the base timeframe, oldest first.
    pub recent_closes: Vec<f64>,
    pub regime: Option<RegimeLabel>,
}

impl FeatureContext {
    pub fn timeframe(&self, tf: Timeframe) -> Option<&TimeframeFeatures> {
        self.frames.get(&tf)
    }

    /// Highest resistance across all timeframes.
    pub fn outer_resistance(&self) -> Option<f64> {
        self.frames
            .values()
            .filter_map(|f| f.resistance)
            .filter(|v| *v > 0.0)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Lowest support across all timeframes.
    pub fn outer_support(&self) -> Option<f64> {
        self.frames
            .values()
            .filter_map(|f| f.support)
            .filter(|v| *v > 0.0)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64, last: f64) -> Quote {
        Quote {
            bid,
            ask,
            last,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_mid_price_fallbacks() {
        assert_eq!(quote(99.0, 101.0, 0.0).mid(), Some(100.0));
        assert_eq!(quote(0.0, 101.0, 100.5).mid(), Some(100.5));
        assert_eq!(quote(0.0, 101.0, 0.0).mid(), Some(101.0));
        assert_eq!(quote(99.0, 0.0, 0.0).mid(), Some(99.0));
        assert_eq!(quote(0.0, 0.0, 0.0).mid(), None);
    }

    #[test]
    fn test_timeframe_parse_and_order() {
        assert_eq!("30m".parse::<Timeframe>(), Ok(Timeframe::M30));
        assert_eq!("H4".parse::<Timeframe>(), Ok(Timeframe::H4));
        assert!("2w".parse::<Timeframe>().is_err());
        assert!(Timeframe::M30 < Timeframe::H1);
        assert_eq!(Timeframe::D1.minutes(), 1440);
    }

    #[test]
    fn test_outer_levels() {
        let mut frames = BTreeMap::new();
        for (tf, support, resistance) in [
            (Timeframe::M30, 99.0, 101.0),
            (Timeframe::H1, 97.0, 104.0),
        ] {
            frames.insert(
                tf,
                TimeframeFeatures {
                    close: 100.0,
                    ema_fast: 100.0,
                    ema_slow: 100.0,
                    ema_diff: 0.0,
                    atr: 1.0,
                    atr_trend: AtrTrend::Flat,
                    support: Some(support),
                    resistance: Some(resistance),
                },
            );
        }
        let ctx = FeatureContext {
            symbol: "BTCUSDm".to_string(),
            price: 100.0,
            frames,
            recent_closes: vec![],
            regime: None,
        };
        assert_eq!(ctx.outer_support(), Some(97.0));
        assert_eq!(ctx.outer_resistance(), Some(104.0));
    }
}
