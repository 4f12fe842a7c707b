use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use trade_core::{Bar, DataError, MarketDataSource, Quote, Timeframe};

use crate::http::{build_client, get_json};

#[derive(Debug, Deserialize)]
struct Mt5Bar {
    time: f64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct Mt5Price {
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
    #[serde(default)]
    last: Option<f64>,
    #[serde(default)]
    time: Option<f64>,
}

/// Client for the MT5 HTTP bridge.
#[derive(Clone)]
pub struct Mt5BridgeSource {
    base_url: String,
    client: Client,
}

impl Mt5BridgeSource {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout),
        }
    }
}

fn epoch_seconds(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    DateTime::from_timestamp(value as i64, 0)
}

fn into_bars(rows: Vec<Mt5Bar>) -> Vec<Bar> {
    let mut bars: Vec<Bar> = rows
        .into_iter()
        .filter_map(|row| {
            Some(Bar {
                timestamp: epoch_seconds(row.time)?,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.tick_volume,
            })
        })
        .collect();
    bars.sort_by_key(|b| b.timestamp);
    bars
}

fn into_quote(price: Mt5Price) -> Quote {
    Quote {
        bid: price.bid.unwrap_or(0.0),
        ask: price.ask.unwrap_or(0.0),
        last: price.last.unwrap_or(0.0),
        timestamp: price.time.and_then(epoch_seconds).unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl MarketDataSource for Mt5BridgeSource {
    fn name(&self) -> &str {
        "mt5"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let url = format!(
            "{}/ohlc/{}/{}/{}",
            self.base_url,
            symbol,
            timeframe.label(),
            limit
        );
        let rows: Vec<Mt5Bar> = get_json(&self.client, self.client.get(&url), "mt5").await?;
        let bars = into_bars(rows);
        tracing::debug!("MT5 returned {} {} bars for {}", bars.len(), timeframe, symbol);
        Ok(bars)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DataError> {
        let url = format!("{}/price/{}", self.base_url, symbol);
        let price: Mt5Price = get_json(&self.client, self.client.get(&url), "mt5").await?;
        let quote = into_quote(price);
        if quote.mid().is_none() {
            return Err(DataError::Decode(format!("mt5: empty quote for {}", symbol)));
        }
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_sorted_and_invalid_time_dropped() {
        let rows: Vec<Mt5Bar> = serde_json::from_str(
            r#"[
                {"time": 1700001800, "open": 2, "high": 3, "low": 1, "close": 2.5, "tick_volume": 10},
                {"time": 1700000000, "open": 1, "high": 2, "low": 0.5, "close": 1.5},
                {"time": 0, "open": 1, "high": 1, "low": 1, "close": 1}
            ]"#,
        )
        .unwrap();
        let bars = into_bars(rows);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.5);
        assert_eq!(bars[0].volume, 0.0);
        assert_eq!(bars[1].volume, 10.0);
    }

    #[test]
    fn test_quote_defaults_missing_sides() {
        let price: Mt5Price = serde_json::from_str(r#"{"bid": 2000.1, "time": 1700000000}"#).unwrap();
        let quote = into_quote(price);
        assert_eq!(quote.ask, 0.0);
        assert_eq!(quote.mid(), Some(2000.1));
        assert_eq!(quote.timestamp.timestamp(), 1_700_000_000);
    }
}
