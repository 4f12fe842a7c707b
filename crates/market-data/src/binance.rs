use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use trade_core::{Bar, DataError, MarketDataSource, Quote, Timeframe};

use crate::http::{build_client, get_json, send_request};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
    #[serde(default)]
    time: Option<i64>,
}

/// Binance USDT-M futures REST client used as the backup feed.
#[derive(Clone)]
pub struct BinanceFuturesSource {
    base_url: String,
    client: Client,
    symbol_map: HashMap<String, String>,
}

impl BinanceFuturesSource {
    pub fn new(base_url: &str, timeout: Duration, symbol_map: HashMap<String, String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout),
            symbol_map,
        }
    }

    /// Exchange symbol for an agent symbol, defaulting to the symbol itself.
    pub fn exchange_symbol<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.symbol_map
            .get(symbol)
            .map(String::as_str)
            .unwrap_or(symbol)
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_kline(row: &Value) -> Option<Bar> {
    let fields = row.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    let open_time = fields[0].as_i64()?;
    Some(Bar {
        timestamp: DateTime::from_timestamp_millis(open_time)?,
        open: number(&fields[1])?,
        high: number(&fields[2])?,
        low: number(&fields[3])?,
        close: number(&fields[4])?,
        volume: number(&fields[5]).unwrap_or(0.0),
    })
}

fn parse_klines(rows: &[Value]) -> Vec<Bar> {
    let mut bars: Vec<Bar> = rows.iter().filter_map(parse_kline).collect();
    bars.sort_by_key(|b| b.timestamp);
    bars
}

fn parse_ticker(ticker: BookTicker) -> Result<Quote, DataError> {
    let bid: f64 = ticker
        .bid_price
        .parse()
        .map_err(|_| DataError::Decode(format!("binance: bad bid '{}'", ticker.bid_price)))?;
    let ask: f64 = ticker
        .ask_price
        .parse()
        .map_err(|_| DataError::Decode(format!("binance: bad ask '{}'", ticker.ask_price)))?;
    let timestamp = ticker
        .time
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    Ok(Quote {
        bid,
        ask,
        last: 0.0,
        timestamp,
    })
}

#[async_trait]
impl MarketDataSource for BinanceFuturesSource {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let limit = limit.min(1500).to_string();
        let request = self.client.get(&url).query(&[
            ("symbol", self.exchange_symbol(symbol)),
            ("interval", timeframe.label()),
            ("limit", limit.as_str()),
        ]);
        let rows: Vec<Value> = get_json(&self.client, request, "binance").await?;
        Ok(parse_klines(&rows))
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DataError> {
        let url = format!("{}/fapi/v1/ticker/bookTicker", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("symbol", self.exchange_symbol(symbol))]);
        let ticker: BookTicker = get_json(&self.client, request, "binance").await?;
        parse_ticker(ticker)
    }

    async fn health_check(&self) -> Result<(), DataError> {
        let url = format!("{}/fapi/v1/ping", self.base_url);
        let response = send_request(&self.client, self.client.get(&url), "binance").await?;
        if !response.status().is_success() {
            return Err(DataError::Http(format!(
                "binance: ping returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_klines() {
        let rows: Vec<Value> = serde_json::from_str(
            r#"[
                [1700001800000, "2.0", "3.0", "1.0", "2.5", "10.5", 1700003599999],
                [1700000000000, "1.0", "2.0", "0.5", "1.5", "4", 1700001799999],
                ["bad"]
            ]"#,
        )
        .unwrap();
        let bars = parse_klines(&rows);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 1.5);
        assert_eq!(bars[1].volume, 10.5);
    }

    #[test]
    fn test_parse_ticker() {
        let ticker: BookTicker = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","bidPrice":"50000.10","bidQty":"1","askPrice":"50000.30","askQty":"2","time":1700000000000}"#,
        )
        .unwrap();
        let quote = parse_ticker(ticker).unwrap();
        assert!((quote.mid().unwrap() - 50000.2).abs() < 1e-9);
    }

    #[test]
    fn test_symbol_map() {
        let mut map = HashMap::new();
        map.insert("BTCUSDm".to_string(), "BTCUSDT".to_string());
        let source = BinanceFuturesSource::new(DEFAULT_BASE_URL, Duration::from_secs(5), map);
        assert_eq!(source.exchange_symbol("BTCUSDm"), "BTCUSDT");
        assert_eq!(source.exchange_symbol("ETHUSDT"), "ETHUSDT");
    }
}
