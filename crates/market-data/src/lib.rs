//! HTTP market-data sources: an MT5 bridge as primary and Binance USDT-M
//! futures as backup.

mod http;
pub mod binance;
pub mod mt5;

pub use binance::BinanceFuturesSource;
pub use mt5::Mt5BridgeSource;
