use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use admission_gate::{FallbackPolicy, GateConfig};
use anyhow::{anyhow, bail, Context, Result};
use committee::{CommitteeConfig, RetryPolicy};
use llm_client::UsageBudget;
use risk_manager::ContractSpec;
use serde::{Deserialize, Serialize};
use trade_core::Timeframe;

use crate::failover::FailoverConfig;

/// One OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEndpoint {
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Market
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub fast_timeframe: Timeframe,
    pub slow_timeframe: Timeframe,
    pub lookback_bars: usize,
    pub min_history_bars: usize,
    pub fetch_timeout_secs: u64,

    // Loop cadence
    pub cycle_interval_secs: u64,
    pub heartbeat_interval_secs: u64,

    // Risk and execution
    pub initial_equity: f64,
    pub risk_per_trade: f64,
    pub fee_rate: f64,
    pub contract_specs: HashMap<String, ContractSpec>,

    // Committee
    pub committee_weights: Vec<f64>,
    pub committee_deadband: f64,
    pub front_gate_enabled: bool,
    pub front_gate_weights: Vec<f64>,
    pub front_gate_confidence_floor: f64,
    pub advisor_timeout_secs: u64,
    pub advisor_max_attempts: u32,
    pub advisor_retry_base_ms: u64,

    // Admission gate
    pub gate_enabled: bool,
    pub gate_on_error: FallbackPolicy,
    pub gate_allow_marginal: bool,

    // Resilience
    pub failover_fail_threshold: u32,
    pub failover_recover_threshold: u32,
    pub backup_allow_open: bool,
    pub backup_max_deviation_pct: f64,
    /// Consecutive stop-losses per UTC day before opens are blocked; 0 disables.
    pub safe_mode_stop_loss_threshold: u32,
    pub signal_cooldown_minutes: i64,
    pub max_positions_per_symbol: usize,
    pub review_interval_minutes: i64,
    pub review_adverse_atr: f64,
    pub data_alert_throttle_minutes: i64,
    pub notify_holds: bool,

    // Data sources
    pub mt5_api_url: String,
    pub binance_backup_enabled: bool,
    pub binance_api_url: String,
    pub backup_symbol_map: HashMap<String, String>,

    // Advisors, highest weight first
    pub advisors: Vec<ChatEndpoint>,
    pub gate_classifier: Option<ChatEndpoint>,
    /// Tokens per UTC day across every chat endpoint; 0 only counts.
    pub llm_daily_token_budget: u64,
    pub llm_budget_warn_ratio: f64,

    pub discord_webhook_url: String,
    pub notify_send_timeout_secs: u64,
    pub database_url: String,
    pub metrics_log_interval_cycles: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["XAUUSDm".to_string(), "BTCUSDm".to_string()],
            timeframes: vec![Timeframe::M30, Timeframe::H1, Timeframe::H4, Timeframe::D1],
            fast_timeframe: Timeframe::M30,
            slow_timeframe: Timeframe::H1,
            lookback_bars: 300,
            min_history_bars: 60,
            fetch_timeout_secs: 20,
            cycle_interval_secs: 300,
            heartbeat_interval_secs: 60,
            initial_equity: 10_000.0,
            risk_per_trade: 0.01,
            fee_rate: 0.0004,
            contract_specs: HashMap::new(),
            committee_weights: vec![0.5, 0.3, 0.2],
            committee_deadband: 0.25,
            front_gate_enabled: false,
            front_gate_weights: vec![0.6, 0.4],
            front_gate_confidence_floor: 0.55,
            advisor_timeout_secs: 60,
            advisor_max_attempts: 3,
            advisor_retry_base_ms: 500,
            gate_enabled: true,
            gate_on_error: FallbackPolicy::Admit,
            gate_allow_marginal: true,
            failover_fail_threshold: 3,
            failover_recover_threshold: 5,
            backup_allow_open: false,
            backup_max_deviation_pct: 0.0025,
            safe_mode_stop_loss_threshold: 3,
            signal_cooldown_minutes: 30,
            max_positions_per_symbol: 1,
            review_interval_minutes: 30,
            review_adverse_atr: 0.8,
            data_alert_throttle_minutes: 5,
            notify_holds: false,
            mt5_api_url: String::new(),
            binance_backup_enabled: false,
            binance_api_url: market_data::binance::DEFAULT_BASE_URL.to_string(),
            backup_symbol_map: parse_symbol_map("XAUUSDm=XAUUSDT,BTCUSDm=BTCUSDT"),
            advisors: Vec::new(),
            gate_classifier: None,
            llm_daily_token_budget: 0,
            llm_budget_warn_ratio: 0.8,
            discord_webhook_url: String::new(),
            notify_send_timeout_secs: 10,
            database_url: "sqlite://trading_agent.db?mode=rwc".to_string(),
            metrics_log_interval_cycles: 12,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let timeframes = match env::var("TIMEFRAMES") {
            Ok(raw) if !raw.trim().is_empty() => parse_timeframes(&raw)?,
            _ => d.timeframes,
        };

        let contract_specs = match env::var("CONTRACT_SPECS") {
            Ok(raw) if !raw.trim().is_empty() => {
                serde_json::from_str::<HashMap<String, ContractSpec>>(&raw)
                    .context("CONTRACT_SPECS must be a JSON object of symbol -> spec")?
            }
            _ => d.contract_specs,
        };

        let backup_symbol_map = match env::var("BACKUP_SYMBOL_MAP") {
            Ok(raw) if !raw.trim().is_empty() => parse_symbol_map(&raw),
            _ => d.backup_symbol_map,
        };

        let config = Self {
            symbols: env_list("SYMBOLS").unwrap_or(d.symbols),
            timeframes,
            fast_timeframe: env_or("FAST_TIMEFRAME", d.fast_timeframe)?,
            slow_timeframe: env_or("SLOW_TIMEFRAME", d.slow_timeframe)?,
            lookback_bars: env_or("LOOKBACK_BARS", d.lookback_bars)?,
            min_history_bars: env_or("MIN_HISTORY_BARS", d.min_history_bars)?,
            fetch_timeout_secs: env_or("FETCH_TIMEOUT_SECS", d.fetch_timeout_secs)?,

            cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", d.cycle_interval_secs)?,
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", d.heartbeat_interval_secs)?,

            initial_equity: env_or("INITIAL_EQUITY", d.initial_equity)?,
            risk_per_trade: env_or("RISK_PER_TRADE", d.risk_per_trade)?,
            fee_rate: env_or("FEE_RATE", d.fee_rate)?,
            contract_specs,

            committee_weights: env_weights("COMMITTEE_WEIGHTS")?.unwrap_or(d.committee_weights),
            committee_deadband: env_or("COMMITTEE_DEADBAND", d.committee_deadband)?,
            front_gate_enabled: env_or("FRONT_GATE_ENABLED", d.front_gate_enabled)?,
            front_gate_weights: env_weights("FRONT_GATE_WEIGHTS")?.unwrap_or(d.front_gate_weights),
            front_gate_confidence_floor: env_or(
                "FRONT_GATE_CONFIDENCE_FLOOR",
                d.front_gate_confidence_floor,
            )?,
            advisor_timeout_secs: env_or("ADVISOR_TIMEOUT_SECS", d.advisor_timeout_secs)?,
            advisor_max_attempts: env_or("ADVISOR_MAX_ATTEMPTS", d.advisor_max_attempts)?,
            advisor_retry_base_ms: env_or("ADVISOR_RETRY_BASE_MS", d.advisor_retry_base_ms)?,

            gate_enabled: env_or("GATE_ENABLED", d.gate_enabled)?,
            gate_on_error: env_or("GATE_ON_ERROR", d.gate_on_error)?,
            gate_allow_marginal: env_or("GATE_ALLOW_MARGINAL", d.gate_allow_marginal)?,

            failover_fail_threshold: env_or("FAILOVER_FAIL_THRESHOLD", d.failover_fail_threshold)?,
            failover_recover_threshold: env_or(
                "FAILOVER_RECOVER_THRESHOLD",
                d.failover_recover_threshold,
            )?,
            backup_allow_open: env_or("BACKUP_ALLOW_OPEN", d.backup_allow_open)?,
            backup_max_deviation_pct: env_or(
                "BACKUP_MAX_DEVIATION_PCT",
                d.backup_max_deviation_pct,
            )?,
            // Negative values disable safe mode like zero does.
            safe_mode_stop_loss_threshold: env_or::<i64>(
                "SAFE_MODE_STOP_LOSS_THRESHOLD",
                d.safe_mode_stop_loss_threshold as i64,
            )?
            .max(0) as u32,
            signal_cooldown_minutes: env_or("SIGNAL_COOLDOWN_MINUTES", d.signal_cooldown_minutes)?,
            max_positions_per_symbol: env_or(
                "MAX_POSITIONS_PER_SYMBOL",
                d.max_positions_per_symbol,
            )?,
            review_interval_minutes: env_or("REVIEW_INTERVAL_MINUTES", d.review_interval_minutes)?,
            review_adverse_atr: env_or("REVIEW_ADVERSE_ATR", d.review_adverse_atr)?,
            data_alert_throttle_minutes: env_or(
                "DATA_ALERT_THROTTLE_MINUTES",
                d.data_alert_throttle_minutes,
            )?,
            notify_holds: env_or("NOTIFY_HOLDS", d.notify_holds)?,

            mt5_api_url: env::var("MT5_API_URL").context("MT5_API_URL not set")?,
            binance_backup_enabled: env_or("BINANCE_BACKUP_ENABLED", d.binance_backup_enabled)?,
            binance_api_url: env::var("BINANCE_API_URL").unwrap_or(d.binance_api_url),
            backup_symbol_map,

            advisors: (1..=3).filter_map(advisor_endpoint).collect(),
            gate_classifier: gate_classifier_endpoint(),
            llm_daily_token_budget: env_or("LLM_DAILY_TOKEN_BUDGET", d.llm_daily_token_budget)?,
            llm_budget_warn_ratio: env_or("LLM_BUDGET_WARN_RATIO", d.llm_budget_warn_ratio)?,

            discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").unwrap_or_default(),
            notify_send_timeout_secs: env_or("NOTIFY_SEND_TIMEOUT_SECS", d.notify_send_timeout_secs)?,
            database_url: env::var("DATABASE_URL").unwrap_or(d.database_url),
            metrics_log_interval_cycles: env_or(
                "METRICS_LOG_INTERVAL_CYCLES",
                d.metrics_log_interval_cycles,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("SYMBOLS must name at least one symbol");
        }
        if self.timeframes.is_empty() {
            bail!("TIMEFRAMES must name at least one timeframe");
        }
        for tf in [self.fast_timeframe, self.slow_timeframe] {
            if !self.timeframes.contains(&tf) {
                bail!("timeframe {} is not listed in TIMEFRAMES", tf);
            }
        }
        if self.lookback_bars == 0 || self.min_history_bars > self.lookback_bars {
            bail!(
                "LOOKBACK_BARS ({}) must be positive and cover MIN_HISTORY_BARS ({})",
                self.lookback_bars,
                self.min_history_bars
            );
        }
        if self.cycle_interval_secs == 0 || self.heartbeat_interval_secs == 0 {
            bail!("cycle and heartbeat intervals must be positive");
        }
        if self.initial_equity <= 0.0 {
            bail!("INITIAL_EQUITY must be positive, got {}", self.initial_equity);
        }
        if self.risk_per_trade <= 0.0 || self.risk_per_trade > 0.2 {
            bail!("RISK_PER_TRADE must be in (0, 0.2], got {}", self.risk_per_trade);
        }
        if !(0.0..0.01).contains(&self.fee_rate) {
            bail!("FEE_RATE must be in [0, 0.01), got {}", self.fee_rate);
        }
        for (symbol, spec) in &self.contract_specs {
            spec.validate()
                .with_context(|| format!("invalid contract spec for {}", symbol))?;
        }
        if self.committee_weights.is_empty() || self.committee_weights.iter().any(|w| *w < 0.0) {
            bail!("COMMITTEE_WEIGHTS must be non-empty and non-negative");
        }
        if self.front_gate_weights.len() != 2 {
            bail!("FRONT_GATE_WEIGHTS must hold exactly two weights");
        }
        if !(0.0..1.0).contains(&self.committee_deadband) {
            bail!("COMMITTEE_DEADBAND must be in [0, 1)");
        }
        if self.failover_fail_threshold == 0 || self.failover_recover_threshold == 0 {
            bail!("failover thresholds must be at least 1");
        }
        if self.backup_max_deviation_pct <= 0.0 {
            bail!("BACKUP_MAX_DEVIATION_PCT must be positive");
        }
        if self.review_interval_minutes <= 0 || self.review_adverse_atr <= 0.0 {
            bail!("review interval and adverse ATR multiple must be positive");
        }
        if self.mt5_api_url.trim().is_empty() {
            bail!("MT5_API_URL must not be empty");
        }
        if self.advisors.is_empty() {
            bail!("at least one advisor is required (ADVISOR_1_URL)");
        }
        if let Some(advisor) = self.advisors.iter().find(|a| a.model.trim().is_empty()) {
            bail!("advisor {} has no model configured", advisor.name);
        }
        if !(self.llm_budget_warn_ratio > 0.0 && self.llm_budget_warn_ratio <= 1.0) {
            bail!("LLM_BUDGET_WARN_RATIO must be in (0, 1], got {}", self.llm_budget_warn_ratio);
        }
        if self.notify_send_timeout_secs == 0 {
            bail!("NOTIFY_SEND_TIMEOUT_SECS must be positive");
        }
        if self.front_gate_enabled && self.advisors.len() < 3 {
            tracing::warn!(
                "FRONT_GATE_ENABLED needs three advisors, {} configured; using the full committee",
                self.advisors.len()
            );
        }
        Ok(())
    }

    /// Smallest configured timeframe.
    pub fn base_timeframe(&self) -> Timeframe {
        self.timeframes.iter().min().copied().unwrap_or(self.fast_timeframe)
    }

    /// Largest configured timeframe; its bar count bounds the usable history.
    pub fn history_timeframe(&self) -> Timeframe {
        self.timeframes.iter().max().copied().unwrap_or(self.slow_timeframe)
    }

    pub fn contract_spec(&self, symbol: &str) -> ContractSpec {
        self.contract_specs.get(symbol).cloned().unwrap_or_default()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn notify_send_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_send_timeout_secs)
    }

    pub fn usage_budget(&self) -> UsageBudget {
        UsageBudget {
            daily_tokens: self.llm_daily_token_budget,
            warn_ratio: self.llm_budget_warn_ratio,
        }
    }

    pub fn advisor_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.advisor_max_attempts,
            base_delay_ms: self.advisor_retry_base_ms,
            attempt_timeout: Duration::from_secs(self.advisor_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn committee_config(&self) -> CommitteeConfig {
        CommitteeConfig {
            weights: self.committee_weights.clone(),
            deadband: self.committee_deadband,
            ..CommitteeConfig::full()
        }
    }

    pub fn front_gate_config(&self) -> Option<CommitteeConfig> {
        self.front_gate_enabled.then(|| CommitteeConfig {
            weights: self.front_gate_weights.clone(),
            confidence_floor: self.front_gate_confidence_floor,
            ..CommitteeConfig::front_gate()
        })
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            enabled: self.gate_enabled,
            fast_timeframe: self.fast_timeframe,
            slow_timeframe: self.slow_timeframe,
            on_error: self.gate_on_error,
            allow_marginal: self.gate_allow_marginal,
            classifier_retry: self.advisor_retry(),
            ..GateConfig::default()
        }
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            fail_threshold: self.failover_fail_threshold,
            recover_threshold: self.failover_recover_threshold,
        }
    }
}

/// Parse an optional env var, falling back to `default` when unset or blank.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {}='{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn env_weights(key: &str) -> Result<Option<Vec<f64>>> {
    let Some(items) = env_list(key) else {
        return Ok(None);
    };
    let weights = items
        .iter()
        .map(|s| s.parse::<f64>().map_err(|e| anyhow!("invalid {} entry '{}': {}", key, s, e)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(weights))
}

fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>> {
    let mut timeframes = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Timeframe>().map_err(|e| anyhow!("TIMEFRAMES: {}", e)))
        .collect::<Result<Vec<_>>>()?;
    timeframes.sort();
    timeframes.dedup();
    Ok(timeframes)
}

/// `A=B,C=D` pairs; malformed entries are skipped.
fn parse_symbol_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (from, to) = pair.split_once('=')?;
            let (from, to) = (from.trim(), to.trim());
            (!from.is_empty() && !to.is_empty()).then(|| (from.to_string(), to.to_string()))
        })
        .collect()
}

fn advisor_endpoint(slot: usize) -> Option<ChatEndpoint> {
    let url = env::var(format!("ADVISOR_{}_URL", slot)).ok()?;
    if url.trim().is_empty() {
        return None;
    }
    Some(ChatEndpoint {
        name: env::var(format!("ADVISOR_{}_NAME", slot))
            .unwrap_or_else(|_| format!("advisor-{}", slot)),
        url,
        api_key: env::var(format!("ADVISOR_{}_API_KEY", slot)).unwrap_or_default(),
        model: env::var(format!("ADVISOR_{}_MODEL", slot)).unwrap_or_default(),
    })
}

fn gate_classifier_endpoint() -> Option<ChatEndpoint> {
    let url = env::var("GATE_CLASSIFIER_URL").ok()?;
    if url.trim().is_empty() {
        return None;
    }
    Some(ChatEndpoint {
        name: "gate-classifier".to_string(),
        url,
        api_key: env::var("GATE_CLASSIFIER_API_KEY").unwrap_or_default(),
        model: env::var("GATE_CLASSIFIER_MODEL").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AgentConfig {
        AgentConfig {
            mt5_api_url: "http://localhost:5000".to_string(),
            advisors: vec![ChatEndpoint {
                name: "deepseek".to_string(),
                url: "https://api.deepseek.com".to_string(),
                api_key: "k".to_string(),
                model: "deepseek-chat".to_string(),
            }],
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(valid().validate().is_ok());
        assert_eq!(valid().base_timeframe(), Timeframe::M30);
        assert_eq!(valid().history_timeframe(), Timeframe::D1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = valid();
        config.risk_per_trade = 0.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.fast_timeframe = Timeframe::M5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.advisors.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.failover_fail_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.llm_budget_warn_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.notify_send_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_helpers() {
        let map = parse_symbol_map("XAUUSDm=XAUUSDT, BTCUSDm = BTCUSDT,broken");
        assert_eq!(map.len(), 2);
        assert_eq!(map["BTCUSDm"], "BTCUSDT");

        let tfs = parse_timeframes("4h,30m,1h,30m").unwrap();
        assert_eq!(tfs, vec![Timeframe::M30, Timeframe::H1, Timeframe::H4]);
        assert!(parse_timeframes("30m,2w").is_err());
    }

    #[test]
    fn test_derived_component_configs() {
        let mut config = valid();
        config.front_gate_enabled = true;
        config.committee_weights = vec![0.6, 0.2, 0.2];
        assert_eq!(config.committee_config().weights, vec![0.6, 0.2, 0.2]);
        assert_eq!(config.front_gate_config().map(|c| c.confidence_floor), Some(0.55));
        assert_eq!(config.contract_spec("UNKNOWN"), ContractSpec::default());
        assert_eq!(config.advisor_retry().attempt_timeout, Duration::from_secs(60));
        config.llm_daily_token_budget = 50_000;
        assert_eq!(config.usage_budget().daily_tokens, 50_000);
        assert_eq!(config.notify_send_timeout(), Duration::from_secs(10));
    }
}
