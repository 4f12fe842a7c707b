use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use admission_gate::AdmissionGate;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use committee::{retry_bounded, AdvisorPanel, RetryPolicy};
use llm_client::{DayUsage, UsageTracker};
use notification_service::{AlertType, Notifier, Severity};
use paper_broker::{ExitReason, OpenOrder, PaperBroker, PaperTrade};
use position_store::{NewPosition, PositionRecord, PositionStore};
use risk_manager::{decision_from_verdict, reprice, validate_decision, PositionSizer};
use serde::Serialize;
use trade_core::{
    Bar, DataError, FeatureContext, FeatureProvider, MarketDataSource, MarketSnapshot,
    PositionProbe, PositionReviewer, Quote, ReviewAction, ReviewOpinion, Side, Timeframe,
    TradeDecision,
};

use crate::config::AgentConfig;
use crate::failover::{FailoverEvent, FailoverState, SourceFailover, SourceRole};
use crate::guard::OpenGuard;
use crate::metrics::AgentMetrics;
use crate::recorder::TradeRecorder;
use crate::review::{plan_adjustment, review_due, ReviewTrigger};
use crate::safe_mode::{DailySafeMode, SafeModeState};
use crate::state_manager::{
    StateManager, KEY_AGENT_METRICS, KEY_LAST_REPORT_DATE, KEY_LLM_USAGE, KEY_PAPER_BROKER,
    KEY_POSITIONS, KEY_SAFE_MODE, KEY_SOURCE_FAILOVER,
};

/// Regime labels below this confidence never raise an alert.
const REGIME_ALERT_CONFIDENCE: f64 = 0.6;

/// Days of token usage restored after a restart, today included.
const USAGE_DAYS_KEPT: i64 = 7;

/// Collaborators the agent is wired with.
pub struct AgentComponents {
    pub primary: Arc<dyn MarketDataSource>,
    pub backup: Option<Arc<dyn MarketDataSource>>,
    pub features: Arc<dyn FeatureProvider>,
    pub gate: AdmissionGate,
    pub panel: AdvisorPanel,
    pub reviewer: Option<Arc<dyn PositionReviewer>>,
    pub notifier: Notifier,
    pub recorder: Arc<dyn TradeRecorder>,
    pub state: Option<StateManager>,
    /// Shared with the chat clients; persisted so a restart keeps the day's spend.
    pub usage: Option<Arc<UsageTracker>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Skipped { reason: String },
    Hold { reason: String },
    Blocked { reason: String },
    Opened { position_id: String },
    Rejected { note: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResult {
    Held,
    Closed,
    Adjusted,
    /// Gate denial or an adjustment that could not be applied.
    Skipped,
    /// Due, but the active source is observation-only.
    Observed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewReport {
    pub position_id: String,
    pub trigger: ReviewTrigger,
    pub result: ReviewResult,
    pub reason: String,
}

impl ReviewReport {
    fn new(
        position_id: &str,
        trigger: ReviewTrigger,
        result: ReviewResult,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            position_id: position_id.to_string(),
            trigger,
            result,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub source: SourceRole,
    pub observe_only: bool,
    pub outcome: SymbolOutcome,
    /// Position ids closed by a level crossing on this pass.
    pub exits: Vec<String>,
    pub reviews: Vec<ReviewReport>,
}

impl SymbolReport {
    fn new(symbol: &str, source: SourceRole) -> Self {
        Self {
            symbol: symbol.to_string(),
            source,
            observe_only: false,
            outcome: SymbolOutcome::Skipped {
                reason: "not_evaluated".to_string(),
            },
            exits: Vec::new(),
            reviews: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub symbols: Vec<SymbolReport>,
    pub failover_events: Vec<FailoverEvent>,
    /// A reconciliation pass against the recovered primary ran this cycle.
    pub reconciled: bool,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            symbols: Vec::new(),
            failover_events: Vec::new(),
            reconciled: false,
        }
    }

    pub fn opened(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| matches!(s.outcome, SymbolOutcome::Opened { .. }))
            .count()
    }

    pub fn exits(&self) -> usize {
        self.symbols.iter().map(|s| s.exits.len()).sum()
    }

    pub fn reviews(&self) -> usize {
        self.symbols.iter().map(|s| s.reviews.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Exits, reviews and the open path, with failover accounting.
    Full,
    /// Exits and reviews only.
    Heartbeat,
}

/// The decision-and-execution loop over every configured symbol.
pub struct TradingAgent {
    config: AgentConfig,
    primary: Arc<dyn MarketDataSource>,
    backup: Option<Arc<dyn MarketDataSource>>,
    features: Arc<dyn FeatureProvider>,
    gate: AdmissionGate,
    panel: AdvisorPanel,
    reviewer: Option<Arc<dyn PositionReviewer>>,
    notifier: Notifier,
    recorder: Arc<dyn TradeRecorder>,
    state: Option<StateManager>,
    usage: Option<Arc<UsageTracker>>,

    sizer: PositionSizer,
    broker: PaperBroker,
    positions: PositionStore,
    failover: SourceFailover,
    safe_mode: DailySafeMode,
    guard: OpenGuard,
    metrics: AgentMetrics,
    review_retry: RetryPolicy,

    primary_mids: HashMap<String, f64>,
    last_regime: HashMap<String, String>,
    last_data_alert: HashMap<String, DateTime<Utc>>,
    last_report_date: Option<NaiveDate>,
    reconcile_pending: bool,
}

impl TradingAgent {
    pub fn new(config: AgentConfig, components: AgentComponents) -> Result<Self> {
        let sizer = PositionSizer::new(config.risk_per_trade)?;
        let has_backup = components.backup.is_some();

        Ok(Self {
            failover: SourceFailover::new(config.failover_config(), has_backup),
            safe_mode: DailySafeMode::new(config.safe_mode_stop_loss_threshold),
            guard: OpenGuard::new(config.signal_cooldown_minutes, config.max_positions_per_symbol),
            broker: PaperBroker::new(config.initial_equity, config.fee_rate),
            positions: PositionStore::new(),
            metrics: AgentMetrics::new(config.metrics_log_interval_cycles),
            review_retry: config.advisor_retry(),
            sizer,
            primary: components.primary,
            backup: components.backup,
            features: components.features,
            gate: components.gate,
            panel: components.panel,
            reviewer: components.reviewer,
            notifier: components.notifier,
            recorder: components.recorder,
            state: components.state,
            usage: components.usage,
            primary_mids: HashMap::new(),
            last_regime: HashMap::new(),
            last_data_alert: HashMap::new(),
            last_report_date: None,
            reconcile_pending: false,
            config,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn failover_state(&self) -> FailoverState {
        self.failover.state()
    }

    pub fn safe_mode_state(&self) -> SafeModeState {
        self.safe_mode.snapshot()
    }

    /// Load persisted state. Missing keys keep the fresh defaults.
    pub async fn restore_state(&mut self) -> Result<()> {
        let Some(state) = self.state.clone() else {
            return Ok(());
        };

        if let Some(saved) = state.load_json::<SafeModeState>(KEY_SAFE_MODE).await? {
            self.safe_mode.restore(saved);
        }
        if let Some(saved) = state.load_json::<FailoverState>(KEY_SOURCE_FAILOVER).await? {
            self.failover.restore(saved);
        }
        if let Some(saved) = state.load_json::<PositionStore>(KEY_POSITIONS).await? {
            self.positions = saved;
            for record in self.positions.all_open().into_iter().chain(self.positions.closed()) {
                self.guard.record_open(&record.symbol, record.side, record.created_at);
            }
        }
        if let Some(saved) = state.load_json::<PaperBroker>(KEY_PAPER_BROKER).await? {
            self.broker = saved;
        }
        if let Some(saved) = state.load_json::<serde_json::Value>(KEY_AGENT_METRICS).await? {
            self.metrics.restore_from_json(&saved);
        }
        if let Some(saved) = state.load_json::<NaiveDate>(KEY_LAST_REPORT_DATE).await? {
            self.last_report_date = Some(saved);
        }
        if let Some(usage) = &self.usage {
            if let Some(saved) = state
                .load_json::<BTreeMap<NaiveDate, DayUsage>>(KEY_LLM_USAGE)
                .await?
            {
                let keep_from = Utc::now().date_naive() - Duration::days(USAGE_DAYS_KEPT);
                usage.restore(saved, keep_from);
            }
        }

        tracing::info!(
            "Restored state: source={} open_positions={} equity={:.2} safe_mode_active={}",
            self.failover.active(),
            self.positions.all_open().len(),
            self.broker.equity(),
            self.safe_mode.snapshot().active
        );
        Ok(())
    }

    /// Persist everything the next start needs.
    pub async fn persist(&self) {
        self.persist_safe_mode().await;
        self.persist_failover().await;
        self.persist_key(KEY_POSITIONS, &self.positions).await;
        self.persist_key(KEY_PAPER_BROKER, &self.broker).await;
        self.persist_key(KEY_AGENT_METRICS, &self.metrics.to_json()).await;
        if let Some(usage) = &self.usage {
            self.persist_key(KEY_LLM_USAGE, &usage.snapshot()).await;
        }
    }

    /// One full pass over every symbol.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let cycle_start = AgentMetrics::start_timer();
        self.maybe_send_daily_report(now).await;
        if self.safe_mode.is_enabled() && self.safe_mode.roll_date(now) {
            self.persist_safe_mode().await;
        }

        let mut report = CycleReport::new(now);
        let symbols = self.config.symbols.clone();
        tracing::info!(
            "Starting cycle on {} source ({} symbols)",
            self.failover.active(),
            symbols.len()
        );

        for symbol in &symbols {
            let symbol_report = self
                .process_symbol(symbol, now, Pass::Full, &mut report.failover_events)
                .await;
            report.symbols.push(symbol_report);
        }

        if self.failover.is_on_backup() {
            self.probe_primary(now, &mut report.failover_events).await;
        }

        if self.reconcile_pending && !self.failover.is_on_backup() {
            self.reconcile_pending = false;
            tracing::info!("Reconciling {} symbols against recovered primary", symbols.len());
            for symbol in &symbols {
                let symbol_report = self
                    .process_symbol(symbol, now, Pass::Full, &mut report.failover_events)
                    .await;
                report.symbols.push(symbol_report);
            }
            report.reconciled = true;
        }

        self.metrics.finish_cycle(cycle_start);
        self.persist().await;
        report
    }

    /// Exits and reviews only; never opens.
    pub async fn run_heartbeat(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(now);
        for symbol in self.config.symbols.clone() {
            if self.positions.open_count(&symbol) == 0 {
                continue;
            }
            let symbol_report = self
                .process_symbol(&symbol, now, Pass::Heartbeat, &mut report.failover_events)
                .await;
            report.symbols.push(symbol_report);
        }
        self.metrics.finish_heartbeat();
        if !report.symbols.is_empty() {
            self.persist_key(KEY_POSITIONS, &self.positions).await;
            self.persist_key(KEY_PAPER_BROKER, &self.broker).await;
        }
        report
    }

    async fn process_symbol(
        &mut self,
        symbol: &str,
        now: DateTime<Utc>,
        pass: Pass,
        events: &mut Vec<FailoverEvent>,
    ) -> SymbolReport {
        let role = self.failover.active();
        let source = self.source(role);
        let mut report = SymbolReport::new(symbol, role);

        let timeframes = match pass {
            Pass::Full => self.config.timeframes.clone(),
            Pass::Heartbeat => self.heartbeat_timeframes(),
        };
        let snapshot = match self
            .acquire_snapshot(source.as_ref(), symbol, &timeframes, pass == Pass::Full, now)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.outcome = SymbolOutcome::Skipped {
                    reason: format!("data_error: {}", e),
                };
                match pass {
                    Pass::Full => self.on_data_failure(role, symbol, &e, now, events).await,
                    Pass::Heartbeat => tracing::warn!("Heartbeat skipped {}: {}", symbol, e),
                }
                return report;
            }
        };
        if pass == Pass::Full {
            self.failover.record_success(role);
        }

        let mid = snapshot.quote.mid();
        report.observe_only = match role {
            SourceRole::Primary => {
                if let Some(mid) = mid {
                    self.primary_mids.insert(symbol.to_string(), mid);
                }
                false
            }
            SourceRole::Backup => !self.backup_price_ok(symbol, mid, now).await,
        };

        let ctx = match self.features.compute(&snapshot) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!("Feature computation failed for {}: {}", symbol, e);
                report.outcome = SymbolOutcome::Skipped {
                    reason: format!("features: {}", e),
                };
                return report;
            }
        };
        self.check_regime(symbol, &ctx).await;

        let Some(bar) = snapshot.latest_base_bar().cloned() else {
            report.outcome = SymbolOutcome::Skipped {
                reason: "no_base_bar".to_string(),
            };
            return report;
        };
        let price = mid.unwrap_or(bar.close);

        report.exits = self.process_exits(symbol, &bar, report.observe_only, now).await;
        report.reviews = self
            .process_reviews(symbol, &ctx, price, report.observe_only, now)
            .await;

        report.outcome = match pass {
            Pass::Full => {
                self.try_open(symbol, &ctx, &snapshot.quote, role, report.observe_only, now)
                    .await
            }
            Pass::Heartbeat => SymbolOutcome::Skipped {
                reason: "heartbeat".to_string(),
            },
        };
        report
    }

    fn source(&self, role: SourceRole) -> Arc<dyn MarketDataSource> {
        match (role, &self.backup) {
            (SourceRole::Backup, Some(backup)) => Arc::clone(backup),
            _ => Arc::clone(&self.primary),
        }
    }

    /// Base, fast and slow timeframes: enough for exits, ATR and the gate.
    fn heartbeat_timeframes(&self) -> Vec<Timeframe> {
        let mut timeframes = vec![
            self.config.base_timeframe(),
            self.config.fast_timeframe,
            self.config.slow_timeframe,
        ];
        timeframes.sort();
        timeframes.dedup();
        timeframes
    }

    async fn acquire_snapshot(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
        timeframes: &[Timeframe],
        check_history: bool,
        now: DateTime<Utc>,
    ) -> Result<MarketSnapshot, DataError> {
        let limit = self.config.fetch_timeout();
        let quote = within(limit, source.fetch_quote(symbol)).await?;

        let mut frames = BTreeMap::new();
        for tf in timeframes {
            let bars = within(
                limit,
                source.fetch_candles(symbol, *tf, self.config.lookback_bars),
            )
            .await?;
            frames.insert(*tf, bars);
        }

        let base = self.config.base_timeframe();
        let latest = frames
            .get(&base)
            .and_then(|bars| bars.last())
            .ok_or_else(|| DataError::InsufficientData(format!("{} has no {} bars", symbol, base)))?;
        if !is_fresh(latest, base, now) {
            return Err(DataError::Stale(format!(
                "{} last {} bar is {}m old",
                symbol,
                base,
                (now - latest.timestamp).num_minutes()
            )));
        }

        if check_history {
            let history_tf = self.config.history_timeframe();
            let available = frames.get(&history_tf).map_or(0, Vec::len);
            if available < self.config.min_history_bars {
                return Err(DataError::InsufficientData(format!(
                    "{} has {} {} bars, need {}",
                    symbol, available, history_tf, self.config.min_history_bars
                )));
            }
        }

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            quote,
            frames,
        })
    }

    async fn on_data_failure(
        &mut self,
        role: SourceRole,
        symbol: &str,
        error: &DataError,
        now: DateTime<Utc>,
        events: &mut Vec<FailoverEvent>,
    ) {
        tracing::warn!("{} data from {} source failed: {}", symbol, role, error);
        let event = self.failover.record_failure(role);
        self.alert_data_issue(symbol, data_error_kind(error), &error.to_string(), now)
            .await;
        self.record_event("data_error", Some(symbol), &format!("{}: {}", role, error))
            .await;
        if let Some(event) = event {
            self.on_failover_event(event, Some(symbol), events).await;
        }
    }

    async fn on_failover_event(
        &mut self,
        event: FailoverEvent,
        symbol: Option<&str>,
        events: &mut Vec<FailoverEvent>,
    ) {
        events.push(event);
        if event == FailoverEvent::SwitchedToBackup {
            self.metrics.counters.failovers += 1;
        }
        self.notifier
            .notify(AlertType::Anomaly {
                event: event.as_str().to_string(),
                severity: event.severity(),
                detail: format!("active source: {}", self.failover.active()),
            })
            .await;
        self.record_event("failover", symbol, event.as_str()).await;
        self.persist_failover().await;
    }

    /// While on backup, probe primary once with a health check and a
    /// base-timeframe fetch.
    async fn probe_primary(&mut self, now: DateTime<Utc>, events: &mut Vec<FailoverEvent>) {
        let Some(symbol) = self.config.symbols.first().cloned() else {
            return;
        };
        let limit = self.config.fetch_timeout();
        let base = self.config.base_timeframe();

        let healthy = within(limit, self.primary.health_check()).await;
        let ok = match healthy {
            Ok(()) => match within(limit, self.primary.fetch_candles(&symbol, base, 5)).await {
                Ok(bars) => bars.last().is_some_and(|bar| is_fresh(bar, base, now)),
                Err(e) => {
                    tracing::debug!("Primary probe fetch failed: {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::debug!("Primary probe health check failed: {}", e);
                false
            }
        };

        if let Some(event) = self.failover.record_probe(ok) {
            self.reconcile_pending = true;
            self.on_failover_event(event, None, events).await;
        }
    }

    /// Whether backup prices are close enough to the last primary mid to act on.
    /// Without a primary mid to compare against, backup prices are trusted.
    async fn backup_price_ok(&mut self, symbol: &str, mid: Option<f64>, now: DateTime<Utc>) -> bool {
        let max = self.config.backup_max_deviation_pct;
        let reference = self.primary_mids.get(symbol).copied().filter(|r| *r > 0.0);
        let detail = match (reference, mid) {
            (None, Some(_)) => {
                tracing::debug!("{} has no primary reference price, using backup as is", symbol);
                return true;
            }
            (Some(reference), Some(mid)) => {
                let deviation = (mid - reference).abs() / reference;
                if deviation <= max {
                    return true;
                }
                format!(
                    "backup mid {:.5} deviates {:.3}% from primary {:.5} (max {:.3}%)",
                    mid,
                    deviation * 100.0,
                    reference,
                    max * 100.0
                )
            }
            (_, None) => "backup quote has no usable price".to_string(),
        };
        tracing::warn!("{} observation-only on backup: {}", symbol, detail);
        self.alert_data_issue(symbol, "price_deviation", &detail, now).await;
        false
    }

    /// One anomaly alert per `symbol:kind` per throttle window.
    async fn alert_data_issue(&mut self, symbol: &str, kind: &str, detail: &str, now: DateTime<Utc>) {
        let key = format!("{}:{}", symbol, kind);
        let throttle = Duration::minutes(self.config.data_alert_throttle_minutes);
        if let Some(last) = self.last_data_alert.get(&key) {
            if now - *last < throttle {
                tracing::debug!("Data alert {} throttled", key);
                return;
            }
        }
        self.last_data_alert.insert(key, now);
        self.notifier
            .notify(AlertType::Anomaly {
                event: format!("data_{}", kind),
                severity: Severity::Warning,
                detail: format!("{}: {}", symbol, detail),
            })
            .await;
    }

    async fn check_regime(&mut self, symbol: &str, ctx: &FeatureContext) {
        let Some(regime) = ctx
            .regime
            .as_ref()
            .filter(|r| r.confidence >= REGIME_ALERT_CONFIDENCE)
        else {
            return;
        };
        let previous = self
            .last_regime
            .insert(symbol.to_string(), regime.name.clone());
        match previous {
            Some(previous) if previous != regime.name => {
                tracing::info!("{} regime {} -> {}", symbol, previous, regime.name);
                self.notifier
                    .notify(AlertType::RegimeChanged {
                        symbol: symbol.to_string(),
                        previous: Some(previous),
                        current: regime.name.clone(),
                        confidence: regime.confidence,
                    })
                    .await;
            }
            _ => {}
        }
    }

    async fn process_exits(
        &mut self,
        symbol: &str,
        bar: &Bar,
        observe_only: bool,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        if observe_only {
            for (trade_id, exit) in self.broker.pending_exits(symbol, bar.high, bar.low) {
                tracing::info!(
                    "{} {} would exit at {:.5} ({}), not executed on observation-only source",
                    symbol,
                    trade_id,
                    exit.price,
                    exit.reason
                );
                self.notifier
                    .notify(AlertType::Watch {
                        symbol: symbol.to_string(),
                        reason: format!(
                            "{} {} at {:.5} not executed (observation only)",
                            trade_id, exit.reason, exit.price
                        ),
                    })
                    .await;
            }
            return Vec::new();
        }

        let closed = self.broker.mark(symbol, bar.high, bar.low, now);
        let mut position_ids = Vec::with_capacity(closed.len());
        for trade in &closed {
            if let Some(id) = self.on_trade_closed(trade, now).await {
                position_ids.push(id);
            }
        }
        position_ids
    }

    /// Sync the position record, safe mode, metrics and outward reporting
    /// with a trade the simulator just closed.
    async fn on_trade_closed(&mut self, trade: &PaperTrade, now: DateTime<Utc>) -> Option<String> {
        let reason = trade.exit_reason.unwrap_or(ExitReason::ManualClose);
        let exit_price = trade.exit_price.unwrap_or(trade.entry);
        tracing::info!(
            "Closed {} {} {} at {:.5} ({}) pnl={:.2}",
            trade.id,
            trade.symbol,
            trade.side,
            exit_price,
            reason,
            trade.pnl
        );
        self.metrics.record_exit(reason, trade.pnl);

        if reason == ExitReason::StopHit {
            if self.safe_mode.record_stop_loss(now) {
                self.metrics.counters.safe_mode_activations += 1;
                let detail = format!(
                    "{} consecutive stop-losses today; new opens blocked until next UTC day",
                    self.safe_mode.snapshot().consecutive_stop_losses
                );
                self.notifier
                    .notify(AlertType::Anomaly {
                        event: "safe_mode_activated".to_string(),
                        severity: Severity::Critical,
                        detail: detail.clone(),
                    })
                    .await;
                self.record_event("safe_mode", Some(&trade.symbol), &detail).await;
            }
            self.persist_safe_mode().await;
        } else if trade.pnl > 0.0 {
            self.safe_mode.record_profitable_close(now);
            self.persist_safe_mode().await;
        }

        let position_id = self.positions.find_by_trade(&trade.id).map(|r| r.id.clone());
        let closed = position_id
            .as_deref()
            .and_then(|id| self.positions.close(id, exit_price, reason.as_str(), trade.pnl, now));
        match &closed {
            Some(record) => {
                self.upsert_position(record).await;
                if let Err(e) = self.recorder.record_trade_close(trade, &record.id).await {
                    tracing::warn!("Failed to record close of {}: {}", trade.id, e);
                }
            }
            None => tracing::warn!("No open position record for paper trade {}", trade.id),
        }

        self.notifier
            .notify(AlertType::PositionExited {
                symbol: trade.symbol.clone(),
                side: trade.side.to_string(),
                exit_price,
                reason: reason.to_string(),
                pnl: trade.pnl,
            })
            .await;
        closed.map(|record| record.id)
    }

    async fn process_reviews(
        &mut self,
        symbol: &str,
        ctx: &FeatureContext,
        price: f64,
        observe_only: bool,
        now: DateTime<Utc>,
    ) -> Vec<ReviewReport> {
        let atr = ctx
            .timeframe(self.config.fast_timeframe)
            .map_or(0.0, |f| f.atr);
        let interval = Duration::minutes(self.config.review_interval_minutes);
        let adverse_atr = self.config.review_adverse_atr;
        let due: Vec<(PositionRecord, ReviewTrigger)> = self
            .positions
            .open_for(symbol)
            .filter_map(|p| {
                review_due(p, price, atr, now, interval, adverse_atr).map(|t| (p.clone(), t))
            })
            .collect();

        let mut reports = Vec::with_capacity(due.len());
        for (position, trigger) in due {
            let report = if observe_only {
                self.notifier
                    .notify(AlertType::Watch {
                        symbol: symbol.to_string(),
                        reason: format!(
                            "review of {} due ({:?}), source is observation-only",
                            position.id, trigger
                        ),
                    })
                    .await;
                self.positions.mark_reviewed(&position.id, now);
                ReviewReport::new(&position.id, trigger, ReviewResult::Observed, "observation_only")
            } else {
                self.review_position(symbol, &position, ctx, price, trigger, now)
                    .await
            };
            tracing::info!(
                "Review {} ({:?}): {:?} {}",
                report.position_id,
                report.trigger,
                report.result,
                report.reason
            );
            reports.push(report);
        }
        reports
    }

    async fn review_position(
        &mut self,
        symbol: &str,
        position: &PositionRecord,
        ctx: &FeatureContext,
        price: f64,
        trigger: ReviewTrigger,
        now: DateTime<Utc>,
    ) -> ReviewReport {
        let probe = position.probe();
        let verdict = self.gate.evaluate(symbol, ctx, Some(&probe)).await;
        self.metrics.record_gate(verdict.admit);
        if !verdict.admit {
            self.positions.mark_reviewed(&position.id, now);
            return ReviewReport::new(&position.id, trigger, ReviewResult::Skipped, verdict.reason);
        }

        let opinion = self.consult_reviewer(symbol, &probe, ctx).await;
        match &opinion.action {
            ReviewAction::Hold => {
                self.metrics.counters.reviews_hold += 1;
                self.positions.mark_reviewed(&position.id, now);
                ReviewReport::new(&position.id, trigger, ReviewResult::Held, opinion.reason)
            }
            ReviewAction::Close => {
                self.metrics.counters.reviews_close += 1;
                self.close_for_review(position, price, now).await;
                ReviewReport::new(&position.id, trigger, ReviewResult::Closed, opinion.reason)
            }
            ReviewAction::Adjust {
                new_stop,
                new_take,
                new_rr,
            } => {
                let (new_stop, new_take, new_rr) = (*new_stop, *new_take, *new_rr);
                self.apply_adjustment(position, new_stop, new_take, new_rr, &opinion.reason, trigger, now)
                    .await
            }
        }
    }

    async fn consult_reviewer(
        &self,
        symbol: &str,
        probe: &PositionProbe,
        ctx: &FeatureContext,
    ) -> ReviewOpinion {
        let Some(reviewer) = self.reviewer.as_ref() else {
            return ReviewOpinion::hold("no_reviewer");
        };
        let label = format!("review {}", symbol);
        match retry_bounded(&self.review_retry, &label, || reviewer.review(symbol, probe, ctx)).await {
            Ok(opinion) => opinion,
            Err(exhausted) => {
                tracing::warn!("Reviewer unavailable for {}, holding: {}", symbol, exhausted);
                ReviewOpinion::hold(format!("reviewer_unavailable: {}", exhausted.last_error))
            }
        }
    }

    async fn close_for_review(&mut self, position: &PositionRecord, price: f64, now: DateTime<Utc>) {
        let trade = position
            .paper_trade_id
            .as_deref()
            .and_then(|id| self.broker.close(id, price, ExitReason::ReviewClose, now));
        match trade {
            Some(trade) => {
                self.on_trade_closed(&trade, now).await;
            }
            None => {
                tracing::warn!(
                    "Position {} has no open paper trade, closing the record only",
                    position.id
                );
                let contract_size = self.config.contract_spec(&position.symbol).contract_size;
                let pnl = position.side.sign() * (price - position.entry) * position.quantity * contract_size;
                if let Some(record) =
                    self.positions
                        .close(&position.id, price, ExitReason::ReviewClose.as_str(), pnl, now)
                {
                    self.upsert_position(&record).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_adjustment(
        &mut self,
        position: &PositionRecord,
        new_stop: Option<f64>,
        new_take: Option<f64>,
        new_rr: Option<f64>,
        reason: &str,
        trigger: ReviewTrigger,
        now: DateTime<Utc>,
    ) -> ReviewReport {
        let plan = match plan_adjustment(position, new_stop, new_take, new_rr) {
            Ok(plan) => plan,
            Err(skip) => {
                self.positions.mark_reviewed(&position.id, now);
                return ReviewReport::new(
                    &position.id,
                    trigger,
                    ReviewResult::Skipped,
                    format!("adjust_{}", skip),
                );
            }
        };

        if let Some(trade_id) = position.paper_trade_id.as_deref() {
            if let Err(rejected) = self
                .broker
                .adjust(trade_id, Some(plan.stop), Some(plan.take), None)
            {
                tracing::warn!("Simulator rejected adjust of {}: {}", trade_id, rejected);
                self.positions.mark_reviewed(&position.id, now);
                return ReviewReport::new(
                    &position.id,
                    trigger,
                    ReviewResult::Skipped,
                    format!("adjust_rejected: {}", rejected),
                );
            }
        }

        let Some(record) = self
            .positions
            .update_levels(&position.id, plan.stop, plan.take, now)
        else {
            return ReviewReport::new(&position.id, trigger, ReviewResult::Skipped, "position_closed");
        };
        self.metrics.counters.reviews_adjust += 1;
        self.upsert_position(&record).await;
        self.notifier
            .notify(AlertType::PositionAdjusted {
                symbol: record.symbol.clone(),
                stop: record.stop,
                take: record.take,
                risk_reward: record.risk_reward,
                reason: reason.to_string(),
            })
            .await;
        ReviewReport::new(&position.id, trigger, ReviewResult::Adjusted, reason)
    }

    /// The new-open path: safe mode, cap, backup gating, gate, committee,
    /// validation, cooldown, executable entry, sizing and execution.
    async fn try_open(
        &mut self,
        symbol: &str,
        ctx: &FeatureContext,
        quote: &Quote,
        role: SourceRole,
        observe_only: bool,
        now: DateTime<Utc>,
    ) -> SymbolOutcome {
        if !self.safe_mode.can_trade(now) {
            tracing::info!("{} open blocked: safe_mode", symbol);
            return SymbolOutcome::Blocked {
                reason: "safe_mode".to_string(),
            };
        }
        if let Err(block) = self.guard.check_cap(symbol, self.positions.open_count(symbol)) {
            tracing::info!("{} open blocked: {}", symbol, block);
            return SymbolOutcome::Blocked {
                reason: block.to_string(),
            };
        }
        if role == SourceRole::Backup {
            let blocked = if !self.config.backup_allow_open {
                Some("backup_source: opens disabled")
            } else if observe_only {
                Some("backup_source: price deviation")
            } else {
                None
            };
            if let Some(reason) = blocked {
                tracing::info!("{} open blocked: {}", symbol, reason);
                self.notify_hold(symbol, reason).await;
                return SymbolOutcome::Blocked {
                    reason: reason.to_string(),
                };
            }
        }

        let verdict = self.gate.evaluate(symbol, ctx, None).await;
        self.metrics.record_gate(verdict.admit);
        if !verdict.admit {
            return self.hold(symbol, verdict.reason).await;
        }

        let outcome = self.panel.decide(symbol, ctx).await;
        self.metrics.counters.committee_verdicts += 1;
        let decision = validate_decision(decision_from_verdict(&outcome.verdict));
        let Some(side) = decision.action.side() else {
            return self.hold(symbol, decision.reason).await;
        };

        if let Err(block) = self.guard.check_cooldown(symbol, side, now) {
            tracing::info!("{} open blocked: {}", symbol, block);
            return SymbolOutcome::Blocked {
                reason: block.to_string(),
            };
        }

        let quoted = match side {
            Side::Long => quote.ask,
            Side::Short => quote.bid,
        };
        let entry = if quoted > 0.0 { quoted } else { decision.entry };
        let decision = reprice(decision, entry);
        if decision.is_hold() {
            return self.hold(symbol, decision.reason).await;
        }

        self.open_position(symbol, side, decision, now).await
    }

    async fn open_position(
        &mut self,
        symbol: &str,
        side: Side,
        decision: TradeDecision,
        now: DateTime<Utc>,
    ) -> SymbolOutcome {
        let spec = self.config.contract_spec(symbol);
        let plan = self
            .sizer
            .size(&decision, self.broker.available_equity(), &spec);
        if !plan.is_executable() {
            self.metrics.counters.orders_rejected += 1;
            tracing::info!("{} order rejected by sizer: {}", symbol, plan.note);
            self.record_event("order_rejected", Some(symbol), plan.note.as_str())
                .await;
            return SymbolOutcome::Rejected {
                note: plan.note.to_string(),
            };
        }

        let order = OpenOrder {
            symbol: symbol.to_string(),
            side,
            entry: decision.entry,
            stop: decision.stop,
            take: decision.take,
            quantity: plan.quantity,
            margin_required: plan.margin_required,
            contract_size: spec.contract_size,
        };
        let trade_id = match self.broker.open(order, now) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.counters.orders_rejected += 1;
                tracing::warn!("{} order rejected by simulator: {}", symbol, e);
                self.record_event("order_rejected", Some(symbol), &e.to_string())
                    .await;
                return SymbolOutcome::Rejected { note: e.to_string() };
            }
        };

        let record = self.positions.open(
            NewPosition {
                symbol: symbol.to_string(),
                side,
                entry: decision.entry,
                stop: decision.stop,
                take: decision.take,
                quantity: plan.quantity,
                paper_trade_id: Some(trade_id.clone()),
            },
            now,
        );
        self.guard.record_open(symbol, side, now);
        self.metrics.counters.positions_opened += 1;
        tracing::info!(
            "Opened {} {} {} qty={} entry={:.5} stop={:.5} take={:.5} rr={:.2} ({})",
            record.id,
            symbol,
            side,
            plan.quantity,
            decision.entry,
            decision.stop,
            decision.take,
            decision.risk_reward,
            decision.reason
        );

        self.upsert_position(&record).await;
        if let Some(trade) = self.broker.get(&trade_id) {
            if let Err(e) = self.recorder.record_trade_open(trade, &record.id).await {
                tracing::warn!("Failed to record open of {}: {}", trade_id, e);
            }
        }
        self.notifier
            .notify(AlertType::SignalOpened {
                symbol: symbol.to_string(),
                side: side.to_string(),
                entry: decision.entry,
                stop: decision.stop,
                take: decision.take,
                quantity: plan.quantity,
                confidence: decision.confidence,
                reason: decision.reason.clone(),
            })
            .await;

        SymbolOutcome::Opened {
            position_id: record.id,
        }
    }

    async fn hold(&mut self, symbol: &str, reason: String) -> SymbolOutcome {
        self.metrics.counters.holds += 1;
        tracing::info!("{} hold: {}", symbol, reason);
        self.notify_hold(symbol, &reason).await;
        SymbolOutcome::Hold { reason }
    }

    async fn notify_hold(&self, symbol: &str, reason: &str) {
        if self.config.notify_holds {
            self.notifier
                .notify(AlertType::Watch {
                    symbol: symbol.to_string(),
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Report the previous day once the UTC date changes.
    async fn maybe_send_daily_report(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        match self.last_report_date {
            Some(last) if last == today => return,
            Some(last) => {
                let summary = self.broker.summary();
                tracing::info!("Generating daily report for {}", last);
                if let Some(day) = self.usage.as_ref().and_then(|u| u.day(last)) {
                    tracing::info!(
                        date = %last,
                        tokens = day.total_tokens,
                        calls = day.calls,
                        avg_latency_ms = format!("{:.0}", day.avg_latency_ms()),
                        "LLM usage"
                    );
                }
                match self.recorder.daily_performance(last).await {
                    Ok(rows) => {
                        for row in rows {
                            tracing::info!(
                                date = %last,
                                symbol = %row.symbol,
                                trades = row.trades,
                                win_rate = format!("{:.2}", row.win_rate()),
                                profit_factor = ?row.profit_factor(),
                                pnl = format!("{:.2}", row.pnl_total),
                                "Daily performance"
                            );
                        }
                    }
                    Err(e) => tracing::warn!("Failed to load daily performance for {}: {}", last, e),
                }
                self.notifier
                    .notify(AlertType::DailyReport {
                        date: last.to_string(),
                        equity: summary.equity,
                        pnl_total: summary.pnl_total,
                        trades: summary.trades,
                        win_rate: summary.win_rate,
                        profit_factor: summary.profit_factor,
                    })
                    .await;
            }
            None => {}
        }
        self.last_report_date = Some(today);
        self.persist_key(KEY_LAST_REPORT_DATE, &today).await;
    }

    async fn upsert_position(&self, record: &PositionRecord) {
        if let Err(e) = self.recorder.upsert_position(record).await {
            tracing::warn!("Failed to record position {}: {}", record.id, e);
        }
    }

    async fn record_event(&self, kind: &str, symbol: Option<&str>, detail: &str) {
        if let Err(e) = self.recorder.record_event(kind, symbol, detail).await {
            tracing::warn!("Failed to record {} event: {}", kind, e);
        }
    }

    async fn persist_safe_mode(&self) {
        self.persist_key(KEY_SAFE_MODE, &self.safe_mode.snapshot()).await;
    }

    async fn persist_failover(&self) {
        self.persist_key(KEY_SOURCE_FAILOVER, &self.failover.state()).await;
    }

    async fn persist_key<T: Serialize + Sync>(&self, key: &str, value: &T) {
        if let Some(state) = &self.state {
            if let Err(e) = state.save_json(key, value).await {
                tracing::warn!("Failed to persist {}: {}", key, e);
            }
        }
    }
}

/// Freshness bound for the newest base bar: two base intervals, at least five minutes.
fn max_bar_age(base: Timeframe) -> Duration {
    Duration::minutes((base.minutes() * 2).max(5))
}

fn is_fresh(bar: &Bar, base: Timeframe, now: DateTime<Utc>) -> bool {
    now - bar.timestamp <= max_bar_age(base)
}

async fn within<T>(
    limit: std::time::Duration,
    fut: impl Future<Output = Result<T, DataError>>,
) -> Result<T, DataError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DataError::Timeout(format!(
            "no response within {}s",
            limit.as_secs()
        ))),
    }
}

fn data_error_kind(error: &DataError) -> &'static str {
    match error {
        DataError::Http(_) => "http",
        DataError::Decode(_) => "decode",
        DataError::Timeout(_) => "timeout",
        DataError::Stale(_) => "stale",
        DataError::InsufficientData(_) => "insufficient_data",
        DataError::UnknownSymbol(_) => "unknown_symbol",
    }
}
