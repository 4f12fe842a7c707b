use std::collections::VecDeque;
use std::time::Instant;

use paper_broker::ExitReason;
use serde::{Deserialize, Serialize};

/// Counters that survive restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricCounters {
    pub cycles_run: u64,
    pub heartbeats_run: u64,
    pub gate_admits: u64,
    pub gate_denies: u64,
    pub committee_verdicts: u64,
    pub holds: u64,
    pub positions_opened: u64,
    pub orders_rejected: u64,
    pub exits_stop: u64,
    pub exits_take: u64,
    pub exits_review: u64,
    pub reviews_hold: u64,
    pub reviews_close: u64,
    pub reviews_adjust: u64,
    pub failovers: u64,
    pub safe_mode_activations: u64,
    pub total_pnl: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,
}

/// Closed trades kept for the rolling figures.
const RECENT_CLOSES: usize = 20;

/// Agent telemetry: persisted counters, the duration of the last cycle and
/// pnl of the most recent closes.
pub struct AgentMetrics {
    pub counters: MetricCounters,
    pub last_cycle_ms: u64,
    recent_pnls: VecDeque<f64>,
    log_interval_cycles: u64,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            counters: MetricCounters::default(),
            last_cycle_ms: 0,
            recent_pnls: VecDeque::with_capacity(RECENT_CLOSES + 1),
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_gate(&mut self, admitted: bool) {
        let counter = if admitted {
            &mut self.counters.gate_admits
        } else {
            &mut self.counters.gate_denies
        };
        *counter += 1;
    }

    pub fn record_exit(&mut self, reason: ExitReason, pnl: f64) {
        match reason {
            ExitReason::StopHit => self.counters.exits_stop += 1,
            ExitReason::TakeHit => self.counters.exits_take += 1,
            ExitReason::ReviewClose => self.counters.exits_review += 1,
            ExitReason::ManualClose => {}
        }
        self.record_close(pnl);
    }

    /// A close with positive pnl counts as a win; flat and negative as losses.
    pub fn record_close(&mut self, pnl: f64) {
        self.counters.total_pnl += pnl;
        if pnl > 0.0 {
            self.counters.winning_trades += 1;
        } else {
            self.counters.losing_trades += 1;
        }

        self.recent_pnls.push_back(pnl);
        while self.recent_pnls.len() > RECENT_CLOSES {
            self.recent_pnls.pop_front();
        }
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_cycle_ms = cycle_start.elapsed().as_millis() as u64;
        self.counters.cycles_run += 1;

        if self.log_interval_cycles > 0
            && self.counters.cycles_run.is_multiple_of(self.log_interval_cycles)
        {
            self.log_metrics();
        }
    }

    pub fn finish_heartbeat(&mut self) {
        self.counters.heartbeats_run += 1;
    }

    /// Share of winning closes in the rolling window, in percent.
    pub fn rolling_win_pct(&self) -> f64 {
        let wins = self.recent_pnls.iter().filter(|pnl| **pnl > 0.0).count();
        percent(wins, self.recent_pnls.len())
    }

    pub fn rolling_avg_pnl(&self) -> f64 {
        match self.recent_pnls.len() {
            0 => 0.0,
            n => self.recent_pnls.iter().sum::<f64>() / n as f64,
        }
    }

    /// Share of winning closes since the counters started, in percent.
    pub fn lifetime_win_pct(&self) -> f64 {
        let wins = self.counters.winning_trades as usize;
        percent(wins, wins + self.counters.losing_trades as usize)
    }

    pub fn log_metrics(&self) {
        let c = &self.counters;
        tracing::info!(
            cycles = c.cycles_run,
            heartbeats = c.heartbeats_run,
            gate_admits = c.gate_admits,
            gate_denies = c.gate_denies,
            committee_verdicts = c.committee_verdicts,
            holds = c.holds,
            opened = c.positions_opened,
            rejected = c.orders_rejected,
            exits_stop = c.exits_stop,
            exits_take = c.exits_take,
            exits_review = c.exits_review,
            reviews_hold = c.reviews_hold,
            reviews_close = c.reviews_close,
            reviews_adjust = c.reviews_adjust,
            failovers = c.failovers,
            safe_mode_activations = c.safe_mode_activations,
            total_pnl = format!("{:.2}", c.total_pnl),
            win_pct = format!("{:.1}", self.lifetime_win_pct()),
            rolling_win_pct = format!("{:.1}", self.rolling_win_pct()),
            rolling_avg_pnl = format!("{:.2}", self.rolling_avg_pnl()),
            last_cycle_ms = self.last_cycle_ms,
            "Metrics"
        );
    }

    /// Counters only; the rolling window starts empty after a restart.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.counters).unwrap_or_default()
    }

    /// Restore counters from persisted JSON. Missing fields keep their defaults.
    pub fn restore_from_json(&mut self, json: &serde_json::Value) {
        match serde_json::from_value::<MetricCounters>(json.clone()) {
            Ok(counters) => {
                self.counters = counters;
                tracing::info!("Metrics restored at cycle {}", self.counters.cycles_run);
            }
            Err(e) => tracing::warn!("Ignoring unreadable persisted metrics: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_counters_and_win_rates() {
        let mut metrics = AgentMetrics::new(0);
        metrics.record_exit(ExitReason::StopHit, -10.0);
        metrics.record_exit(ExitReason::TakeHit, 30.0);
        metrics.record_exit(ExitReason::ReviewClose, 5.0);
        assert_eq!(metrics.counters.exits_stop, 1);
        assert_eq!(metrics.counters.exits_take, 1);
        assert_eq!(metrics.counters.exits_review, 1);
        assert!((metrics.counters.total_pnl - 25.0).abs() < 1e-9);
        assert!((metrics.lifetime_win_pct() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_keeps_latest_closes() {
        let mut metrics = AgentMetrics::new(0);
        for _ in 0..20 {
            metrics.record_close(-1.0);
        }
        for _ in 0..10 {
            metrics.record_close(2.0);
        }
        assert!((metrics.rolling_win_pct() - 50.0).abs() < 1e-9);
        assert!((metrics.rolling_avg_pnl() - 0.5).abs() < 1e-9);
        assert_eq!(metrics.counters.losing_trades, 20);
    }

    #[test]
    fn test_json_persistence() {
        let mut metrics = AgentMetrics::new(5);
        metrics.record_gate(true);
        metrics.record_gate(false);
        metrics.finish_cycle(AgentMetrics::start_timer());
        let json = metrics.to_json();
        assert_eq!(json["cycles_run"], 1);

        let mut restored = AgentMetrics::new(5);
        restored.restore_from_json(&json);
        assert_eq!(restored.counters, metrics.counters);

        let mut partial = AgentMetrics::new(5);
        partial.restore_from_json(&serde_json::json!({ "holds": 7 }));
        assert_eq!(partial.counters.holds, 7);
        assert_eq!(partial.counters.cycles_run, 0);
    }
}
