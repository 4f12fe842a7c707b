use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafeModeState {
    pub date: Option<NaiveDate>,
    pub consecutive_stop_losses: u32,
    pub active: bool,
}

/// Daily circuit breaker: blocks new opens after too many consecutive
/// stop-losses within one UTC day.
#[derive(Debug, Clone)]
pub struct DailySafeMode {
    /// 0 disables the breaker.
    threshold: u32,
    state: SafeModeState,
}

impl DailySafeMode {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            state: SafeModeState::default(),
        }
    }

    pub fn restore(&mut self, state: SafeModeState) {
        self.state = state;
    }

    pub fn snapshot(&self) -> SafeModeState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    /// Reset the counters on a UTC date change. Returns true when reset.
    pub fn roll_date(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.state.date == Some(today) {
            return false;
        }
        if self.state.active {
            tracing::info!("Safe mode cleared for new trading day {}", today);
        }
        self.state = SafeModeState {
            date: Some(today),
            consecutive_stop_losses: 0,
            active: false,
        };
        true
    }

    pub fn can_trade(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.roll_date(now);
        !self.state.active
    }

    /// Count a stop-loss exit. Returns true when this one activated safe mode.
    pub fn record_stop_loss(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.roll_date(now);
        self.state.consecutive_stop_losses += 1;
        if self.state.active || self.state.consecutive_stop_losses < self.threshold {
            return false;
        }
        self.state.active = true;
        tracing::warn!(
            "Safe mode activated after {} consecutive stop-losses",
            self.state.consecutive_stop_losses
        );
        true
    }

    pub fn record_profitable_close(&mut self, now: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }
        self.roll_date(now);
        if !self.state.active {
            self.state.consecutive_stop_losses = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_activates_at_threshold_and_clears_next_day() {
        let mut safe = DailySafeMode::new(3);
        assert!(!safe.record_stop_loss(at(2, 1)));
        assert!(!safe.record_stop_loss(at(2, 2)));
        assert!(safe.record_stop_loss(at(2, 3)));
        assert!(!safe.can_trade(at(2, 4)));
        assert!(!safe.record_stop_loss(at(2, 5)));

        assert!(safe.can_trade(at(3, 0)));
        assert_eq!(safe.snapshot().consecutive_stop_losses, 0);
    }

    #[test]
    fn test_profit_resets_streak_until_active() {
        let mut safe = DailySafeMode::new(2);
        safe.record_stop_loss(at(2, 1));
        safe.record_profitable_close(at(2, 2));
        assert!(!safe.record_stop_loss(at(2, 3)));
        assert!(safe.record_stop_loss(at(2, 4)));
        safe.record_profitable_close(at(2, 5));
        assert!(!safe.can_trade(at(2, 6)));
    }

    #[test]
    fn test_zero_threshold_disables() {
        let mut safe = DailySafeMode::new(0);
        for hour in 0..10 {
            assert!(!safe.record_stop_loss(at(2, hour)));
        }
        assert!(safe.can_trade(at(2, 11)));
    }

    #[test]
    fn test_roll_date_reports_reset() {
        let mut safe = DailySafeMode::new(3);
        assert!(safe.roll_date(at(2, 0)));
        assert!(!safe.roll_date(at(2, 23)));
        assert!(safe.roll_date(at(3, 0)));
    }
}
