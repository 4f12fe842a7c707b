use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use trade_core::Side;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardBlock {
    #[error("cooldown: {symbol} {side} opened {elapsed_mins}m ago (cooldown {cooldown_mins}m)")]
    Cooldown {
        symbol: String,
        side: Side,
        elapsed_mins: i64,
        cooldown_mins: i64,
    },

    #[error("position_cap: {symbol} has {open} open (max {limit})")]
    PositionCap {
        symbol: String,
        open: usize,
        limit: usize,
    },
}

/// Open-side throttles: a per-direction cooldown and a per-symbol cap.
#[derive(Debug, Clone)]
pub struct OpenGuard {
    cooldown: Duration,
    max_per_symbol: usize,
    last_open: HashMap<(String, Side), DateTime<Utc>>,
}

impl OpenGuard {
    /// A zero cooldown or a zero cap disables that check.
    pub fn new(cooldown_minutes: i64, max_per_symbol: usize) -> Self {
        Self {
            cooldown: Duration::minutes(cooldown_minutes.max(0)),
            max_per_symbol,
            last_open: HashMap::new(),
        }
    }

    pub fn check_cap(&self, symbol: &str, open_count: usize) -> Result<(), GuardBlock> {
        if self.max_per_symbol > 0 && open_count >= self.max_per_symbol {
            return Err(GuardBlock::PositionCap {
                symbol: symbol.to_string(),
                open: open_count,
                limit: self.max_per_symbol,
            });
        }
        Ok(())
    }

    pub fn check_cooldown(
        &self,
        symbol: &str,
        side: Side,
        now: DateTime<Utc>,
    ) -> Result<(), GuardBlock> {
        if self.cooldown <= Duration::zero() {
            return Ok(());
        }
        match self.last_open.get(&(symbol.to_string(), side)) {
            Some(last) if now - *last < self.cooldown => Err(GuardBlock::Cooldown {
                symbol: symbol.to_string(),
                side,
                elapsed_mins: (now - *last).num_minutes(),
                cooldown_mins: self.cooldown.num_minutes(),
            }),
            _ => Ok(()),
        }
    }

    pub fn check(
        &self,
        symbol: &str,
        side: Side,
        open_count: usize,
        now: DateTime<Utc>,
    ) -> Result<(), GuardBlock> {
        self.check_cap(symbol, open_count)?;
        self.check_cooldown(symbol, side, now)
    }

    /// Keeps the latest open per symbol and side, whatever the call order.
    pub fn record_open(&mut self, symbol: &str, side: Side, at: DateTime<Utc>) {
        self.last_open
            .entry((symbol.to_string(), side))
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_cooldown_is_per_direction() {
        let mut guard = OpenGuard::new(30, 0);
        guard.record_open("BTCUSDm", Side::Long, t0());

        let soon = t0() + Duration::minutes(10);
        assert!(matches!(
            guard.check("BTCUSDm", Side::Long, 0, soon),
            Err(GuardBlock::Cooldown { elapsed_mins: 10, .. })
        ));
        assert!(guard.check("BTCUSDm", Side::Short, 0, soon).is_ok());
        assert!(guard.check("XAUUSDm", Side::Long, 0, soon).is_ok());
        assert!(guard
            .check("BTCUSDm", Side::Long, 0, t0() + Duration::minutes(30))
            .is_ok());
    }

    #[test]
    fn test_cap_blocks_regardless_of_cooldown() {
        let guard = OpenGuard::new(0, 1);
        let err = guard.check("BTCUSDm", Side::Long, 1, t0()).unwrap_err();
        assert_eq!(err.to_string(), "position_cap: BTCUSDm has 1 open (max 1)");
        assert!(guard.check("BTCUSDm", Side::Long, 0, t0()).is_ok());
    }

    #[test]
    fn test_older_open_does_not_shorten_cooldown() {
        let mut guard = OpenGuard::new(60, 0);
        guard.record_open("XAUUSDm", Side::Long, t0());
        guard.record_open("XAUUSDm", Side::Long, t0() - Duration::hours(5));
        assert!(guard
            .check_cooldown("XAUUSDm", Side::Long, t0() + Duration::minutes(30))
            .is_err());
    }
}
