use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Latency samples kept per day.
const LATENCY_SAMPLES: usize = 100;

/// Daily token budget shared by every chat client. A zero budget only counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageBudget {
    pub daily_tokens: u64,
    pub warn_ratio: f64,
}

impl Default for UsageBudget {
    fn default() -> Self {
        Self {
            daily_tokens: 0,
            warn_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayUsage {
    pub total_tokens: u64,
    pub calls: u64,
    pub warned: bool,
    pub tasks: BTreeMap<String, u64>,
    pub latency_ms: VecDeque<u64>,
}

impl DayUsage {
    pub fn avg_latency_ms(&self) -> f64 {
        match self.latency_ms.len() {
            0 => 0.0,
            n => self.latency_ms.iter().sum::<u64>() as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Warn,
    Exceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetInfo {
    pub date: NaiveDate,
    pub total_tokens: u64,
    pub budget: u64,
    pub level: BudgetLevel,
}

/// Crossings produced by one recorded call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageCheck {
    /// Set once per day, on the call that first reaches the warn ratio.
    pub warn: Option<BudgetInfo>,
    pub exceeded: Option<BudgetInfo>,
}

/// Token usage per UTC day and task.
#[derive(Debug, Default)]
pub struct UsageTracker {
    budget: UsageBudget,
    days: Mutex<BTreeMap<NaiveDate, DayUsage>>,
}

impl UsageTracker {
    pub fn new(budget: UsageBudget) -> Self {
        Self {
            budget,
            days: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn budget(&self) -> UsageBudget {
        self.budget
    }

    fn days(&self) -> MutexGuard<'_, BTreeMap<NaiveDate, DayUsage>> {
        self.days.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Some` when the day's budget is already spent.
    pub fn exhausted(&self, date: NaiveDate) -> Option<BudgetInfo> {
        if self.budget.daily_tokens == 0 {
            return None;
        }
        let total = self.days().get(&date).map_or(0, |d| d.total_tokens);
        (total >= self.budget.daily_tokens).then(|| BudgetInfo {
            date,
            total_tokens: total,
            budget: self.budget.daily_tokens,
            level: BudgetLevel::Exceeded,
        })
    }

    pub fn record(&self, date: NaiveDate, task: &str, tokens: u64, latency_ms: u64) -> UsageCheck {
        if tokens == 0 {
            return UsageCheck::default();
        }
        let mut days = self.days();
        let day = days.entry(date).or_default();
        day.total_tokens += tokens;
        day.calls += 1;
        *day.tasks.entry(task.to_string()).or_insert(0) += tokens;
        day.latency_ms.push_back(latency_ms);
        while day.latency_ms.len() > LATENCY_SAMPLES {
            day.latency_ms.pop_front();
        }

        let budget = self.budget.daily_tokens;
        if budget == 0 {
            return UsageCheck::default();
        }
        let total = day.total_tokens;
        let info = |level| BudgetInfo {
            date,
            total_tokens: total,
            budget,
            level,
        };
        let mut check = UsageCheck::default();
        if !day.warned && total as f64 >= budget as f64 * self.budget.warn_ratio {
            day.warned = true;
            check.warn = Some(info(BudgetLevel::Warn));
        }
        if total >= budget {
            check.exceeded = Some(info(BudgetLevel::Exceeded));
        }
        check
    }

    pub fn day(&self, date: NaiveDate) -> Option<DayUsage> {
        self.days().get(&date).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<NaiveDate, DayUsage> {
        self.days().clone()
    }

    /// Replace the history; days before `keep_from` are dropped.
    pub fn restore(&self, saved: BTreeMap<NaiveDate, DayUsage>, keep_from: NaiveDate) {
        let mut days = self.days();
        *days = saved;
        days.retain(|date, _| *date >= keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_warn_once_then_exceed() {
        let tracker = UsageTracker::new(UsageBudget {
            daily_tokens: 1000,
            warn_ratio: 0.5,
        });
        assert_eq!(tracker.record(day(2), "decision", 400, 900), UsageCheck::default());

        let check = tracker.record(day(2), "review", 200, 1100);
        assert_eq!(check.warn.map(|w| w.total_tokens), Some(600));
        assert!(check.exceeded.is_none());

        let check = tracker.record(day(2), "decision", 500, 700);
        assert!(check.warn.is_none());
        assert_eq!(check.exceeded.map(|e| e.level), Some(BudgetLevel::Exceeded));
        assert!(tracker.exhausted(day(2)).is_some());
        assert!(tracker.exhausted(day(3)).is_none());

        let usage = tracker.day(day(2)).unwrap();
        assert_eq!(usage.calls, 3);
        assert_eq!(usage.tasks["decision"], 900);
        assert!((usage.avg_latency_ms() - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_budget_only_counts() {
        let tracker = UsageTracker::new(UsageBudget::default());
        assert_eq!(tracker.record(day(2), "decision", 50_000, 10), UsageCheck::default());
        assert!(tracker.exhausted(day(2)).is_none());
        assert_eq!(tracker.record(day(2), "decision", 0, 10), UsageCheck::default());
        assert_eq!(tracker.day(day(2)).unwrap().calls, 1);
    }

    #[test]
    fn test_latency_window_and_restore() {
        let tracker = UsageTracker::new(UsageBudget::default());
        for i in 0..150 {
            tracker.record(day(1), "decision", 1, i);
        }
        tracker.record(day(2), "decision", 1, 5);
        assert_eq!(tracker.day(day(1)).unwrap().latency_ms.len(), LATENCY_SAMPLES);

        let json = serde_json::to_string(&tracker.snapshot()).unwrap();
        let restored = UsageTracker::new(UsageBudget::default());
        restored.restore(serde_json::from_str(&json).unwrap(), day(2));
        assert!(restored.day(day(1)).is_none());
        assert_eq!(restored.day(day(2)).unwrap().total_tokens, 1);
    }
}
