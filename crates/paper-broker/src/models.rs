use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trade_core::{risk_reward, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    TakeHit,
    ManualClose,
    ReviewClose,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopHit => "stop_hit",
            ExitReason::TakeHit => "take_hit",
            ExitReason::ManualClose => "manual_close",
            ExitReason::ReviewClose => "review_close",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to open a simulated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub quantity: f64,
    pub margin_required: f64,
    /// Units of the underlying per lot.
    pub contract_size: f64,
}

/// A level crossing detected on a bar but not yet executed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingExit {
    pub reason: ExitReason,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperTrade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub risk_reward: f64,
    pub quantity: f64,
    pub contract_size: f64,
    pub margin_required: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: f64,
    /// Max favourable excursion in price units.
    pub mfe: f64,
    /// Max adverse excursion in price units.
    pub mae: f64,
}

impl PaperTrade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Detect a stop or take crossing on a bar. The stop wins when both cross.
    pub fn pending_exit(&self, high: f64, low: f64) -> Option<PendingExit> {
        if !self.is_open() {
            return None;
        }
        let (stop_hit, take_hit) = match self.side {
            Side::Long => (low <= self.stop, high >= self.take),
            Side::Short => (high >= self.stop, low <= self.take),
        };
        if stop_hit {
            Some(PendingExit {
                reason: ExitReason::StopHit,
                price: self.stop,
            })
        } else if take_hit {
            Some(PendingExit {
                reason: ExitReason::TakeHit,
                price: self.take,
            })
        } else {
            None
        }
    }

    pub(crate) fn track_excursion(&mut self, high: f64, low: f64) {
        let (favourable, adverse) = match self.side {
            Side::Long => (high - self.entry, self.entry - low),
            Side::Short => (self.entry - low, high - self.entry),
        };
        self.mfe = self.mfe.max(favourable);
        self.mae = self.mae.max(adverse);
    }

    /// Price delta in the trade's favour times size.
    pub fn gross_pnl_at(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry) * self.quantity * self.contract_size
    }

    pub(crate) fn recompute_rr(&mut self) {
        self.risk_reward = risk_reward(self.entry, self.stop, self.take);
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("insufficient margin: required {required:.2}, free {free:.2}")]
    InsufficientMargin { required: f64, free: f64 },

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustRejected {
    #[error("unknown_trade")]
    UnknownTrade,
    #[error("not_open")]
    NotOpen,
    #[error("loosens_stop")]
    LoosensStop,
    #[error("invalid_levels")]
    InvalidLevels,
    #[error("no_change")]
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSummary {
    pub equity: f64,
    pub available_equity: f64,
    pub used_margin: f64,
    pub trades: usize,
    pub open: usize,
    pub closed: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub pnl_total: f64,
    /// Gross profit over gross loss; `None` until a trade closes at a loss.
    pub profit_factor: Option<f64>,
}
