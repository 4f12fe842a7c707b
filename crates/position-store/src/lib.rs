use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::{risk_reward, PositionProbe, Side};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub risk_reward: f64,
    pub quantity: f64,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_review_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    /// Execution-side handle kept in sync with this record.
    pub paper_trade_id: Option<String>,
}

impl PositionRecord {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn probe(&self) -> PositionProbe {
        PositionProbe {
            side: self.side,
            entry: self.entry,
            stop: self.stop,
            take: self.take,
        }
    }

    /// Last review, or the open time if never reviewed.
    pub fn reviewed_or_created(&self) -> DateTime<Utc> {
        self.last_review_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub quantity: f64,
    pub paper_trade_id: Option<String>,
}

/// Durable record of every position the agent has opened.
///
/// Closed records are retained for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionStore {
    records: Vec<PositionRecord>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, position: NewPosition, now: DateTime<Utc>) -> PositionRecord {
        let uuid = Uuid::new_v4().simple().to_string();
        let record = PositionRecord {
            id: format!("{}-{}", position.symbol, &uuid[..8]),
            risk_reward: risk_reward(position.entry, position.stop, position.take),
            symbol: position.symbol,
            side: position.side,
            entry: position.entry,
            stop: position.stop,
            take: position.take,
            quantity: position.quantity,
            status: PositionStatus::Open,
            created_at: now,
            updated_at: now,
            last_review_at: None,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            paper_trade_id: position.paper_trade_id,
        };
        tracing::debug!("Position {} recorded", record.id);
        self.records.push(record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<&PositionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn open_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a PositionRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.is_open() && r.symbol == symbol)
    }

    pub fn open_count(&self, symbol: &str) -> usize {
        self.open_for(symbol).count()
    }

    pub fn all_open(&self) -> Vec<&PositionRecord> {
        self.records.iter().filter(|r| r.is_open()).collect()
    }

    pub fn find_by_trade(&self, trade_id: &str) -> Option<&PositionRecord> {
        self.records
            .iter()
            .find(|r| r.paper_trade_id.as_deref() == Some(trade_id))
    }

    fn open_mut(&mut self, id: &str) -> Option<&mut PositionRecord> {
        self.records.iter_mut().find(|r| r.id == id && r.is_open())
    }

    /// Overwrite levels and recompute the reward-to-risk ratio.
    pub fn update_levels(
        &mut self,
        id: &str,
        stop: f64,
        take: f64,
        now: DateTime<Utc>,
    ) -> Option<PositionRecord> {
        let record = self.open_mut(id)?;
        record.stop = stop;
        record.take = take;
        record.risk_reward = risk_reward(record.entry, stop, take);
        record.updated_at = now;
        record.last_review_at = Some(now);
        Some(record.clone())
    }

    pub fn mark_reviewed(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        match self.open_mut(id) {
            Some(record) => {
                record.last_review_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// Close an open record. Returns None if it is unknown or already closed.
    pub fn close(
        &mut self,
        id: &str,
        exit_price: f64,
        reason: &str,
        pnl: f64,
        now: DateTime<Utc>,
    ) -> Option<PositionRecord> {
        let record = self.open_mut(id)?;
        record.status = PositionStatus::Closed;
        record.exit_price = Some(exit_price);
        record.exit_reason = Some(reason.to_string());
        record.realized_pnl = Some(pnl);
        record.closed_at = Some(now);
        record.updated_at = now;
        Some(record.clone())
    }

    pub fn closed(&self) -> Vec<&PositionRecord> {
        self.records.iter().filter(|r| !r.is_open()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
