use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::{risk_reward, Side};

use crate::models::*;

const LEVEL_EPSILON: f64 = 1e-12;

/// Simulated broker holding equity, reserved margin and the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperBroker {
    equity: f64,
    fee_rate: f64,
    trades: Vec<PaperTrade>,
    counter: u64,
}

impl PaperBroker {
    pub fn new(initial_equity: f64, fee_rate: f64) -> Self {
        Self {
            equity: initial_equity,
            fee_rate: fee_rate.max(0.0),
            trades: Vec::new(),
            counter: 0,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn used_margin(&self) -> f64 {
        self.trades
            .iter()
            .filter(|t| t.is_open())
            .map(|t| t.margin_required)
            .sum()
    }

    /// Equity not reserved by open trades.
    pub fn available_equity(&self) -> f64 {
        self.equity - self.used_margin()
    }

    pub fn trades(&self) -> &[PaperTrade] {
        &self.trades
    }

    pub fn get(&self, trade_id: &str) -> Option<&PaperTrade> {
        self.trades.iter().find(|t| t.id == trade_id)
    }

    pub fn open_trades<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a PaperTrade> + 'a {
        self.trades
            .iter()
            .filter(move |t| t.is_open() && t.symbol == symbol)
    }

    /// Reserve margin, charge the entry fee and record a new open trade.
    pub fn open(&mut self, order: OpenOrder, now: DateTime<Utc>) -> ExecutionResult<String> {
        validate_order(&order)?;

        let entry_fee = order.entry * order.quantity * order.contract_size * self.fee_rate;
        let required = order.margin_required + entry_fee;
        let free = self.available_equity();
        if required > free {
            tracing::warn!(
                "Paper open rejected for {}: margin {:.2} + fee {:.2} > free {:.2}",
                order.symbol,
                order.margin_required,
                entry_fee,
                free
            );
            return Err(ExecutionError::InsufficientMargin { required, free });
        }

        self.equity -= entry_fee;
        self.counter += 1;
        let id = format!("T{:05}", self.counter);

        tracing::info!(
            "Paper open {} {} {} qty={} entry={:.5} stop={:.5} take={:.5} margin={:.2}",
            id,
            order.symbol,
            order.side,
            order.quantity,
            order.entry,
            order.stop,
            order.take,
            order.margin_required
        );

        self.trades.push(PaperTrade {
            id: id.clone(),
            symbol: order.symbol,
            side: order.side,
            entry: order.entry,
            stop: order.stop,
            take: order.take,
            risk_reward: risk_reward(order.entry, order.stop, order.take),
            quantity: order.quantity,
            contract_size: order.contract_size,
            margin_required: order.margin_required,
            opened_at: now,
            closed_at: None,
            status: TradeStatus::Open,
            entry_fee,
            exit_fee: 0.0,
            exit_price: None,
            exit_reason: None,
            pnl: 0.0,
            mfe: 0.0,
            mae: 0.0,
        });
        Ok(id)
    }

    /// Apply one bar to the open trades of `symbol`, closing any whose stop or
    /// take was crossed. Returns the trades closed by this bar.
    pub fn mark(
        &mut self,
        symbol: &str,
        high: f64,
        low: f64,
        now: DateTime<Utc>,
    ) -> Vec<PaperTrade> {
        let mut exits = Vec::new();
        for idx in 0..self.trades.len() {
            let trade = &mut self.trades[idx];
            if !trade.is_open() || trade.symbol != symbol {
                continue;
            }
            trade.track_excursion(high, low);
            if let Some(exit) = trade.pending_exit(high, low) {
                if let Some(closed) = self.settle(idx, exit.price, exit.reason, now) {
                    exits.push(closed);
                }
            }
        }
        exits
    }

    /// Crossings `mark` would execute, without touching state.
    pub fn pending_exits(&self, symbol: &str, high: f64, low: f64) -> Vec<(String, PendingExit)> {
        self.open_trades(symbol)
            .filter_map(|t| t.pending_exit(high, low).map(|exit| (t.id.clone(), exit)))
            .collect()
    }

    /// Tighten the stop and/or retarget the take.
    ///
    /// `new_rr` retargets the take from the (possibly new) stop distance when
    /// no explicit take is given.
    pub fn adjust(
        &mut self,
        trade_id: &str,
        new_stop: Option<f64>,
        new_take: Option<f64>,
        new_rr: Option<f64>,
    ) -> Result<(), AdjustRejected> {
        let trade = self
            .trades
            .iter_mut()
            .find(|t| t.id == trade_id)
            .ok_or(AdjustRejected::UnknownTrade)?;
        if !trade.is_open() {
            return Err(AdjustRejected::NotOpen);
        }

        let stop = new_stop.unwrap_or(trade.stop);
        let loosens = match trade.side {
            Side::Long => stop < trade.stop - LEVEL_EPSILON,
            Side::Short => stop > trade.stop + LEVEL_EPSILON,
        };
        if loosens {
            return Err(AdjustRejected::LoosensStop);
        }

        let take = match (new_take, new_rr) {
            (Some(take), _) => take,
            (None, Some(rr)) if rr > 0.0 => {
                trade.entry + trade.side.sign() * rr * (trade.entry - stop).abs()
            }
            _ => trade.take,
        };

        let ordered = match trade.side {
            Side::Long => stop < take,
            Side::Short => take < stop,
        };
        if !(stop.is_finite() && take.is_finite() && stop > 0.0 && take > 0.0 && ordered) {
            return Err(AdjustRejected::InvalidLevels);
        }
        if (stop - trade.stop).abs() <= LEVEL_EPSILON && (take - trade.take).abs() <= LEVEL_EPSILON {
            return Err(AdjustRejected::NoChange);
        }

        tracing::info!(
            "Paper adjust {}: stop {:.5} -> {:.5}, take {:.5} -> {:.5}",
            trade.id,
            trade.stop,
            stop,
            trade.take,
            take
        );
        trade.stop = stop;
        trade.take = take;
        trade.recompute_rr();
        Ok(())
    }

    /// Close at an explicit price. Closing an unknown or closed trade is a no-op.
    pub fn close(
        &mut self,
        trade_id: &str,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Option<PaperTrade> {
        let idx = self
            .trades
            .iter()
            .position(|t| t.id == trade_id && t.is_open())?;
        self.settle(idx, price, reason, now)
    }

    fn settle(
        &mut self,
        idx: usize,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Option<PaperTrade> {
        let fee_rate = self.fee_rate;
        let trade = self.trades.get_mut(idx)?;
        if !trade.is_open() {
            return None;
        }
        let exit_fee = price * trade.quantity * trade.contract_size * fee_rate;
        let pnl = trade.gross_pnl_at(price) - exit_fee;

        trade.exit_fee = exit_fee;
        trade.pnl = pnl;
        trade.exit_price = Some(price);
        trade.exit_reason = Some(reason);
        trade.closed_at = Some(now);
        trade.status = TradeStatus::Closed;
        self.equity += pnl;

        tracing::info!(
            "Paper close {} {} {} at {:.5} pnl={:.2}",
            trade.id,
            trade.symbol,
            reason,
            price,
            pnl
        );
        Some(trade.clone())
    }

    pub fn summary(&self) -> BrokerSummary {
        let closed: Vec<&PaperTrade> = self.trades.iter().filter(|t| !t.is_open()).collect();
        let wins = closed.iter().filter(|t| t.pnl > 0.0).count();
        let gross_profit: f64 = closed.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = closed
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);
        let used_margin = self.used_margin();

        BrokerSummary {
            equity: self.equity,
            available_equity: self.equity - used_margin,
            used_margin,
            trades: self.trades.len(),
            open: self.trades.len() - closed.len(),
            closed: closed.len(),
            wins,
            win_rate: if closed.is_empty() {
                0.0
            } else {
                wins as f64 / closed.len() as f64
            },
            pnl_total: closed.iter().map(|t| t.pnl).sum(),
            profit_factor,
        }
    }
}

fn validate_order(order: &OpenOrder) -> ExecutionResult<()> {
    let prices = [order.entry, order.stop, order.take];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(ExecutionError::InvalidOrder("non-positive price".to_string()));
    }
    if !(order.quantity > 0.0) || !(order.contract_size > 0.0) {
        return Err(ExecutionError::InvalidOrder("non-positive quantity".to_string()));
    }
    if !(order.margin_required >= 0.0) {
        return Err(ExecutionError::InvalidOrder("negative margin".to_string()));
    }
    let ordered = match order.side {
        Side::Long => order.stop < order.entry && order.entry < order.take,
        Side::Short => order.take < order.entry && order.entry < order.stop,
    };
    if !ordered {
        return Err(ExecutionError::InvalidOrder(format!(
            "{} levels out of order",
            order.side
        )));
    }
    Ok(())
}
