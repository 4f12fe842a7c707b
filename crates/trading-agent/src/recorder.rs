use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use paper_broker::PaperTrade;
use position_store::PositionRecord;
use serde::Serialize;

/// Closed-trade totals for one symbol on one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub symbol: String,
    pub trades: u64,
    pub wins: u64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub pnl_total: f64,
}

impl DailyPerformance {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    /// `None` while the day has no losing trade.
    pub fn profit_factor(&self) -> Option<f64> {
        (self.gross_loss > 0.0).then(|| self.gross_profit / self.gross_loss)
    }
}

/// Durable journal of positions, fills and notable system events.
///
/// Failures are reported to the caller, which logs them; they never alter
/// trading state.
#[async_trait]
pub trait TradeRecorder: Send + Sync {
    async fn upsert_position(&self, record: &PositionRecord) -> Result<()>;

    async fn record_trade_open(&self, trade: &PaperTrade, position_id: &str) -> Result<()>;

    async fn record_trade_close(&self, trade: &PaperTrade, position_id: &str) -> Result<()>;

    async fn record_event(&self, kind: &str, symbol: Option<&str>, detail: &str) -> Result<()>;

    /// Per-symbol totals of the trades closed on `date`.
    async fn daily_performance(&self, _date: NaiveDate) -> Result<Vec<DailyPerformance>> {
        Ok(Vec::new())
    }
}

/// Discards everything.
pub struct NullRecorder;

#[async_trait]
impl TradeRecorder for NullRecorder {
    async fn upsert_position(&self, _record: &PositionRecord) -> Result<()> {
        Ok(())
    }

    async fn record_trade_open(&self, _trade: &PaperTrade, _position_id: &str) -> Result<()> {
        Ok(())
    }

    async fn record_trade_close(&self, _trade: &PaperTrade, _position_id: &str) -> Result<()> {
        Ok(())
    }

    async fn record_event(&self, _kind: &str, _symbol: Option<&str>, _detail: &str) -> Result<()> {
        Ok(())
    }
}

pub struct SqlRecorder {
    db_pool: sqlx::AnyPool,
}

impl SqlRecorder {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry REAL NOT NULL,
                stop REAL NOT NULL,
                take REAL NOT NULL,
                risk_reward REAL NOT NULL,
                quantity REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_review_at TEXT,
                closed_at TEXT,
                exit_price REAL,
                exit_reason TEXT,
                realized_pnl REAL,
                paper_trade_id TEXT
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL,
                position_id TEXT NOT NULL,
                event TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                quantity REAL NOT NULL,
                fee REAL NOT NULL,
                pnl REAL,
                reason TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                symbol TEXT,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS performance_daily (
                date TEXT NOT NULL,
                symbol TEXT NOT NULL,
                trades INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                gross_profit REAL NOT NULL DEFAULT 0,
                gross_loss REAL NOT NULL DEFAULT 0,
                pnl_total REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (date, symbol)
            )",
        )
        .execute(&self.db_pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_position ON trades(position_id)")
            .execute(&self.db_pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_kind ON system_events(kind)")
            .execute(&self.db_pool)
            .await
            .ok();

        Ok(())
    }
}

#[async_trait]
impl TradeRecorder for SqlRecorder {
    async fn upsert_position(&self, record: &PositionRecord) -> Result<()> {
        let status = if record.is_open() { "open" } else { "closed" };
        sqlx::query(
            "INSERT INTO positions
             (id, symbol, side, entry, stop, take, risk_reward, quantity, status,
              created_at, updated_at, last_review_at, closed_at, exit_price, exit_reason,
              realized_pnl, paper_trade_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
              stop = excluded.stop,
              take = excluded.take,
              risk_reward = excluded.risk_reward,
              status = excluded.status,
              updated_at = excluded.updated_at,
              last_review_at = excluded.last_review_at,
              closed_at = excluded.closed_at,
              exit_price = excluded.exit_price,
              exit_reason = excluded.exit_reason,
              realized_pnl = excluded.realized_pnl",
        )
        .bind(&record.id)
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.entry)
        .bind(record.stop)
        .bind(record.take)
        .bind(record.risk_reward)
        .bind(record.quantity)
        .bind(status)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.last_review_at.map(|t| t.to_rfc3339()))
        .bind(record.closed_at.map(|t| t.to_rfc3339()))
        .bind(record.exit_price)
        .bind(record.exit_reason.as_deref())
        .bind(record.realized_pnl)
        .bind(record.paper_trade_id.as_deref())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn record_trade_open(&self, trade: &PaperTrade, position_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades
             (trade_id, position_id, event, symbol, side, price, quantity, fee, pnl, reason, created_at)
             VALUES (?, ?, 'open', ?, ?, ?, ?, ?, NULL, NULL, ?)",
        )
        .bind(&trade.id)
        .bind(position_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.entry)
        .bind(trade.quantity)
        .bind(trade.entry_fee)
        .bind(trade.opened_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn record_trade_close(&self, trade: &PaperTrade, position_id: &str) -> Result<()> {
        let closed_at = trade.closed_at.unwrap_or_else(chrono::Utc::now);
        sqlx::query(
            "INSERT INTO trades
             (trade_id, position_id, event, symbol, side, price, quantity, fee, pnl, reason, created_at)
             VALUES (?, ?, 'close', ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(position_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.exit_price.unwrap_or(trade.entry))
        .bind(trade.quantity)
        .bind(trade.exit_fee)
        .bind(trade.pnl)
        .bind(trade.exit_reason.map(|r| r.as_str()))
        .bind(closed_at.to_rfc3339())
        .execute(&self.db_pool)
        .await?;

        let win = i64::from(trade.pnl > 0.0);
        sqlx::query(
            "INSERT INTO performance_daily
             (date, symbol, trades, wins, gross_profit, gross_loss, pnl_total, updated_at)
             VALUES (?, ?, 1, ?, ?, ?, ?, ?)
             ON CONFLICT(date, symbol) DO UPDATE SET
              trades = trades + 1,
              wins = wins + excluded.wins,
              gross_profit = gross_profit + excluded.gross_profit,
              gross_loss = gross_loss + excluded.gross_loss,
              pnl_total = pnl_total + excluded.pnl_total,
              updated_at = excluded.updated_at",
        )
        .bind(closed_at.date_naive().to_string())
        .bind(&trade.symbol)
        .bind(win)
        .bind(trade.pnl.max(0.0))
        .bind((-trade.pnl).max(0.0))
        .bind(trade.pnl)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn record_event(&self, kind: &str, symbol: Option<&str>, detail: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_events (kind, symbol, detail, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(symbol)
        .bind(detail)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn daily_performance(&self, date: NaiveDate) -> Result<Vec<DailyPerformance>> {
        let rows: Vec<(String, i64, i64, f64, f64, f64)> = sqlx::query_as(
            "SELECT symbol, trades, wins, gross_profit, gross_loss, pnl_total
             FROM performance_daily WHERE date = ? ORDER BY symbol",
        )
        .bind(date.to_string())
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(symbol, trades, wins, gross_profit, gross_loss, pnl_total)| DailyPerformance {
                date,
                symbol,
                trades: trades.max(0) as u64,
                wins: wins.max(0) as u64,
                gross_profit,
                gross_loss,
                pnl_total,
            })
            .collect())
    }
}
