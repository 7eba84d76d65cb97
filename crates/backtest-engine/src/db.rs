//! SQL implementations of the bar-source and trade-sink boundaries.
//!
//! Timestamps are stored as RFC 3339 text so the same schema works across
//! the `Any` drivers. The trade sink is idempotent per trade id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use market_core::{Bar, BarSource, ClosedTrade, PlatformError, Series, Side, Timeframe, TradeSink};

fn storage_err(context: &str, e: impl std::fmt::Display) -> PlatformError {
    PlatformError::Storage(format!("{}: {}", context, e))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, PlatformError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| PlatformError::DataIntegrity(format!("bad timestamp '{}': {}", raw, e)))
}

/// Persists closed trades. One row per trade id; replays are no-ops.
pub struct SqlTradeStore {
    pool: sqlx::AnyPool,
}

impl SqlTradeStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), PlatformError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wave3_trades (
                trade_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_time TEXT NOT NULL,
                exit_price_effective REAL NOT NULL,
                quantity REAL NOT NULL,
                gross_pnl REAL NOT NULL,
                return_pct REAL NOT NULL,
                holding_bars INTEGER NOT NULL,
                max_favorable_excursion REAL NOT NULL,
                max_adverse_excursion REAL NOT NULL,
                exit_reason TEXT NOT NULL,
                quality_score INTEGER NOT NULL,
                gate_confidence REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("create wave3_trades", e))?;
        Ok(())
    }
}

#[async_trait]
impl TradeSink for SqlTradeStore {
    /// Record a batch of trades. Rows whose trade_id is already present are
    /// left untouched, so replaying a backtest's output is safe.
    async fn record_trades(&self, trades: &[ClosedTrade]) -> Result<usize, PlatformError> {
        let mut inserted = 0usize;
        for trade in trades {
            let (exists,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM wave3_trades WHERE trade_id = ?",
            )
            .bind(&trade.trade_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_err("trade lookup", e))?;
            if exists > 0 {
                continue;
            }

            sqlx::query(
                "INSERT INTO wave3_trades (
                    trade_id, symbol, side, entry_time, entry_price,
                    exit_time, exit_price_effective, quantity, gross_pnl,
                    return_pct, holding_bars, max_favorable_excursion,
                    max_adverse_excursion, exit_reason, quality_score,
                    gate_confidence
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&trade.trade_id)
            .bind(&trade.symbol)
            .bind(trade.side.name())
            .bind(trade.entry_time.to_rfc3339())
            .bind(trade.entry_price)
            .bind(trade.exit_time.to_rfc3339())
            .bind(trade.exit_price_effective)
            .bind(trade.quantity)
            .bind(trade.gross_pnl)
            .bind(trade.return_pct)
            .bind(trade.holding_bars as i64)
            .bind(trade.max_favorable_excursion)
            .bind(trade.max_adverse_excursion)
            .bind(trade.exit_reason.name())
            .bind(trade.quality_score as i64)
            .bind(trade.gate_confidence)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("trade insert", e))?;
            inserted += 1;
        }
        info!(total = trades.len(), inserted, "trades recorded");
        Ok(inserted)
    }
}

/// Reads OHLCV history from the shared bars table.
pub struct SqlBarSource {
    pool: sqlx::AnyPool,
}

impl SqlBarSource {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BarSource for SqlBarSource {
    async fn load_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Series, PlatformError> {
        let rows: Vec<(String, f64, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT ts, open, high, low, close, volume
             FROM bars
             WHERE symbol = ? AND timeframe = ? AND ts >= ? AND ts <= ?
             ORDER BY ts ASC",
        )
        .bind(symbol)
        .bind(timeframe.name())
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("bar query", e))?;

        let mut bars = Vec::with_capacity(rows.len());
        for (ts, open, high, low, close, volume) in rows {
            bars.push(Bar {
                timestamp: parse_ts(&ts)?,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        // Series::new re-checks ordering and the OHLC invariants, so a
        // corrupted table surfaces as DataIntegrity rather than bad math.
        Series::new(symbol, timeframe, bars)
    }
}

/// Convenience: map a side name stored in the database back to the enum.
pub fn side_from_name(name: &str) -> Result<Side, PlatformError> {
    match name {
        "long" => Ok(Side::Long),
        "short" => Ok(Side::Short),
        other => Err(PlatformError::DataIntegrity(format!(
            "unknown side '{}'",
            other
        ))),
    }
}
