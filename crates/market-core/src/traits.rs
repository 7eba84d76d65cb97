use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{ClosedTrade, PlatformError, Series, Timeframe};

/// Source of historical bars. Implementations must return bars in strictly
/// increasing timestamp order with no duplicates, covering the closed range;
/// market-holiday gaps are acceptable.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn load_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Series, PlatformError>;
}

/// Sink for closed trades. Implementations must be idempotent per
/// `trade_id`: recording the same batch twice persists each trade once.
/// Returns the number of rows actually written.
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn record_trades(&self, trades: &[ClosedTrade]) -> Result<usize, PlatformError>;
}
