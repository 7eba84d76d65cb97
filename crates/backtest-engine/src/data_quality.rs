//! Series-level integrity checks run before a backtest touches the data.
//!
//! `Series` construction already rejects unsorted input and broken OHLC
//! bars; this sweep adds the gap policy, which depends on backtest
//! configuration rather than on the data alone.

use chrono::Duration;

use market_core::{PlatformError, Series};

/// Verify consecutive bars are separated by no more than `max_gap_bars`
/// bar intervals. Weekend and holiday gaps pass as long as the limit is
/// sized for the timeframe; anything larger aborts the run for this symbol.
pub fn check_gaps(series: &Series, max_gap_bars: usize) -> Result<(), PlatformError> {
    let limit: Duration = series.timeframe().to_duration() * max_gap_bars as i32;

    for pair in series.bars().windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        if gap > limit {
            return Err(PlatformError::DataIntegrity(format!(
                "{} {}: gap of {} hours between {} and {} exceeds {} bar intervals",
                series.symbol(),
                series.timeframe().name(),
                gap.num_hours(),
                pair[0].timestamp,
                pair[1].timestamp,
                max_gap_bars
            )));
        }
    }
    Ok(())
}
