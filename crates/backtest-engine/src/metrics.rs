//! Aggregate statistics over a list of closed trades.
//!
//! Everything here is a deterministic function of the trade list. The
//! Sharpe ratio follows the per-trade convention: mean over standard
//! deviation of the realized trade-return sequence, not a per-bar series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::{ClosedTrade, ExitReason};

/// Sub-population statistics for one breakdown cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub count: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_return_pct: f64,
}

impl BucketStats {
    fn push(&mut self, trade: &ClosedTrade) {
        self.count += 1;
        if trade.return_pct > 0.0 {
            self.wins += 1;
        }
        self.total_return_pct += trade.return_pct;
        self.win_rate = self.wins as f64 / self.count as f64;
    }
}

/// The full metrics block for one trade population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Simple (non-compounded) sum of per-trade returns, percent.
    pub total_return_pct: f64,
    /// Compounded alternative, percent.
    pub compounded_return_pct: f64,
    pub avg_win_pct: Option<f64>,
    pub avg_loss_pct: Option<f64>,
    pub profit_factor: Option<f64>,
    /// Per-trade Sharpe: mean / sample stdev of the return sequence.
    pub sharpe: Option<f64>,
    /// Max drawdown of the cumulative return curve in exit-time order,
    /// percent.
    pub max_drawdown_pct: f64,
    pub by_symbol: BTreeMap<String, BucketStats>,
    pub by_quality_bucket: BTreeMap<String, BucketStats>,
    pub by_exit_reason: BTreeMap<String, BucketStats>,
}

impl TradeMetrics {
    fn empty() -> Self {
        Self {
            count: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_return_pct: 0.0,
            compounded_return_pct: 0.0,
            avg_win_pct: None,
            avg_loss_pct: None,
            profit_factor: None,
            sharpe: None,
            max_drawdown_pct: 0.0,
            by_symbol: BTreeMap::new(),
            by_quality_bucket: BTreeMap::new(),
            by_exit_reason: BTreeMap::new(),
        }
    }
}

/// Label for the quality-score breakdown.
fn quality_bucket(score: u8) -> &'static str {
    match score {
        0..=54 => "<55",
        55..=64 => "55-64",
        65..=74 => "65-74",
        75..=84 => "75-84",
        _ => ">=85",
    }
}

/// Compute metrics for a trade list. `exclude_end_of_data` drops trades
/// force-closed when history ran out.
pub fn aggregate(trades: &[ClosedTrade], exclude_end_of_data: bool) -> TradeMetrics {
    let mut population: Vec<&ClosedTrade> = trades
        .iter()
        .filter(|t| !(exclude_end_of_data && t.exit_reason == ExitReason::EndOfData))
        .collect();
    if population.is_empty() {
        return TradeMetrics::empty();
    }
    population.sort_by_key(|t| t.exit_time);

    let returns: Vec<f64> = population.iter().map(|t| t.return_pct).collect();
    let count = population.len();
    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let losses = count - wins;

    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses_sum: f64 = returns.iter().filter(|r| **r <= 0.0).sum();

    let avg_win_pct = if wins > 0 {
        Some(gains / wins as f64)
    } else {
        None
    };
    let avg_loss_pct = if losses > 0 {
        Some(losses_sum / losses as f64)
    } else {
        None
    };
    let profit_factor = if losses_sum < 0.0 {
        Some(gains / losses_sum.abs())
    } else if gains > 0.0 {
        Some(f64::INFINITY)
    } else {
        None
    };

    let sharpe = if count > 1 {
        let mean = returns.as_slice().mean();
        let std_dev = returns.as_slice().std_dev();
        if std_dev > 0.0 {
            Some(mean / std_dev)
        } else {
            None
        }
    } else {
        None
    };

    // Equity curve: cumulative sum of returns in exit-time order.
    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0f64;
    for r in &returns {
        cumulative += r;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    let compounded_return_pct =
        (returns.iter().map(|r| 1.0 + r / 100.0).product::<f64>() - 1.0) * 100.0;

    let mut by_symbol: BTreeMap<String, BucketStats> = BTreeMap::new();
    let mut by_quality_bucket: BTreeMap<String, BucketStats> = BTreeMap::new();
    let mut by_exit_reason: BTreeMap<String, BucketStats> = BTreeMap::new();
    for trade in &population {
        by_symbol
            .entry(trade.symbol.clone())
            .or_default()
            .push(trade);
        by_quality_bucket
            .entry(quality_bucket(trade.quality_score).to_string())
            .or_default()
            .push(trade);
        by_exit_reason
            .entry(trade.exit_reason.name().to_string())
            .or_default()
            .push(trade);
    }

    TradeMetrics {
        count,
        wins,
        losses,
        win_rate: wins as f64 / count as f64,
        total_return_pct: returns.iter().sum(),
        compounded_return_pct,
        avg_win_pct,
        avg_loss_pct,
        profit_factor,
        sharpe,
        max_drawdown_pct: max_drawdown,
        by_symbol,
        by_quality_bucket,
        by_exit_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use market_core::Side;

    fn trade(symbol: &str, return_pct: f64, score: u8, exit_offset: i64) -> ClosedTrade {
        let entry = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let exit = Utc.timestamp_opt(1_700_000_000 + 3600 * (exit_offset + 1), 0).unwrap();
        ClosedTrade {
            trade_id: ClosedTrade::make_id(symbol, Side::Long, entry, exit),
            symbol: symbol.to_string(),
            side: Side::Long,
            entry_time: entry,
            entry_price: 100.0,
            exit_time: exit,
            exit_price_effective: 100.0 * (1.0 + return_pct / 100.0),
            quantity: 1.0,
            gross_pnl: return_pct,
            return_pct,
            holding_bars: 10,
            max_favorable_excursion: return_pct.max(0.0),
            max_adverse_excursion: (-return_pct).max(0.0),
            exit_reason: ExitReason::Target,
            quality_score: score,
            gate_confidence: 1.0,
            features_at_entry: None,
        }
    }

    #[test]
    fn test_empty_population() {
        let metrics = aggregate(&[], false);
        assert_eq!(metrics.count, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.sharpe.is_none());
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let trades = vec![
            trade("PETR4", 2.0, 60, 0),
            trade("PETR4", -1.0, 60, 1),
            trade("VALE3", 3.0, 80, 2),
            trade("VALE3", -2.0, 45, 3),
        ];
        let metrics = aggregate(&trades, false);
        assert_eq!(metrics.count, 4);
        assert_eq!(metrics.wins, 2);
        assert_eq!(metrics.losses, 2);
        assert!((metrics.win_rate - 0.5).abs() < 1e-12);
        assert!((metrics.total_return_pct - 2.0).abs() < 1e-12);
        assert!((metrics.profit_factor.unwrap() - 5.0 / 3.0).abs() < 1e-12);
        assert!((metrics.avg_win_pct.unwrap() - 2.5).abs() < 1e-12);
        assert!((metrics.avg_loss_pct.unwrap() + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown_on_cumulative_curve() {
        // +2, -1, -2, +4 → peak 2, trough -1 → drawdown 3
        let trades = vec![
            trade("PETR4", 2.0, 60, 0),
            trade("PETR4", -1.0, 60, 1),
            trade("PETR4", -2.0, 60, 2),
            trade("PETR4", 4.0, 60, 3),
        ];
        let metrics = aggregate(&trades, false);
        assert!((metrics.max_drawdown_pct - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_quality_buckets() {
        let trades = vec![
            trade("PETR4", 1.0, 50, 0),
            trade("PETR4", 1.0, 55, 1),
            trade("PETR4", 1.0, 70, 2),
            trade("PETR4", 1.0, 80, 3),
            trade("PETR4", 1.0, 90, 4),
        ];
        let metrics = aggregate(&trades, false);
        for bucket in ["<55", "55-64", "65-74", "75-84", ">=85"] {
            assert_eq!(metrics.by_quality_bucket[bucket].count, 1, "{}", bucket);
        }
    }

    #[test]
    fn test_end_of_data_exclusion() {
        let mut open_ended = trade("PETR4", 5.0, 60, 1);
        open_ended.exit_reason = ExitReason::EndOfData;
        let trades = vec![trade("PETR4", 1.0, 60, 0), open_ended];

        assert_eq!(aggregate(&trades, false).count, 2);
        let filtered = aggregate(&trades, true);
        assert_eq!(filtered.count, 1);
        assert!((filtered.total_return_pct - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_are_reproducible() {
        let trades = vec![
            trade("PETR4", 2.0, 60, 0),
            trade("VALE3", -1.0, 70, 1),
            trade("ITUB4", 0.5, 85, 2),
        ];
        assert_eq!(aggregate(&trades, false), aggregate(&trades, false));
    }
}
