use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use market_core::{ClosedTrade, ExitReason};

/// A candidate the gate rejected; recorded but never simulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub symbol: String,
    pub trigger_timestamp: DateTime<Utc>,
    pub quality_score: u8,
    pub confidence: f64,
}

/// The product of one completed fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    /// Test-window trades in exit-time order.
    pub trades: Vec<ClosedTrade>,
    pub rejected: Vec<RejectedSignal>,
    pub test_signal_count: usize,
    pub accepted_count: usize,
    /// True when gate training failed and the fold ran without a gate.
    pub ungated: bool,
}

/// What happened to one fold of the walk-forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FoldOutcome {
    /// Too few training signals; nothing was run.
    Skipped { reason: String },
    /// The test window produced zero candidates. A valid result, not an error.
    Empty,
    /// A structural failure confined to this fold.
    Failed { reason: String },
    Completed(FoldResult),
}

/// One fold's report, always produced whether or not the fold ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold_number: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub train_signal_count: usize,
    pub outcome: FoldOutcome,
}

impl FoldReport {
    pub fn trades(&self) -> &[ClosedTrade] {
        match &self.outcome {
            FoldOutcome::Completed(result) => &result.trades,
            _ => &[],
        }
    }
}

/// The walk-forward output for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRunReport {
    pub symbol: String,
    pub folds: Vec<FoldReport>,
    /// True when the run was cancelled and later folds never executed.
    pub cancelled: bool,
}

impl SymbolRunReport {
    /// All test-window trades across completed folds, in exit-time order.
    pub fn all_trades(&self) -> Vec<ClosedTrade> {
        let mut trades: Vec<ClosedTrade> = self
            .folds
            .iter()
            .flat_map(|f| f.trades().iter().cloned())
            .collect();
        trades.sort_by_key(|t| t.exit_time);
        trades
    }
}
