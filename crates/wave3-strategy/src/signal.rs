use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market_core::{LadderRung, Side};

/// The tiered take-profit plan attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetLadder {
    rungs: Vec<LadderRung>,
}

impl TargetLadder {
    pub fn new(rungs: Vec<LadderRung>) -> Self {
        Self { rungs }
    }

    pub fn rungs(&self) -> &[LadderRung] {
        &self.rungs
    }

    /// Price level of one rung, `reward_multiple` × R beyond entry.
    pub fn rung_price(&self, rung: &LadderRung, entry: f64, risk: f64, side: Side) -> f64 {
        entry + side.sign() * risk * rung.reward_multiple
    }

    /// Realized R if every rung fills at its level: the dot product of
    /// fractions and reward multiples.
    pub fn full_fill_r(&self) -> f64 {
        self.rungs
            .iter()
            .map(|r| r.fraction * r.reward_multiple)
            .sum()
    }
}

/// Which confirmation checks agreed with the setup at the trigger bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationFlags {
    /// MACD histogram on the side of the trade
    pub macd_aligned: bool,
    /// RSI inside the favorable, non-extreme band
    pub rsi_favorable: bool,
    /// ADX above the trend threshold
    pub adx_strong: bool,
    /// ATR above its own short rolling mean
    pub atr_expanding: bool,
    /// Trigger-bar volume above the configured multiple of its mean
    pub volume_surge: bool,
    /// Directional candle with sufficient body
    pub candle_direction: bool,
    /// Daily EMA72 sloping with the trade
    pub daily_trend_strength: bool,
    /// No adverse RSI-vs-price divergence
    pub no_adverse_divergence: bool,
}

/// Score contribution of each confirmation flag. The contributor set is
/// fixed; the weights are tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub macd_aligned: u8,
    pub rsi_favorable: u8,
    pub adx_strong: u8,
    pub atr_expanding: u8,
    pub volume_surge: u8,
    pub candle_direction: u8,
    pub daily_trend_strength: u8,
    pub no_adverse_divergence: u8,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            macd_aligned: 15,
            rsi_favorable: 15,
            adx_strong: 10,
            atr_expanding: 10,
            volume_surge: 15,
            candle_direction: 10,
            daily_trend_strength: 10,
            no_adverse_divergence: 15,
        }
    }
}

impl ConfirmationFlags {
    /// Sum the weights of the flags that fired (0-100 with default weights).
    pub fn score(&self, weights: &QualityWeights) -> u8 {
        let mut total: u32 = 0;
        if self.macd_aligned {
            total += weights.macd_aligned as u32;
        }
        if self.rsi_favorable {
            total += weights.rsi_favorable as u32;
        }
        if self.adx_strong {
            total += weights.adx_strong as u32;
        }
        if self.atr_expanding {
            total += weights.atr_expanding as u32;
        }
        if self.volume_surge {
            total += weights.volume_surge as u32;
        }
        if self.candle_direction {
            total += weights.candle_direction as u32;
        }
        if self.daily_trend_strength {
            total += weights.daily_trend_strength as u32;
        }
        if self.no_adverse_divergence {
            total += weights.no_adverse_divergence as u32;
        }
        total.min(100) as u8
    }
}

/// Daily-context trend state gating signal emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendContext {
    Uptrend,
    Downtrend,
    Neutral,
}

impl TrendContext {
    /// The side this context permits, if any.
    pub fn permitted_side(&self) -> Option<Side> {
        match self {
            TrendContext::Uptrend => Some(Side::Long),
            TrendContext::Downtrend => Some(Side::Short),
            TrendContext::Neutral => None,
        }
    }
}

/// Snapshot of the daily context at signal time, kept with the signal for
/// later inspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub trend: TrendContext,
    pub daily_close: f64,
    pub daily_ema_17: f64,
    pub daily_ema_72: f64,
    pub daily_ema_72_slope: f64,
}

/// A candidate trade emitted at the close of a trigger bar. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub symbol: String,
    pub trigger_timestamp: DateTime<Utc>,
    /// Index of the trigger bar within the trigger series the engine scanned.
    pub trigger_index: usize,
    pub side: Side,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub ladder: TargetLadder,
    pub quality_score: u8,
    pub confirmations: ConfirmationFlags,
    pub context: ContextSnapshot,
}

impl CandidateSignal {
    /// The unit of risk: distance from entry to the initial stop.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }
}
