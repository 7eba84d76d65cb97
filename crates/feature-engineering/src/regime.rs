//! Rule-based market regime classification over an indicator table.

use serde::{Deserialize, Serialize};
use technical_analysis::{col, IndicatorTable};

/// Trend regime at one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
}

impl TrendRegime {
    pub fn name(&self) -> &'static str {
        match self {
            TrendRegime::TrendingUp => "trending_up",
            TrendRegime::TrendingDown => "trending_down",
            TrendRegime::Ranging => "ranging",
        }
    }
}

/// Volatility bucket relative to the symbol's own recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
}

/// Volume bucket relative to the rolling volume mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeBucket {
    Low,
    Normal,
    High,
}

/// Regime snapshot for one bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub trend: TrendRegime,
    pub volatility: VolatilityBucket,
    pub volume: VolumeBucket,
}

/// ADX above this level counts as a trend; below it the market is ranging.
const TREND_ADX_THRESHOLD: f64 = 20.0;

/// Lookback window for ranking the current ATR% against its own history.
const VOLATILITY_RANK_WINDOW: usize = 60;

/// Classify the regime at `idx`. Returns None while any input column is
/// still in warmup.
pub fn classify(table: &IndicatorTable, idx: usize) -> Option<RegimeSnapshot> {
    let ema_17 = table.value(col::EMA_17, idx);
    let ema_72 = table.value(col::EMA_72, idx);
    let adx = table.value(col::ADX_14, idx);
    let atr_pct = table.value(col::ATR_PCT_14, idx);
    let vol_ratio = table.value(col::VOL_RATIO, idx);

    if ema_17.is_nan() || ema_72.is_nan() || adx.is_nan() || atr_pct.is_nan() || vol_ratio.is_nan()
    {
        return None;
    }

    let trend = if adx < TREND_ADX_THRESHOLD {
        TrendRegime::Ranging
    } else if ema_17 > ema_72 {
        TrendRegime::TrendingUp
    } else if ema_17 < ema_72 {
        TrendRegime::TrendingDown
    } else {
        TrendRegime::Ranging
    };

    let volatility = classify_volatility(table.column(col::ATR_PCT_14)?, idx)?;

    let volume = if vol_ratio < 0.8 {
        VolumeBucket::Low
    } else if vol_ratio > 1.2 {
        VolumeBucket::High
    } else {
        VolumeBucket::Normal
    };

    Some(RegimeSnapshot {
        trend,
        volatility,
        volume,
    })
}

/// Bucket the current ATR% by its percentile rank over the trailing window:
/// bottom third Low, top third High.
fn classify_volatility(atr_pct: &[f64], idx: usize) -> Option<VolatilityBucket> {
    if idx + 1 < VOLATILITY_RANK_WINDOW {
        return None;
    }
    let window = &atr_pct[idx + 1 - VOLATILITY_RANK_WINDOW..=idx];
    if window.iter().any(|v| v.is_nan()) {
        return None;
    }
    let current = atr_pct[idx];
    let below = window.iter().filter(|v| **v < current).count();
    let rank = below as f64 / (window.len() - 1) as f64;

    Some(if rank < 1.0 / 3.0 {
        VolatilityBucket::Low
    } else if rank > 2.0 / 3.0 {
        VolatilityBucket::High
    } else {
        VolatilityBucket::Normal
    })
}
