use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::PlatformError;

/// Supported trading timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// 15-minute bars
    Min15,
    /// 60-minute bars (the default trigger timeframe)
    Hour1,
    /// Daily bars (the context timeframe)
    Daily,
}

impl Timeframe {
    /// Get the duration represented by one bar
    pub fn to_duration(&self) -> Duration {
        match self {
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Daily => Duration::days(1),
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Timeframe::Min15 => "15min",
            Timeframe::Hour1 => "60min",
            Timeframe::Daily => "daily",
        }
    }

    /// Default length of the pullback window the Wave3 trigger requires,
    /// expressed in bars of this timeframe (17 daily bars, or the
    /// equivalent span on faster timeframes).
    pub fn default_pullback_bars(&self) -> usize {
        match self {
            Timeframe::Min15 => 17 * 16,
            Timeframe::Hour1 => 68,
            Timeframe::Daily => 17,
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn name(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// +1.0 for longs, -1.0 for shorts; used to mirror price arithmetic
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// OHLCV bar data for one closed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Check the OHLC ordering invariant and non-negative volume.
    pub fn validate(&self) -> Result<(), PlatformError> {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if !(self.low <= body_low && body_high <= self.high) {
            return Err(PlatformError::DataIntegrity(format!(
                "OHLC inconsistent at {}: O={:.4} H={:.4} L={:.4} C={:.4}",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        if self.volume < 0.0 {
            return Err(PlatformError::DataIntegrity(format!(
                "Negative volume at {}: {}",
                self.timestamp, self.volume
            )));
        }
        if !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite())
        {
            return Err(PlatformError::DataIntegrity(format!(
                "Non-finite bar field at {}",
                self.timestamp
            )));
        }
        Ok(())
    }
}

/// An ordered sequence of bars for one (symbol, timeframe).
///
/// Immutable once built; the constructor enforces validity so downstream
/// consumers can index freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

impl Series {
    /// Build a series, rejecting invalid bars, unsorted timestamps and
    /// duplicates.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<Self, PlatformError> {
        for bar in &bars {
            bar.validate()?;
        }
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(PlatformError::DataIntegrity(format!(
                    "Timestamps not strictly increasing: {} then {}",
                    pair[0].timestamp, pair[1].timestamp
                )));
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bar(&self, idx: usize) -> &Bar {
        &self.bars[idx]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Index of the last bar with timestamp at or before `t`, if any.
    ///
    /// This is the as-of alignment primitive: when a trigger bar closes at
    /// `t`, the daily context is the bar at `last_index_at(t)` on the daily
    /// series. Never returns a bar from the future.
    pub fn last_index_at(&self, t: DateTime<Utc>) -> Option<usize> {
        match self.bars.binary_search_by(|b| b.timestamp.cmp(&t)) {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(idx) => Some(idx - 1),
        }
    }

    /// Sub-series over `[from, to)` by timestamp. The slice keeps the
    /// original symbol and timeframe.
    pub fn slice_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Series {
        let start = self.bars.partition_point(|b| b.timestamp < from);
        let end = self.bars.partition_point(|b| b.timestamp < to);
        Series {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            bars: self.bars[start..end].to_vec(),
        }
    }
}

/// One bar's feature values, ordered per the schema it was built under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// A vector qualifies for model input only when every value is defined.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Why a position (or its final portion) left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every ladder rung filled
    Target,
    /// Initial stop hit before the stop ever moved
    Stop,
    /// Stop hit after it had been moved (breakeven or ATR trail)
    TrailingStop,
    /// Maximum holding period reached
    Timeout,
    /// History ran out with the position still open
    EndOfData,
    /// The daily context stopped supporting the trade
    RegimeReverse,
}

impl ExitReason {
    pub fn name(&self) -> &'static str {
        match self {
            ExitReason::Target => "target",
            ExitReason::Stop => "stop",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Timeout => "timeout",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::RegimeReverse => "regime_reverse",
        }
    }
}

/// A fully resolved round trip. Append-only; one record per signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Deterministic id: symbol, side and entry/exit timestamps.
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    /// Volume-weighted price across partial exits.
    pub exit_price_effective: f64,
    pub quantity: f64,
    pub gross_pnl: f64,
    /// Percent of entry price.
    pub return_pct: f64,
    pub holding_bars: usize,
    /// Best unrealized excursion, percent of entry.
    pub max_favorable_excursion: f64,
    /// Worst unrealized excursion, percent of entry (positive magnitude).
    pub max_adverse_excursion: f64,
    pub exit_reason: ExitReason,
    pub quality_score: u8,
    /// Gate confidence at entry; 1.0 when the gate was disabled.
    pub gate_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features_at_entry: Option<FeatureVector>,
}

impl ClosedTrade {
    pub fn make_id(
        symbol: &str,
        side: Side,
        entry: DateTime<Utc>,
        exit: DateTime<Utc>,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            symbol,
            side.name(),
            entry.timestamp(),
            exit.timestamp()
        )
    }
}
