//! Assembles the per-bar feature vector the ML gate consumes.
//!
//! Trigger-timeframe indicator values, daily-context values aligned to the
//! most recent closed daily bar, derived ratios, and one-hot regime flags.
//! The name ordering is fixed at construction and serialized with any model
//! trained on it.

use market_core::Series;
use technical_analysis::{col, IndicatorTable};
use tracing::debug;

use crate::regime::{self, TrendRegime, VolatilityBucket, VolumeBucket};
use crate::schema::{FeatureSchema, FeatureVector};

/// Momentum lookback for the cumulative volume columns.
const MOMENTUM_BARS: usize = 5;

pub struct FeatureBuilder<'a> {
    trigger: &'a Series,
    trigger_table: &'a IndicatorTable,
    daily: &'a Series,
    daily_table: &'a IndicatorTable,
    schema: FeatureSchema,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(
        trigger: &'a Series,
        trigger_table: &'a IndicatorTable,
        daily: &'a Series,
        daily_table: &'a IndicatorTable,
    ) -> Self {
        let mut builder = Self {
            trigger,
            trigger_table,
            daily,
            daily_table,
            schema: FeatureSchema::new(Vec::new()),
        };
        // Names do not depend on the bar, so probe any index to fix the order.
        let names = builder
            .collect_features(0, 0)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        builder.schema = FeatureSchema::new(names);
        builder
    }

    /// The fixed feature-name ordering this builder produces.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Build the feature vector for the trigger bar at `idx`.
    ///
    /// Returns None when the bar does not qualify: indicator warmup still in
    /// progress, no closed daily bar at or before the trigger close, or any
    /// undefined input. Values are never imputed.
    pub fn build_at(&self, idx: usize) -> Option<FeatureVector> {
        if idx >= self.trigger.len() {
            return None;
        }
        let trigger_ts = self.trigger.bar(idx).timestamp;
        // The daily context is the last daily bar closed at or before the
        // trigger close; never a bar from the future.
        let daily_idx = self.daily.last_index_at(trigger_ts)?;

        let pairs = self.collect_features(idx, daily_idx);
        let values: Vec<f64> = pairs.into_iter().map(|(_, value)| value).collect();
        let vector = FeatureVector::new(values);
        if !vector.is_complete() {
            debug!(idx, "bar disqualified: undefined feature values");
            return None;
        }
        Some(vector)
    }

    fn collect_features(&self, idx: usize, daily_idx: usize) -> Vec<(String, f64)> {
        let mut pairs: Vec<(String, f64)> = Vec::with_capacity(72);
        let t = self.trigger_table;
        let d = self.daily_table;
        let bar = self.trigger.bar(idx.min(self.trigger.len().saturating_sub(1)));
        let close = bar.close;

        let mut push = |name: &str, value: f64| pairs.push((name.to_string(), value));

        // --- Trigger timeframe ---
        for ema_col in [
            col::EMA_9,
            col::EMA_17,
            col::EMA_21,
            col::EMA_50,
            col::EMA_72,
            col::EMA_200,
        ] {
            let ema = t.value(ema_col, idx);
            push(&format!("t_close_over_{}", ema_col), ratio(close, ema));
        }
        push("t_ema_72_slope", t.value(col::EMA_72_SLOPE, idx));
        push("t_macd_hist_norm", ratio_signed(t.value(col::MACD_HIST, idx), close));
        push("t_macd_line_norm", ratio_signed(t.value(col::MACD_LINE, idx), close));
        push("t_rsi_7", t.value(col::RSI_7, idx));
        push("t_rsi_14", t.value(col::RSI_14, idx));
        push("t_rsi_21", t.value(col::RSI_21, idx));
        push("t_adx_14", t.value(col::ADX_14, idx));
        push("t_plus_di_14", t.value(col::PLUS_DI_14, idx));
        push("t_minus_di_14", t.value(col::MINUS_DI_14, idx));
        push("t_atr_pct_14", t.value(col::ATR_PCT_14, idx));
        push(
            "t_atr_over_mean",
            ratio(t.value(col::ATR_14, idx), t.value(col::ATR_14_MEAN_10, idx)),
        );
        push("t_bb_width", t.value(col::BB_WIDTH, idx));
        push("t_bb_percent_b", t.value(col::BB_PERCENT_B, idx));
        push("t_bb_squeeze", t.value(col::BB_SQUEEZE, idx));
        push(
            "t_kc_position",
            band_position(close, t.value(col::KC_LOWER, idx), t.value(col::KC_UPPER, idx)),
        );
        push("t_stoch_k", t.value(col::STOCH_K, idx));
        push("t_stoch_d", t.value(col::STOCH_D, idx));
        push("t_mfi_14", t.value(col::MFI_14, idx));
        push("t_cci_20", t.value(col::CCI_20, idx));
        push("t_williams_r_14", t.value(col::WILLIAMS_R_14, idx));
        push("t_hv_10", t.value(col::HV_10, idx));
        push("t_hv_20", t.value(col::HV_20, idx));
        push("t_hv_30", t.value(col::HV_30, idx));
        push("t_vol_ratio", t.value(col::VOL_RATIO, idx));
        push("t_close_over_vwap", ratio(close, t.value(col::VWAP, idx)));
        push("t_obv_momentum", momentum(t.column(col::OBV), idx));
        push("t_vpt_momentum", momentum(t.column(col::VPT), idx));
        push("t_candle_body", candle_body(bar.open, bar.high, bar.low, bar.close));
        push("t_pat_doji", t.value(col::PAT_DOJI, idx));
        push("t_pat_hammer", t.value(col::PAT_HAMMER, idx));
        push("t_pat_shooting_star", t.value(col::PAT_SHOOTING_STAR, idx));
        push("t_pat_bull_engulf", t.value(col::PAT_BULL_ENGULF, idx));
        push("t_pat_bear_engulf", t.value(col::PAT_BEAR_ENGULF, idx));

        // --- Daily context (aligned, never ahead) ---
        let daily_close = self
            .daily
            .bar(daily_idx.min(self.daily.len().saturating_sub(1)))
            .close;
        push("d_close_over_ema_17", ratio(daily_close, d.value(col::EMA_17, daily_idx)));
        push("d_close_over_ema_72", ratio(daily_close, d.value(col::EMA_72, daily_idx)));
        push(
            "d_ema_17_over_ema_72",
            ratio(d.value(col::EMA_17, daily_idx), d.value(col::EMA_72, daily_idx)),
        );
        push("d_ema_72_slope", d.value(col::EMA_72_SLOPE, daily_idx));
        push(
            "d_macd_hist_norm",
            ratio_signed(d.value(col::MACD_HIST, daily_idx), daily_close),
        );
        push("d_rsi_14", d.value(col::RSI_14, daily_idx));
        push("d_adx_14", d.value(col::ADX_14, daily_idx));
        push("d_plus_di_14", d.value(col::PLUS_DI_14, daily_idx));
        push("d_minus_di_14", d.value(col::MINUS_DI_14, daily_idx));
        push("d_atr_pct_14", d.value(col::ATR_PCT_14, daily_idx));
        push("d_bb_width", d.value(col::BB_WIDTH, daily_idx));
        push("d_bb_percent_b", d.value(col::BB_PERCENT_B, daily_idx));
        push("d_stoch_k", d.value(col::STOCH_K, daily_idx));
        push("d_hv_20", d.value(col::HV_20, daily_idx));
        push("d_vol_ratio", d.value(col::VOL_RATIO, daily_idx));

        // --- Regime flags (daily, one-hot) ---
        let snapshot = regime::classify(d, daily_idx);
        let (trend, vol, volume) = match snapshot {
            Some(s) => (Some(s.trend), Some(s.volatility), Some(s.volume)),
            None => (None, None, None),
        };
        push("d_regime_trending_up", one_hot(trend, TrendRegime::TrendingUp));
        push("d_regime_trending_down", one_hot(trend, TrendRegime::TrendingDown));
        push("d_regime_ranging", one_hot(trend, TrendRegime::Ranging));
        push("d_vol_bucket_low", one_hot(vol, VolatilityBucket::Low));
        push("d_vol_bucket_normal", one_hot(vol, VolatilityBucket::Normal));
        push("d_vol_bucket_high", one_hot(vol, VolatilityBucket::High));
        push("d_volume_bucket_low", one_hot(volume, VolumeBucket::Low));
        push("d_volume_bucket_normal", one_hot(volume, VolumeBucket::Normal));
        push("d_volume_bucket_high", one_hot(volume, VolumeBucket::High));

        pairs
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        f64::NAN
    }
}

fn ratio_signed(numerator: f64, denominator: f64) -> f64 {
    if denominator != 0.0 && denominator.is_finite() {
        numerator / denominator
    } else {
        f64::NAN
    }
}

fn band_position(value: f64, lower: f64, upper: f64) -> f64 {
    if upper > lower {
        (value - lower) / (upper - lower)
    } else {
        f64::NAN
    }
}

/// Fractional change of a cumulative column over the trailing momentum
/// window; 0 when the reference value is 0.
fn momentum(column: Option<&[f64]>, idx: usize) -> f64 {
    let Some(column) = column else {
        return f64::NAN;
    };
    if idx < MOMENTUM_BARS || idx >= column.len() {
        return f64::NAN;
    }
    let past = column[idx - MOMENTUM_BARS];
    if past == 0.0 {
        return 0.0;
    }
    (column[idx] - past) / past.abs()
}

/// Signed body as a fraction of the bar range.
fn candle_body(open: f64, high: f64, low: f64, close: f64) -> f64 {
    let range = high - low;
    if range > 0.0 {
        (close - open) / range
    } else {
        0.0
    }
}

fn one_hot<T: PartialEq>(actual: Option<T>, expected: T) -> f64 {
    match actual {
        None => f64::NAN,
        Some(v) if v == expected => 1.0,
        Some(_) => 0.0,
    }
}
