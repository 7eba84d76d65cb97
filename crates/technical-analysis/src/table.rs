//! The wide indicator table: every derived column the platform uses,
//! computed once per series and shared read-only downstream.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use market_core::{PlatformError, Series};

use crate::indicators;
use crate::patterns;

/// Well-known column names. Downstream code addresses columns through these
/// constants so a typo fails at the compiler, not at runtime.
pub mod col {
    pub const EMA_9: &str = "ema_9";
    pub const EMA_17: &str = "ema_17";
    pub const EMA_21: &str = "ema_21";
    pub const EMA_50: &str = "ema_50";
    pub const EMA_72: &str = "ema_72";
    pub const EMA_200: &str = "ema_200";
    pub const EMA_72_SLOPE: &str = "ema_72_slope";
    pub const SMA_20: &str = "sma_20";
    pub const MACD_LINE: &str = "macd_line";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const RSI_7: &str = "rsi_7";
    pub const RSI_14: &str = "rsi_14";
    pub const RSI_21: &str = "rsi_21";
    pub const ADX_14: &str = "adx_14";
    pub const PLUS_DI_14: &str = "plus_di_14";
    pub const MINUS_DI_14: &str = "minus_di_14";
    pub const ATR_7: &str = "atr_7";
    pub const ATR_14: &str = "atr_14";
    pub const ATR_21: &str = "atr_21";
    pub const ATR_PCT_14: &str = "atr_pct_14";
    pub const ATR_14_MEAN_10: &str = "atr_14_mean_10";
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_MIDDLE: &str = "bb_middle";
    pub const BB_LOWER: &str = "bb_lower";
    pub const BB_WIDTH: &str = "bb_width";
    pub const BB_PERCENT_B: &str = "bb_percent_b";
    pub const BB_SQUEEZE: &str = "bb_squeeze";
    pub const KC_UPPER: &str = "kc_upper";
    pub const KC_MIDDLE: &str = "kc_middle";
    pub const KC_LOWER: &str = "kc_lower";
    pub const STOCH_K: &str = "stoch_k";
    pub const STOCH_D: &str = "stoch_d";
    pub const OBV: &str = "obv";
    pub const VPT: &str = "vpt";
    pub const VWAP: &str = "vwap";
    pub const MFI_14: &str = "mfi_14";
    pub const CCI_20: &str = "cci_20";
    pub const WILLIAMS_R_14: &str = "williams_r_14";
    pub const HV_10: &str = "hv_10";
    pub const HV_20: &str = "hv_20";
    pub const HV_30: &str = "hv_30";
    pub const VOL_SMA_20: &str = "vol_sma_20";
    pub const VOL_RATIO: &str = "vol_ratio";
    pub const PAT_DOJI: &str = "pat_doji";
    pub const PAT_HAMMER: &str = "pat_hammer";
    pub const PAT_SHOOTING_STAR: &str = "pat_shooting_star";
    pub const PAT_BULL_ENGULF: &str = "pat_bull_engulf";
    pub const PAT_BEAR_ENGULF: &str = "pat_bear_engulf";
}

/// Indicator periods. The defaults are the ones the Wave3 strategy was
/// researched with.
#[derive(Debug, Clone)]
pub struct IndicatorParams {
    pub ema_periods: Vec<usize>,
    pub rsi_periods: Vec<usize>,
    pub atr_periods: Vec<usize>,
    pub hv_periods: Vec<usize>,
    pub macd: (usize, usize, usize),
    pub adx_period: usize,
    pub bollinger: (usize, f64),
    pub keltner: (usize, usize, f64),
    pub stochastic: (usize, usize),
    pub mfi_period: usize,
    pub cci_period: usize,
    pub williams_period: usize,
    pub volume_sma_period: usize,
    pub atr_mean_period: usize,
    pub ema_slope_lookback: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_periods: vec![9, 17, 21, 50, 72, 200],
            rsi_periods: vec![7, 14, 21],
            atr_periods: vec![7, 14, 21],
            hv_periods: vec![10, 20, 30],
            macd: (12, 26, 9),
            adx_period: 14,
            bollinger: (20, 2.0),
            keltner: (20, 10, 2.0),
            stochastic: (14, 3),
            mfi_period: 14,
            cci_period: 20,
            williams_period: 14,
            volume_sma_period: 20,
            atr_mean_period: 10,
            ema_slope_lookback: 5,
        }
    }
}

/// All derived columns for one series, keyed by name and aligned to the
/// series' timestamp index. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct IndicatorTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl IndicatorTable {
    /// Compute the full table for a series. Column evaluation order is
    /// fixed, so two runs over the same series produce identical output.
    pub fn compute(series: &Series, params: &IndicatorParams) -> Self {
        let bars = series.bars();
        let closes = series.closes();
        let volumes = series.volumes();
        let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for &period in &params.ema_periods {
            columns.insert(format!("ema_{}", period), indicators::ema(&closes, period));
        }
        if let Some(ema_72) = columns.get(col::EMA_72) {
            let ema_slope = indicators::slope(ema_72, params.ema_slope_lookback);
            columns.insert(col::EMA_72_SLOPE.to_string(), ema_slope);
        }
        columns.insert(col::SMA_20.to_string(), indicators::sma(&closes, 20));

        let macd = indicators::macd(&closes, params.macd.0, params.macd.1, params.macd.2);
        columns.insert(col::MACD_LINE.to_string(), macd.macd_line);
        columns.insert(col::MACD_SIGNAL.to_string(), macd.signal_line);
        columns.insert(col::MACD_HIST.to_string(), macd.histogram);

        for &period in &params.rsi_periods {
            columns.insert(format!("rsi_{}", period), indicators::rsi(&closes, period));
        }

        let adx = indicators::adx(bars, params.adx_period);
        columns.insert(format!("adx_{}", params.adx_period), adx.adx);
        columns.insert(format!("plus_di_{}", params.adx_period), adx.plus_di);
        columns.insert(format!("minus_di_{}", params.adx_period), adx.minus_di);

        for &period in &params.atr_periods {
            columns.insert(format!("atr_{}", period), indicators::atr(bars, period));
        }
        columns.insert(
            col::ATR_PCT_14.to_string(),
            indicators::atr_percent(bars, 14),
        );
        if let Some(atr_14) = columns.get(col::ATR_14) {
            let atr_mean = indicators::sma(atr_14, params.atr_mean_period);
            columns.insert(col::ATR_14_MEAN_10.to_string(), atr_mean);
        }

        let bb = indicators::bollinger(&closes, params.bollinger.0, params.bollinger.1);
        columns.insert(col::BB_UPPER.to_string(), bb.upper);
        columns.insert(col::BB_MIDDLE.to_string(), bb.middle);
        columns.insert(col::BB_LOWER.to_string(), bb.lower);
        columns.insert(col::BB_WIDTH.to_string(), bb.width);
        columns.insert(col::BB_PERCENT_B.to_string(), bb.percent_b);
        columns.insert(col::BB_SQUEEZE.to_string(), bb.squeeze);

        let kc = indicators::keltner(bars, params.keltner.0, params.keltner.1, params.keltner.2);
        columns.insert(col::KC_UPPER.to_string(), kc.upper);
        columns.insert(col::KC_MIDDLE.to_string(), kc.middle);
        columns.insert(col::KC_LOWER.to_string(), kc.lower);

        let stoch = indicators::stochastic(bars, params.stochastic.0, params.stochastic.1);
        columns.insert(col::STOCH_K.to_string(), stoch.k);
        columns.insert(col::STOCH_D.to_string(), stoch.d);

        columns.insert(col::OBV.to_string(), indicators::obv(bars));
        columns.insert(col::VPT.to_string(), indicators::vpt(bars));
        columns.insert(col::VWAP.to_string(), indicators::vwap(bars));
        columns.insert(
            format!("mfi_{}", params.mfi_period),
            indicators::mfi(bars, params.mfi_period),
        );
        columns.insert(
            format!("cci_{}", params.cci_period),
            indicators::cci(bars, params.cci_period),
        );
        columns.insert(
            format!("williams_r_{}", params.williams_period),
            indicators::williams_r(bars, params.williams_period),
        );

        for &period in &params.hv_periods {
            columns.insert(
                format!("hv_{}", period),
                indicators::historical_volatility(&closes, period),
            );
        }

        let vol_sma = indicators::sma(&volumes, params.volume_sma_period);
        let vol_ratio: Vec<f64> = volumes
            .iter()
            .zip(&vol_sma)
            .map(|(v, s)| if *s > 0.0 { v / s } else { f64::NAN })
            .collect();
        columns.insert(col::VOL_SMA_20.to_string(), vol_sma);
        columns.insert(col::VOL_RATIO.to_string(), vol_ratio);

        columns.insert(col::PAT_DOJI.to_string(), patterns::doji_column(bars));
        columns.insert(col::PAT_HAMMER.to_string(), patterns::hammer_column(bars));
        columns.insert(
            col::PAT_SHOOTING_STAR.to_string(),
            patterns::shooting_star_column(bars),
        );
        columns.insert(
            col::PAT_BULL_ENGULF.to_string(),
            patterns::bullish_engulfing_column(bars),
        );
        columns.insert(
            col::PAT_BEAR_ENGULF.to_string(),
            patterns::bearish_engulfing_column(bars),
        );

        Self {
            timestamps: bars.iter().map(|b| b.timestamp).collect(),
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    /// Fetch a column that the fixed compute() set is expected to contain.
    pub fn require(&self, name: &str) -> Result<&[f64], PlatformError> {
        self.column(name).ok_or_else(|| {
            PlatformError::Configuration(format!("indicator column '{}' not computed", name))
        })
    }

    /// Value of a column at a bar index; NaN when the column is missing.
    pub fn value(&self, name: &str, idx: usize) -> f64 {
        self.column(name)
            .and_then(|c| c.get(idx))
            .copied()
            .unwrap_or(f64::NAN)
    }
}
