//! The Wave3 signal engine.
//!
//! Context comes from the daily series (EMA17 vs EMA72 and close vs EMA17);
//! the trigger fires on the faster series when price reclaims the short EMA
//! after spending a configured number of consecutive bars beyond it.

use market_core::{Series, Side, StrategyConfig};
use technical_analysis::{col, IndicatorTable};
use tracing::debug;

use crate::signal::{
    CandidateSignal, ConfirmationFlags, ContextSnapshot, QualityWeights, TargetLadder,
    TrendContext,
};

/// Lookback used by the RSI-vs-price divergence check.
const DIVERGENCE_LOOKBACK: usize = 14;

/// Minimum fraction of the bar range the trigger candle body must cover.
const CANDLE_BODY_FRACTION: f64 = 0.5;

/// Daily trend context at a point in time: the last closed daily bar at or
/// before `ts` decides whether longs, shorts, or nothing is permitted.
/// None while the daily EMAs are still warming up.
pub fn daily_trend_context(
    daily: &Series,
    daily_table: &IndicatorTable,
    ts: chrono::DateTime<chrono::Utc>,
) -> Option<ContextSnapshot> {
    let daily_idx = daily.last_index_at(ts)?;
    let ema_17 = daily_table.value(col::EMA_17, daily_idx);
    let ema_72 = daily_table.value(col::EMA_72, daily_idx);
    if ema_17.is_nan() || ema_72.is_nan() {
        return None;
    }
    let close = daily.bar(daily_idx).close;

    let trend = if ema_17 > ema_72 && close > ema_17 {
        TrendContext::Uptrend
    } else if ema_17 < ema_72 && close < ema_17 {
        TrendContext::Downtrend
    } else {
        TrendContext::Neutral
    };

    Some(ContextSnapshot {
        trend,
        daily_close: close,
        daily_ema_17: ema_17,
        daily_ema_72: ema_72,
        daily_ema_72_slope: daily_table.value(col::EMA_72_SLOPE, daily_idx),
    })
}

/// Everything a strategy variant scans: the context series, the trigger
/// series, and their precomputed indicator tables.
pub struct StrategyInputs<'a> {
    pub daily: &'a Series,
    pub daily_table: &'a IndicatorTable,
    pub trigger: &'a Series,
    pub trigger_table: &'a IndicatorTable,
}

/// Strategy variants. Each variant honors the same contract:
/// `(context series, trigger series, config) → candidate signals`.
pub enum Strategy {
    Wave3(Wave3Engine),
}

impl Strategy {
    pub fn candidates(&self, inputs: &StrategyInputs<'_>) -> Vec<CandidateSignal> {
        match self {
            Strategy::Wave3(engine) => engine.scan(inputs),
        }
    }
}

/// Pullback tracking for one direction.
#[derive(Debug, Clone, Copy)]
struct PullbackState {
    /// Consecutive bars spent beyond the short EMA
    count: usize,
    /// Swing extreme during the pullback: min low (long) or max high (short)
    extreme: f64,
}

impl PullbackState {
    fn reset() -> Self {
        Self {
            count: 0,
            extreme: f64::NAN,
        }
    }
}

pub struct Wave3Engine {
    config: StrategyConfig,
    weights: QualityWeights,
}

impl Wave3Engine {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            weights: QualityWeights::default(),
        }
    }

    pub fn with_weights(config: StrategyConfig, weights: QualityWeights) -> Self {
        Self { config, weights }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Scan the trigger series bar by bar and emit every candidate whose
    /// quality score reaches the configured minimum.
    ///
    /// Bars inside indicator warmup never trigger (their columns are NaN);
    /// this is the normal series start, not a fault.
    pub fn scan(&self, inputs: &StrategyInputs<'_>) -> Vec<CandidateSignal> {
        let trigger = inputs.trigger;
        let table = inputs.trigger_table;
        let pullback_bars = self.config.pullback_bars_for(trigger.timeframe());

        let mut candidates = Vec::new();
        let mut long_state = PullbackState::reset();
        let mut short_state = PullbackState::reset();

        for i in 0..trigger.len() {
            let ema_17 = table.value(col::EMA_17, i);
            if ema_17.is_nan() {
                long_state = PullbackState::reset();
                short_state = PullbackState::reset();
                continue;
            }

            let bar = trigger.bar(i);
            let context = self.daily_context(inputs, bar.timestamp);

            // Evaluate the trigger against the state built from PRIOR bars,
            // then fold the current bar into the state.
            if let Some(snapshot) = context {
                match snapshot.trend.permitted_side() {
                    Some(Side::Long) => {
                        if long_state.count >= pullback_bars
                            && bar.close > ema_17
                            && self.in_zone(bar.close, ema_17, table, i)
                        {
                            if let Some(signal) = self.try_emit(
                                inputs,
                                i,
                                Side::Long,
                                long_state.extreme,
                                snapshot,
                            ) {
                                candidates.push(signal);
                            }
                        }
                    }
                    Some(Side::Short) if self.config.allow_shorts => {
                        if short_state.count >= pullback_bars
                            && bar.close < ema_17
                            && self.in_zone(bar.close, ema_17, table, i)
                        {
                            if let Some(signal) = self.try_emit(
                                inputs,
                                i,
                                Side::Short,
                                short_state.extreme,
                                snapshot,
                            ) {
                                candidates.push(signal);
                            }
                        }
                    }
                    _ => {}
                }
            }

            // Long pullback: closes at or below the short EMA
            if bar.close <= ema_17 {
                long_state.extreme = if long_state.count == 0 {
                    bar.low
                } else {
                    long_state.extreme.min(bar.low)
                };
                long_state.count += 1;
            } else {
                long_state = PullbackState::reset();
            }

            // Short pullback: closes at or above the short EMA
            if bar.close >= ema_17 {
                short_state.extreme = if short_state.count == 0 {
                    bar.high
                } else {
                    short_state.extreme.max(bar.high)
                };
                short_state.count += 1;
            } else {
                short_state = PullbackState::reset();
            }
        }

        candidates
    }

    /// Daily trend context aligned to the last closed daily bar at or
    /// before the trigger close. None while the daily EMAs are warming up.
    fn daily_context(
        &self,
        inputs: &StrategyInputs<'_>,
        trigger_ts: chrono::DateTime<chrono::Utc>,
    ) -> Option<ContextSnapshot> {
        daily_trend_context(inputs.daily, inputs.daily_table, trigger_ts)
    }

    /// The close must sit within the configured ATR band around the short
    /// EMA at the trigger bar.
    fn in_zone(&self, close: f64, ema_17: f64, table: &IndicatorTable, idx: usize) -> bool {
        let atr = table.value(col::ATR_14, idx);
        if atr.is_nan() {
            return false;
        }
        (close - ema_17).abs() <= self.config.zone_atr_multiple * atr
    }

    fn try_emit(
        &self,
        inputs: &StrategyInputs<'_>,
        idx: usize,
        side: Side,
        swing: f64,
        context: ContextSnapshot,
    ) -> Option<CandidateSignal> {
        let bar = inputs.trigger.bar(idx);
        let entry = bar.close;

        // The pullback swing defines the initial stop; a stop on the wrong
        // side of entry carries no risk unit and cannot be traded.
        if swing.is_nan() || (entry - swing) * side.sign() <= 0.0 {
            return None;
        }

        let confirmations = self.confirmations(inputs, idx, side, &context);
        let quality_score = confirmations.score(&self.weights);
        if quality_score < self.config.min_quality_score {
            debug!(
                symbol = inputs.trigger.symbol(),
                idx,
                quality_score,
                "candidate below min quality score"
            );
            return None;
        }

        debug!(
            symbol = inputs.trigger.symbol(),
            idx,
            side = side.name(),
            entry,
            stop = swing,
            quality_score,
            "Wave3 candidate emitted"
        );

        Some(CandidateSignal {
            symbol: inputs.trigger.symbol().to_string(),
            trigger_timestamp: bar.timestamp,
            trigger_index: idx,
            side,
            entry_price: entry,
            initial_stop: swing,
            ladder: TargetLadder::new(self.config.target_ladder.clone()),
            quality_score,
            confirmations,
            context,
        })
    }

    fn confirmations(
        &self,
        inputs: &StrategyInputs<'_>,
        idx: usize,
        side: Side,
        context: &ContextSnapshot,
    ) -> ConfirmationFlags {
        let table = inputs.trigger_table;
        let bar = inputs.trigger.bar(idx);

        let macd_hist = table.value(col::MACD_HIST, idx);
        let rsi = table.value(col::RSI_14, idx);
        let adx = table.value(col::ADX_14, idx);
        let atr = table.value(col::ATR_14, idx);
        let atr_mean = table.value(col::ATR_14_MEAN_10, idx);
        let vol_ratio = table.value(col::VOL_RATIO, idx);

        let macd_aligned = match side {
            Side::Long => macd_hist > 0.0,
            Side::Short => macd_hist < 0.0,
        };

        let rsi_favorable = match side {
            Side::Long => (40.0..=70.0).contains(&rsi),
            Side::Short => (30.0..=60.0).contains(&rsi),
        };

        let adx_strong = adx > 20.0;
        let atr_expanding = !atr.is_nan() && !atr_mean.is_nan() && atr > atr_mean;
        let volume_surge = vol_ratio >= self.config.volume_multiple;

        let range = bar.high - bar.low;
        let body = (bar.close - bar.open) * side.sign();
        let candle_direction = range > 0.0 && body / range >= CANDLE_BODY_FRACTION;

        let daily_trend_strength = match side {
            Side::Long => context.daily_ema_72_slope > 0.0,
            Side::Short => context.daily_ema_72_slope < 0.0,
        };

        let no_adverse_divergence = !self.adverse_divergence(inputs, idx, side);

        ConfirmationFlags {
            macd_aligned,
            rsi_favorable,
            adx_strong,
            atr_expanding,
            volume_surge,
            candle_direction,
            daily_trend_strength,
            no_adverse_divergence,
        }
    }

    /// Adverse RSI divergence: for a long, price above its level
    /// DIVERGENCE_LOOKBACK bars ago while RSI sits below its own.
    fn adverse_divergence(&self, inputs: &StrategyInputs<'_>, idx: usize, side: Side) -> bool {
        if idx < DIVERGENCE_LOOKBACK {
            return false;
        }
        let table = inputs.trigger_table;
        let rsi_now = table.value(col::RSI_14, idx);
        let rsi_then = table.value(col::RSI_14, idx - DIVERGENCE_LOOKBACK);
        if rsi_now.is_nan() || rsi_then.is_nan() {
            return false;
        }
        let close_now = inputs.trigger.bar(idx).close;
        let close_then = inputs.trigger.bar(idx - DIVERGENCE_LOOKBACK).close;

        match side {
            Side::Long => close_now > close_then && rsi_now < rsi_then,
            Side::Short => close_now < close_then && rsi_now > rsi_then,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use market_core::{Bar, Timeframe};
    use technical_analysis::IndicatorParams;

    fn make_bar(ts: chrono::DateTime<Utc>, open: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: ts,
            open,
            high: open.max(close) + 0.2,
            low: open.min(close) - 0.2,
            close,
            volume,
        }
    }

    fn daily_uptrend(days: usize) -> Series {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 17, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..days)
            .map(|i| {
                let close = 40.0 + i as f64 * 0.08;
                make_bar(start + Duration::days(i as i64), close - 0.05, close, 2_000_000.0)
            })
            .collect();
        Series::new("PETR4", Timeframe::Daily, bars).unwrap()
    }

    fn tables(
        daily: &Series,
        trigger: &Series,
    ) -> (IndicatorTable, IndicatorTable) {
        let params = IndicatorParams::default();
        (
            IndicatorTable::compute(daily, &params),
            IndicatorTable::compute(trigger, &params),
        )
    }

    fn test_config(pullback: usize) -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.pullback_bars = Some(pullback);
        config.min_quality_score = 0;
        config.zone_atr_multiple = 5.0;
        config
    }

    #[test]
    fn test_monotonic_ramp_emits_nothing() {
        // Pure upward ramp: the close never dips to the short EMA, so no
        // pullback ever satisfies the consecutive-bars condition.
        let daily = daily_uptrend(200);
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 10, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..1600)
            .map(|i| {
                let close = 100.0 * 1.0005f64.powi(i as i32);
                make_bar(start + Duration::hours(i as i64), close * 0.999, close, 1_000_000.0)
            })
            .collect();
        let trigger = Series::new("PETR4", Timeframe::Hour1, bars).unwrap();
        let (daily_table, trigger_table) = tables(&daily, &trigger);

        let engine = Wave3Engine::new(test_config(5));
        let candidates = engine.scan(&StrategyInputs {
            daily: &daily,
            daily_table: &daily_table,
            trigger: &trigger,
            trigger_table: &trigger_table,
        });
        assert!(candidates.is_empty());
    }

    /// Warmup climb, sharp pullback pinned below the decaying EMA17, then a
    /// reclaim bar closing back above it on strong volume.
    fn pullback_fixture() -> Series {
        // Starts well past the daily EMA72 warmup of the context series.
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap();
        let mut bars = Vec::new();
        for step in 0..60 {
            let close = 50.0 + step as f64 * 0.05;
            bars.push(make_bar(start + Duration::hours(step), close - 0.03, close, 1_000_000.0));
        }
        for j in 0..8 {
            bars.push(make_bar(start + Duration::hours(60 + j), 48.1, 48.0, 900_000.0));
        }
        bars.push(make_bar(start + Duration::hours(68), 48.2, 50.5, 2_500_000.0));
        Series::new("PETR4", Timeframe::Hour1, bars).unwrap()
    }

    #[test]
    fn test_pullback_reclaim_emits_long() {
        let daily = daily_uptrend(300);
        let trigger = pullback_fixture();
        let (daily_table, trigger_table) = tables(&daily, &trigger);

        let engine = Wave3Engine::new(test_config(5));
        let candidates = engine.scan(&StrategyInputs {
            daily: &daily,
            daily_table: &daily_table,
            trigger: &trigger,
            trigger_table: &trigger_table,
        });

        assert_eq!(candidates.len(), 1);
        let signal = &candidates[0];
        assert_eq!(signal.side, Side::Long);
        assert_eq!(signal.entry_price, 50.5);
        // Stop is the pullback swing low (48.0 close - 0.2 wick)
        assert!((signal.initial_stop - 47.8).abs() < 1e-9);
        assert!(signal.risk() > 0.0);
        assert_eq!(signal.trigger_index, trigger.len() - 1);
    }

    #[test]
    fn test_neutral_context_suppresses_signals() {
        // Flat daily series: EMA17 ≈ EMA72, no permitted side.
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 17, 0, 0).unwrap();
        let daily_bars: Vec<Bar> = (0..300)
            .map(|i| make_bar(start + Duration::days(i as i64), 40.0, 40.0, 2_000_000.0))
            .collect();
        let daily = Series::new("PETR4", Timeframe::Daily, daily_bars).unwrap();

        let trigger = pullback_fixture();
        let (daily_table, trigger_table) = tables(&daily, &trigger);

        let engine = Wave3Engine::new(test_config(5));
        let candidates = engine.scan(&StrategyInputs {
            daily: &daily,
            daily_table: &daily_table,
            trigger: &trigger,
            trigger_table: &trigger_table,
        });
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_min_quality_score_filters() {
        let daily = daily_uptrend(300);
        let trigger = pullback_fixture();
        let (daily_table, trigger_table) = tables(&daily, &trigger);

        let mut config = test_config(5);
        config.min_quality_score = 100; // unreachable without every flag
        let engine = Wave3Engine::new(config);
        let candidates = engine.scan(&StrategyInputs {
            daily: &daily,
            daily_table: &daily_table,
            trigger: &trigger,
            trigger_table: &trigger_table,
        });
        assert!(candidates.is_empty());
    }
}
