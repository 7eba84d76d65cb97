//! Deterministic trade resolution.
//!
//! Given an accepted signal and the trigger-timeframe bars that follow it,
//! the simulator replays the position bar by bar under a fixed evaluation
//! order, producing exactly one `ClosedTrade` (or none, when no bar exists
//! after the fill point).

use chrono::Duration;
use tracing::debug;

use feature_engineering::FeatureVector;
use market_core::{Bar, EntryMode, PlatformError, Side, StrategyConfig};
use wave3_strategy::CandidateSignal;

use crate::models::{ClosedTrade, ExitReason};

const QUANTITY_EPSILON: f64 = 1e-9;

/// Bar-aligned inputs for one simulation. All three slices index the same
/// trigger series the signal was scanned from.
pub struct SimulationInputs<'a> {
    pub bars: &'a [Bar],
    /// ATR column used by the trailing stop (NaN while warming up).
    pub atr: &'a [f64],
    /// Whether the daily context still supports the trade's side at each bar.
    pub context_ok: &'a [bool],
}

pub struct TradeSimulator<'a> {
    config: &'a StrategyConfig,
    entry_mode: EntryMode,
    /// Bars separated by more than this are an integrity fault.
    max_gap: Duration,
}

struct OpenState {
    remaining: f64,
    current_stop: f64,
    stop_moved: bool,
    trailing_active: bool,
    next_rung: usize,
    fills: Vec<(f64, f64)>, // (price, fraction of original quantity)
    mfe: f64,
    mae: f64,
    bars_since_entry: usize,
}

impl<'a> TradeSimulator<'a> {
    pub fn new(config: &'a StrategyConfig, entry_mode: EntryMode, max_gap: Duration) -> Self {
        Self {
            config,
            entry_mode,
            max_gap,
        }
    }

    /// Resolve one signal. Returns Ok(None) when no bar exists after the
    /// trigger, so no fill was possible.
    pub fn simulate(
        &self,
        signal: &CandidateSignal,
        inputs: &SimulationInputs<'_>,
        features: Option<FeatureVector>,
        gate_confidence: f64,
    ) -> Result<Option<ClosedTrade>, PlatformError> {
        let bars = inputs.bars;
        let first = signal.trigger_index + 1;
        if first >= bars.len() {
            return Ok(None);
        }

        let side = signal.side;
        let (entry_price, entry_time) = match self.entry_mode {
            EntryMode::TriggerBarClose => (
                signal.entry_price,
                bars[signal.trigger_index].timestamp,
            ),
            EntryMode::NextBarOpen => (bars[first].open, bars[first].timestamp),
        };

        let risk = (entry_price - signal.initial_stop).abs();
        if risk <= 0.0 {
            return Err(PlatformError::DataIntegrity(format!(
                "signal at {} has zero risk unit",
                signal.trigger_timestamp
            )));
        }

        let mut state = OpenState {
            remaining: 1.0,
            current_stop: signal.initial_stop,
            stop_moved: false,
            trailing_active: false,
            next_rung: 0,
            fills: Vec::with_capacity(signal.ladder.rungs().len()),
            mfe: 0.0,
            mae: 0.0,
            bars_since_entry: 0,
        };

        let mut final_exit: Option<(usize, ExitReason)> = None;

        for i in first..bars.len() {
            let bar = &bars[i];
            self.check_bar_sequence(bars, i)?;
            state.bars_since_entry += 1;

            // Excursions use the full bar range, including the exit bar.
            let favorable = match side {
                Side::Long => (bar.high - entry_price) / entry_price,
                Side::Short => (entry_price - bar.low) / entry_price,
            };
            let adverse = match side {
                Side::Long => (entry_price - bar.low) / entry_price,
                Side::Short => (bar.high - entry_price) / entry_price,
            };
            state.mfe = state.mfe.max(favorable * 100.0);
            state.mae = state.mae.max(adverse * 100.0);

            // 1. Stop: closes ALL remaining quantity at the stop price.
            let stop_hit = match side {
                Side::Long => bar.low <= state.current_stop,
                Side::Short => bar.high >= state.current_stop,
            };
            if stop_hit {
                let reason = if state.stop_moved {
                    ExitReason::TrailingStop
                } else {
                    ExitReason::Stop
                };
                state.fills.push((state.current_stop, state.remaining));
                state.remaining = 0.0;
                final_exit = Some((i, reason));
                break;
            }

            // 2. Rungs in ascending reward multiple, each for its fraction
            // of the ORIGINAL quantity.
            while state.next_rung < signal.ladder.rungs().len() {
                let rung = signal.ladder.rungs()[state.next_rung];
                let rung_price =
                    signal
                        .ladder
                        .rung_price(&rung, entry_price, risk, side);
                let reached = match side {
                    Side::Long => bar.high >= rung_price,
                    Side::Short => bar.low <= rung_price,
                };
                if !reached {
                    break;
                }

                state.fills.push((rung_price, rung.fraction));
                state.remaining -= rung.fraction;
                state.next_rung += 1;

                // 3. Stop management unlocked by realized reward.
                if rung.reward_multiple >= self.config.trailing_activation_r {
                    let breakeven_needed = match side {
                        Side::Long => state.current_stop < entry_price,
                        Side::Short => state.current_stop > entry_price,
                    };
                    if breakeven_needed {
                        state.current_stop = entry_price;
                        state.stop_moved = true;
                    }
                }
                if rung.reward_multiple >= self.config.atr_trail_activation_r {
                    state.trailing_active = true;
                }
            }

            if state.remaining <= QUANTITY_EPSILON {
                final_exit = Some((i, ExitReason::Target));
                break;
            }

            // ATR trail ratchets with the close, never backwards.
            if state.trailing_active {
                let atr = inputs.atr.get(i).copied().unwrap_or(f64::NAN);
                if atr.is_finite() {
                    let candidate = match side {
                        Side::Long => bar.close - self.config.trailing_atr_multiple * atr,
                        Side::Short => bar.close + self.config.trailing_atr_multiple * atr,
                    };
                    let improved = match side {
                        Side::Long => candidate > state.current_stop,
                        Side::Short => candidate < state.current_stop,
                    };
                    if improved {
                        state.current_stop = candidate;
                        state.stop_moved = true;
                    }
                }
            }

            // 4. Holding-period timeout: fires once the bar count EXCEEDS
            // the configured maximum, closing the remainder at the close.
            if state.bars_since_entry > self.config.max_holding_bars {
                state.fills.push((bar.close, state.remaining));
                state.remaining = 0.0;
                final_exit = Some((i, ExitReason::Timeout));
                break;
            }

            // 5. Daily-context reversal closes the remainder at the close.
            let context_ok = inputs.context_ok.get(i).copied().unwrap_or(true);
            if !context_ok {
                state.fills.push((bar.close, state.remaining));
                state.remaining = 0.0;
                final_exit = Some((i, ExitReason::RegimeReverse));
                break;
            }
        }

        // End of data: whatever is still open closes at the last bar's close.
        let (exit_idx, exit_reason) = match final_exit {
            Some(exit) => exit,
            None => {
                let last = bars.len() - 1;
                state.fills.push((bars[last].close, state.remaining));
                state.remaining = 0.0;
                (last, ExitReason::EndOfData)
            }
        };

        let filled: f64 = state.fills.iter().map(|(_, f)| f).sum();
        let exit_price_effective =
            state.fills.iter().map(|(p, f)| p * f).sum::<f64>() / filled;
        let gross_pnl: f64 = state
            .fills
            .iter()
            .map(|(p, f)| (p - entry_price) * f * side.sign())
            .sum();
        let return_pct = gross_pnl / entry_price * 100.0;
        let exit_time = bars[exit_idx].timestamp;

        debug!(
            symbol = signal.symbol.as_str(),
            side = side.name(),
            reason = exit_reason.name(),
            return_pct,
            "trade resolved"
        );

        Ok(Some(ClosedTrade {
            trade_id: ClosedTrade::make_id(&signal.symbol, side, entry_time, exit_time),
            symbol: signal.symbol.clone(),
            side,
            entry_time,
            entry_price,
            exit_time,
            exit_price_effective,
            quantity: 1.0,
            gross_pnl,
            return_pct,
            holding_bars: state.bars_since_entry,
            max_favorable_excursion: state.mfe,
            max_adverse_excursion: state.mae,
            exit_reason,
            quality_score: signal.quality_score,
            gate_confidence,
            features_at_entry: features,
        }))
    }

    fn check_bar_sequence(&self, bars: &[Bar], i: usize) -> Result<(), PlatformError> {
        if i == 0 {
            return Ok(());
        }
        let gap = bars[i].timestamp - bars[i - 1].timestamp;
        if gap <= Duration::zero() {
            return Err(PlatformError::DataIntegrity(format!(
                "timestamps not increasing at {}",
                bars[i].timestamp
            )));
        }
        if gap > self.max_gap {
            return Err(PlatformError::DataIntegrity(format!(
                "gap of {} minutes before {} exceeds the configured limit",
                gap.num_minutes(),
                bars[i].timestamp
            )));
        }
        Ok(())
    }
}
