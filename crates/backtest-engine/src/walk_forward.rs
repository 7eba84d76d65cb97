//! The walk-forward orchestrator.
//!
//! Slices the time axis into contiguous (train, test) windows, labels the
//! train-window signals by simulating them with bars clamped to the train
//! window (nothing after the cut is visible), trains the gate, then gates
//! and simulates the test window. Symbols fan out across a rayon pool;
//! workers share only immutable views and check the cancellation flag
//! between folds.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Months, Utc};
use rayon::prelude::*;
use tracing::{info, warn};

use feature_engineering::{FeatureBuilder, FeatureVector};
use market_core::{FitErrorPolicy, PlatformConfig, PlatformError, Series, Side};
use signal_gate::{
    rebalance_minority, GateModel, LabeledSignal, ModelMetadata, ModelStore, SignalGate,
    TrainingMatrix,
};
use technical_analysis::{col, IndicatorParams, IndicatorTable};
use wave3_strategy::{
    daily_trend_context, CandidateSignal, Strategy, StrategyInputs, TrendContext, Wave3Engine,
};

use crate::data_quality;
use crate::models::{
    ClosedTrade, FoldOutcome, FoldReport, FoldResult, RejectedSignal, SymbolRunReport,
};
use crate::simulator::{SimulationInputs, TradeSimulator};

/// The bars one symbol brings to a run.
pub struct SymbolData {
    pub daily: Series,
    pub trigger: Series,
}

pub struct WalkForwardRunner {
    config: PlatformConfig,
    params: IndicatorParams,
    model_store: Option<ModelStore>,
}

/// One fold's window boundaries.
#[derive(Debug, Clone, Copy)]
struct FoldWindow {
    train_start: DateTime<Utc>,
    train_end: DateTime<Utc>,
    test_end: DateTime<Utc>,
}

impl WalkForwardRunner {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        config.validate()?;
        Ok(Self {
            config,
            params: IndicatorParams::default(),
            model_store: None,
        })
    }

    /// Persist each fold's fitted gate under `<symbol>-fold-<n>`.
    pub fn with_model_store(mut self, store: ModelStore) -> Self {
        self.model_store = Some(store);
        self
    }

    /// Run the whole universe. Symbols are independent and fan out across
    /// the rayon pool; a cancelled run returns the folds finished so far.
    pub fn run(
        &self,
        universe: &[SymbolData],
        cancel: &AtomicBool,
    ) -> Vec<Result<SymbolRunReport, PlatformError>> {
        universe
            .par_iter()
            .map(|data| self.run_symbol(data, cancel))
            .collect()
    }

    pub fn run_symbol(
        &self,
        data: &SymbolData,
        cancel: &AtomicBool,
    ) -> Result<SymbolRunReport, PlatformError> {
        let symbol = data.trigger.symbol().to_string();
        data_quality::check_gaps(&data.trigger, self.config.backtest.max_gap_bars)?;
        data_quality::check_gaps(&data.daily, self.config.backtest.max_gap_bars)?;
        if data.trigger.is_empty() || data.daily.is_empty() {
            return Err(PlatformError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }

        let daily_table = IndicatorTable::compute(&data.daily, &self.params);
        let trigger_table = IndicatorTable::compute(&data.trigger, &self.params);
        let builder =
            FeatureBuilder::new(&data.trigger, &trigger_table, &data.daily, &daily_table);

        // The engine is causal, so one scan over the full history yields the
        // same candidates every fold would see; folds partition by time.
        let strategy = Strategy::Wave3(Wave3Engine::new(self.config.strategy.clone()));
        let candidates = strategy.candidates(&StrategyInputs {
            daily: &data.daily,
            daily_table: &daily_table,
            trigger: &data.trigger,
            trigger_table: &trigger_table,
        });
        info!(
            symbol = symbol.as_str(),
            candidates = candidates.len(),
            "strategy scan complete"
        );

        let context_ok = self.context_columns(data, &daily_table);
        let atr = trigger_table.require(col::ATR_14)?;

        let first_ts = data.trigger.bar(0).timestamp;
        let last_ts = data.trigger.bar(data.trigger.len() - 1).timestamp;
        let windows = self.slice_folds(first_ts, last_ts)?;

        let mut folds = Vec::with_capacity(windows.len());
        let mut cancelled = false;
        for (i, window) in windows.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            folds.push(self.run_fold(
                i + 1,
                *window,
                &symbol,
                data,
                &candidates,
                &builder,
                atr,
                &context_ok,
            ));
        }

        Ok(SymbolRunReport {
            symbol,
            folds,
            cancelled,
        })
    }

    /// Per-bar, per-side daily context flags the simulator consumes for its
    /// regime-reverse exit.
    fn context_columns(
        &self,
        data: &SymbolData,
        daily_table: &IndicatorTable,
    ) -> [Vec<bool>; 2] {
        let mut long_ok = Vec::with_capacity(data.trigger.len());
        let mut short_ok = Vec::with_capacity(data.trigger.len());
        for bar in data.trigger.bars() {
            let trend = daily_trend_context(&data.daily, daily_table, bar.timestamp)
                .map(|snapshot| snapshot.trend);
            long_ok.push(!matches!(
                trend,
                Some(TrendContext::Downtrend) | Some(TrendContext::Neutral)
            ));
            short_ok.push(!matches!(
                trend,
                Some(TrendContext::Uptrend) | Some(TrendContext::Neutral)
            ));
        }
        [long_ok, short_ok]
    }

    fn slice_folds(
        &self,
        first_ts: DateTime<Utc>,
        last_ts: DateTime<Utc>,
    ) -> Result<Vec<FoldWindow>, PlatformError> {
        let cfg = &self.config.backtest;
        let mut windows = Vec::new();
        let mut train_start = first_ts;

        loop {
            let train_end = train_start
                .checked_add_months(Months::new(cfg.train_months))
                .ok_or_else(|| {
                    PlatformError::Configuration("train window overflows the calendar".into())
                })?;
            let test_end = train_end
                .checked_add_months(Months::new(cfg.test_months))
                .ok_or_else(|| {
                    PlatformError::Configuration("test window overflows the calendar".into())
                })?;
            if train_end > last_ts {
                break;
            }
            windows.push(FoldWindow {
                train_start,
                train_end,
                test_end,
            });
            train_start = train_start
                .checked_add_months(Months::new(cfg.step_months))
                .ok_or_else(|| {
                    PlatformError::Configuration("step overflows the calendar".into())
                })?;
        }
        Ok(windows)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_fold(
        &self,
        fold_number: usize,
        window: FoldWindow,
        symbol: &str,
        data: &SymbolData,
        candidates: &[CandidateSignal],
        builder: &FeatureBuilder<'_>,
        atr: &[f64],
        context_ok: &[Vec<bool>; 2],
    ) -> FoldReport {
        let train: Vec<&CandidateSignal> = candidates
            .iter()
            .filter(|c| {
                c.trigger_timestamp >= window.train_start
                    && c.trigger_timestamp < window.train_end
            })
            .collect();
        let test: Vec<&CandidateSignal> = candidates
            .iter()
            .filter(|c| {
                c.trigger_timestamp >= window.train_end && c.trigger_timestamp < window.test_end
            })
            .collect();

        let report = |outcome: FoldOutcome| FoldReport {
            fold_number,
            train_start: window.train_start,
            train_end: window.train_end,
            test_start: window.train_end,
            test_end: window.test_end,
            train_signal_count: train.len(),
            outcome,
        };

        if train.len() < self.config.backtest.min_train_signals {
            let reason = format!(
                "{} training signals, need {}",
                train.len(),
                self.config.backtest.min_train_signals
            );
            warn!(symbol, fold_number, reason = reason.as_str(), "fold skipped");
            return report(FoldOutcome::Skipped { reason });
        }
        if test.is_empty() {
            return report(FoldOutcome::Empty);
        }

        match self.execute_fold(fold_number, window, symbol, data, &train, &test, builder, atr, context_ok)
        {
            Ok(result) => report(FoldOutcome::Completed(result)),
            Err(e) => {
                warn!(symbol, fold_number, error = %e, "fold failed");
                report(FoldOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_fold(
        &self,
        fold_number: usize,
        window: FoldWindow,
        symbol: &str,
        data: &SymbolData,
        train: &[&CandidateSignal],
        test: &[&CandidateSignal],
        builder: &FeatureBuilder<'_>,
        atr: &[f64],
        context_ok: &[Vec<bool>; 2],
    ) -> Result<FoldResult, PlatformError> {
        // Label the train window with bars clamped to the train cut: a trade
        // still open at the cut closes as end-of-data, exactly what would
        // have been known at that moment.
        let train_trades =
            self.simulate_window(data, train, builder, atr, context_ok, window.train_end)?;

        let mut ungated = false;
        let gate = if !self.config.ml.enabled {
            SignalGate::disabled()
        } else {
            let labeled: Vec<LabeledSignal> = train_trades
                .iter()
                .map(|(features, trade)| {
                    LabeledSignal::from_return(
                        features.clone(),
                        trade.return_pct / 100.0,
                        self.config.ml.profit_label_threshold,
                    )
                })
                .collect();
            let seed = self.config.ml.seed.wrapping_add(fold_number as u64);
            let training_set = if self.config.ml.use_smote_like_rebalance {
                rebalance_minority(&labeled, seed)
            } else {
                labeled
            };

            match GateModel::train(
                self.config.ml.model_family,
                &TrainingMatrix::from_labeled(&training_set),
                seed,
            ) {
                Ok(model) => {
                    self.persist_model(symbol, fold_number, &model, builder, window);
                    SignalGate::with_model(
                        model,
                        builder.schema().clone(),
                        self.config.ml.threshold,
                    )
                }
                Err(e) => match self.config.ml.on_fit_error {
                    FitErrorPolicy::Ungated => {
                        warn!(symbol, fold_number, error = %e, "gate training failed; fold runs ungated");
                        ungated = true;
                        SignalGate::disabled()
                    }
                    FitErrorPolicy::Skip => return Err(e),
                },
            }
        };

        // Gate and simulate the test window.
        let mut trades = Vec::new();
        let mut rejected = Vec::new();
        let mut accepted_count = 0usize;
        let mut last_exit: Option<DateTime<Utc>> = None;

        for signal in test {
            if self.suppressed(signal, last_exit) {
                continue;
            }
            let Some(features) = builder.build_at(signal.trigger_index) else {
                continue;
            };
            let decision = gate.evaluate(builder.schema(), &features)?;
            if !decision.accepted {
                rejected.push(RejectedSignal {
                    symbol: signal.symbol.clone(),
                    trigger_timestamp: signal.trigger_timestamp,
                    quality_score: signal.quality_score,
                    confidence: decision.confidence,
                });
                continue;
            }
            accepted_count += 1;

            if let Some(trade) = self.simulate_one(
                data,
                signal,
                atr,
                context_ok,
                window.test_end,
                Some(features),
                decision.confidence,
            )? {
                last_exit = Some(trade.exit_time);
                trades.push(trade);
            }
        }

        trades.sort_by_key(|t| t.exit_time);
        Ok(FoldResult {
            trades,
            rejected,
            test_signal_count: test.len(),
            accepted_count,
            ungated,
        })
    }

    /// Simulate a list of candidates sequentially (suppressing overlap when
    /// configured), returning each with its feature vector.
    fn simulate_window(
        &self,
        data: &SymbolData,
        signals: &[&CandidateSignal],
        builder: &FeatureBuilder<'_>,
        atr: &[f64],
        context_ok: &[Vec<bool>; 2],
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(FeatureVector, ClosedTrade)>, PlatformError> {
        let mut results = Vec::new();
        let mut last_exit: Option<DateTime<Utc>> = None;

        for signal in signals {
            if self.suppressed(signal, last_exit) {
                continue;
            }
            let Some(features) = builder.build_at(signal.trigger_index) else {
                continue;
            };
            if let Some(trade) = self.simulate_one(
                data,
                signal,
                atr,
                context_ok,
                window_end,
                Some(features.clone()),
                1.0,
            )? {
                last_exit = Some(trade.exit_time);
                results.push((features, trade));
            }
        }
        Ok(results)
    }

    fn suppressed(&self, signal: &CandidateSignal, last_exit: Option<DateTime<Utc>>) -> bool {
        self.config.strategy.suppress_while_open
            && last_exit.is_some_and(|exit| signal.trigger_timestamp < exit)
    }

    fn simulate_one(
        &self,
        data: &SymbolData,
        signal: &CandidateSignal,
        atr: &[f64],
        context_ok: &[Vec<bool>; 2],
        window_end: DateTime<Utc>,
        features: Option<FeatureVector>,
        confidence: f64,
    ) -> Result<Option<ClosedTrade>, PlatformError> {
        let bars = data.trigger.bars();
        let end_idx = bars.partition_point(|b| b.timestamp < window_end);
        if signal.trigger_index >= end_idx {
            return Ok(None);
        }

        let side_ctx = match signal.side {
            Side::Long => &context_ok[0],
            Side::Short => &context_ok[1],
        };
        let simulator = TradeSimulator::new(
            &self.config.strategy,
            self.config.backtest.entry_mode,
            data.trigger.timeframe().to_duration() * self.config.backtest.max_gap_bars as i32,
        );
        simulator.simulate(
            signal,
            &SimulationInputs {
                bars: &bars[..end_idx],
                atr: &atr[..end_idx],
                context_ok: &side_ctx[..end_idx],
            },
            features,
            confidence,
        )
    }

    fn persist_model(
        &self,
        symbol: &str,
        fold_number: usize,
        model: &GateModel,
        builder: &FeatureBuilder<'_>,
        window: FoldWindow,
    ) {
        let Some(store) = &self.model_store else {
            return;
        };
        let metadata = ModelMetadata {
            train_start: window.train_start,
            train_end: window.train_end,
            model_family: self.config.ml.model_family,
            profit_label_threshold: self.config.ml.profit_label_threshold,
            hyperparameters: serde_json::json!({
                "threshold": self.config.ml.threshold,
                "rebalance": self.config.ml.use_smote_like_rebalance,
                "seed": self.config.ml.seed,
            }),
            cv_metrics: serde_json::Value::Null,
        };
        let id = format!("{}-fold-{}", symbol, fold_number);
        if let Err(e) = store.save(&id, model, builder.schema(), &metadata) {
            warn!(id = id.as_str(), error = %e, "model persistence failed");
        }
    }
}
