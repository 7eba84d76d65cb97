use serde::{Deserialize, Serialize};

use crate::{PlatformError, Timeframe};

/// One rung of the take-profit ladder: close `fraction` of the original
/// position when price reaches `reward_multiple` × R beyond entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub fraction: f64,
    pub reward_multiple: f64,
}

/// Wave3 strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum quality score (0-100) a candidate must reach to be emitted.
    pub min_quality_score: u8,
    /// Tiered take-profit plan. Fractions must sum to 1, reward multiples
    /// must be strictly increasing.
    pub target_ladder: Vec<LadderRung>,
    /// Realized reward (in R) after which the stop moves to breakeven.
    pub trailing_activation_r: f64,
    /// Realized reward (in R) after which the ATR trail engages.
    pub atr_trail_activation_r: f64,
    /// ATR multiple for the trailing stop distance.
    pub trailing_atr_multiple: f64,
    /// Close any remaining position once the bars held EXCEED this count.
    pub max_holding_bars: usize,
    /// Trigger-bar volume must exceed this multiple of its rolling mean
    /// for the volume confirmation to count.
    pub volume_multiple: f64,
    /// Width of the entry zone around the short EMA, as an ATR multiple.
    pub zone_atr_multiple: f64,
    /// Consecutive bars the pullback must spend beyond the short EMA before
    /// a reclaim counts as a trigger. None = the trigger timeframe default.
    #[serde(default)]
    pub pullback_bars: Option<usize>,
    /// Emit short candidates in downtrend context.
    #[serde(default = "default_true")]
    pub allow_shorts: bool,
    /// Suppress new candidates for a symbol while a position is open.
    #[serde(default = "default_true")]
    pub suppress_while_open: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 55,
            target_ladder: vec![
                LadderRung { fraction: 0.5, reward_multiple: 1.0 },
                LadderRung { fraction: 0.3, reward_multiple: 1.5 },
                LadderRung { fraction: 0.2, reward_multiple: 2.5 },
            ],
            trailing_activation_r: 0.75,
            atr_trail_activation_r: 1.5,
            trailing_atr_multiple: 2.0,
            max_holding_bars: 30,
            volume_multiple: 1.1,
            zone_atr_multiple: 1.0,
            pullback_bars: None,
            allow_shorts: true,
            suppress_while_open: true,
        }
    }
}

impl StrategyConfig {
    /// Pullback length in bars for the given trigger timeframe.
    pub fn pullback_bars_for(&self, timeframe: Timeframe) -> usize {
        self.pullback_bars
            .unwrap_or_else(|| timeframe.default_pullback_bars())
    }

    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.min_quality_score > 100 {
            return Err(PlatformError::Configuration(format!(
                "min_quality_score must be in [0, 100], got {}",
                self.min_quality_score
            )));
        }
        if self.target_ladder.is_empty() {
            return Err(PlatformError::Configuration(
                "target_ladder must have at least one rung".to_string(),
            ));
        }
        let fraction_sum: f64 = self.target_ladder.iter().map(|r| r.fraction).sum();
        if (fraction_sum - 1.0).abs() > 1e-9 {
            return Err(PlatformError::Configuration(format!(
                "target_ladder fractions must sum to 1, got {:.6}",
                fraction_sum
            )));
        }
        for rung in &self.target_ladder {
            if rung.fraction <= 0.0 || rung.reward_multiple <= 0.0 {
                return Err(PlatformError::Configuration(
                    "target_ladder rungs must have positive fraction and reward".to_string(),
                ));
            }
        }
        for pair in self.target_ladder.windows(2) {
            if pair[1].reward_multiple <= pair[0].reward_multiple {
                return Err(PlatformError::Configuration(
                    "target_ladder reward multiples must be strictly increasing".to_string(),
                ));
            }
        }
        if !(0.5..=2.0).contains(&self.trailing_activation_r) {
            return Err(PlatformError::Configuration(format!(
                "trailing_activation_r must be in [0.5, 2.0], got {}",
                self.trailing_activation_r
            )));
        }
        if self.atr_trail_activation_r < self.trailing_activation_r {
            return Err(PlatformError::Configuration(
                "atr_trail_activation_r must not be below trailing_activation_r".to_string(),
            ));
        }
        if !(1.0..=3.0).contains(&self.trailing_atr_multiple) {
            return Err(PlatformError::Configuration(format!(
                "trailing_atr_multiple must be in [1.0, 3.0], got {}",
                self.trailing_atr_multiple
            )));
        }
        if self.max_holding_bars == 0 {
            return Err(PlatformError::Configuration(
                "max_holding_bars must be positive".to_string(),
            ));
        }
        if !(1.0..=2.0).contains(&self.volume_multiple) {
            return Err(PlatformError::Configuration(format!(
                "volume_multiple must be in [1.0, 2.0], got {}",
                self.volume_multiple
            )));
        }
        Ok(())
    }
}

/// Model family for the signal gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    TreeEnsemble,
    GradientBoosted,
}

/// What to do with a fold whose gate training fails (single-class labels,
/// numerical failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitErrorPolicy {
    /// Run the fold without a gate (all candidates pass).
    Ungated,
    /// Skip the fold entirely.
    Skip,
}

/// ML gate parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    pub enabled: bool,
    pub model_family: ModelFamily,
    /// Acceptance threshold on the gate confidence, in [0.5, 0.95].
    pub threshold: f64,
    /// Synthesize minority-class training rows by k-NN interpolation.
    pub use_smote_like_rebalance: bool,
    /// A trade labels positive when its net return reaches this fraction.
    pub profit_label_threshold: f64,
    pub on_fit_error: FitErrorPolicy,
    /// Seed for all stochastic steps (tree training, rebalancing).
    pub seed: u64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_family: ModelFamily::TreeEnsemble,
            threshold: 0.6,
            use_smote_like_rebalance: false,
            profit_label_threshold: 0.02,
            on_fit_error: FitErrorPolicy::Ungated,
            seed: 7,
        }
    }
}

impl MlConfig {
    pub fn validate(&self) -> Result<(), PlatformError> {
        if !(0.5..=0.95).contains(&self.threshold) {
            return Err(PlatformError::Configuration(format!(
                "ml.threshold must be in [0.5, 0.95], got {}",
                self.threshold
            )));
        }
        if !self.profit_label_threshold.is_finite() {
            return Err(PlatformError::Configuration(
                "ml.profit_label_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a simulated entry fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Fill at the close of the bar that triggered the signal.
    TriggerBarClose,
    /// Fill at the open of the bar after the trigger (strict mode).
    NextBarOpen,
}

/// Walk-forward window parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub train_months: u32,
    pub test_months: u32,
    pub step_months: u32,
    /// Folds with fewer training candidates than this are skipped.
    pub min_train_signals: usize,
    pub entry_mode: EntryMode,
    /// Abort a (symbol, fold) when consecutive trigger bars are separated by
    /// more than this many bar intervals.
    pub max_gap_bars: usize,
    /// Drop end-of-data trades from aggregate metrics.
    #[serde(default)]
    pub exclude_end_of_data: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            train_months: 18,
            test_months: 6,
            step_months: 6,
            min_train_signals: 30,
            entry_mode: EntryMode::TriggerBarClose,
            max_gap_bars: 30,
            exclude_end_of_data: false,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), PlatformError> {
        if self.train_months == 0 || self.test_months == 0 || self.step_months == 0 {
            return Err(PlatformError::Configuration(
                "backtest windows must be positive month counts".to_string(),
            ));
        }
        if self.max_gap_bars == 0 {
            return Err(PlatformError::Configuration(
                "max_gap_bars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full platform configuration. Constructed once and passed explicitly to
/// each component; there is no module-level state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub strategy: StrategyConfig,
    pub ml: MlConfig,
    pub backtest: BacktestConfig,
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<(), PlatformError> {
        self.strategy.validate()?;
        self.ml.validate()?;
        self.backtest.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PlatformConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ladder_fractions_must_sum_to_one() {
        let mut cfg = StrategyConfig::default();
        cfg.target_ladder = vec![
            LadderRung { fraction: 0.5, reward_multiple: 1.0 },
            LadderRung { fraction: 0.3, reward_multiple: 1.5 },
        ];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_ladder_multiples_must_increase() {
        let mut cfg = StrategyConfig::default();
        cfg.target_ladder = vec![
            LadderRung { fraction: 0.5, reward_multiple: 1.5 },
            LadderRung { fraction: 0.5, reward_multiple: 1.0 },
        ];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut cfg = MlConfig::default();
        cfg.threshold = 0.3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_pullback_default_follows_timeframe() {
        let cfg = StrategyConfig::default();
        assert_eq!(cfg.pullback_bars_for(Timeframe::Daily), 17);
        assert_eq!(cfg.pullback_bars_for(Timeframe::Hour1), 68);

        let mut cfg = cfg;
        cfg.pullback_bars = Some(10);
        assert_eq!(cfg.pullback_bars_for(Timeframe::Hour1), 10);
    }
}
