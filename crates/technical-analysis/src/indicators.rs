//! Indicator columns.
//!
//! Every function returns a column with the SAME length as its input,
//! aligned index-for-index with the source bars. Slots before the warmup
//! index hold `f64::NAN`; consumers treat NaN as "undefined" and must skip
//! the bar rather than interpolate or zero-fill.

use market_core::Bar;

/// A full-length column of NaN.
fn nan_column(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}

/// Index of the first non-NaN element, or the length if there is none.
fn first_valid(data: &[f64]) -> usize {
    data.iter().position(|v| !v.is_nan()).unwrap_or(data.len())
}

/// Simple Moving Average. Warmup: period - 1 bars.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if period == 0 || data.len() < period {
        return result;
    }
    let start = first_valid(data);
    if start + period > data.len() {
        return result;
    }

    let mut sum: f64 = data[start..start + period].iter().sum();
    result[start + period - 1] = sum / period as f64;
    for i in start + period..data.len() {
        sum += data[i] - data[i - period];
        result[i] = sum / period as f64;
    }
    result
}

/// Exponential Moving Average with alpha = 2 / (period + 1), seeded with
/// the simple mean of the first `period` values. Warmup: period - 1 bars.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if period == 0 || data.is_empty() {
        return result;
    }
    let start = first_valid(data);
    if start + period > data.len() {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[start..start + period].iter().sum::<f64>() / period as f64;
    result[start + period - 1] = seed;

    let mut prev = seed;
    for i in start + period..data.len() {
        let value = (data[i] - prev) * multiplier + prev;
        result[i] = value;
        prev = value;
    }
    result
}

/// Per-bar fractional slope of a column over the trailing `lookback` bars:
/// (value / value[lookback ago] - 1) / lookback.
pub fn slope(data: &[f64], lookback: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if lookback == 0 {
        return result;
    }
    for i in lookback..data.len() {
        let past = data[i - lookback];
        if past.is_nan() || data[i].is_nan() || past == 0.0 {
            continue;
        }
        result[i] = (data[i] / past - 1.0) / lookback as f64;
    }
    result
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(
    data: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdResult {
    let n = data.len();
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || slow_period < fast_period {
        return MacdResult {
            macd_line: nan_column(n),
            signal_line: nan_column(n),
            histogram: nan_column(n),
        };
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();

    // ema() skips the NaN prefix of the MACD line, so the signal line
    // stays aligned to the bar index.
    let signal_line = ema(&macd_line, signal_period);

    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| m - s)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Relative Strength Index with Wilder smoothing. Warmup: period bars.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for pair in data.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        result[i + 1] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// True Range per bar (undefined on the first bar).
fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = nan_column(bars.len());
    for i in 1..bars.len() {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();
        tr[i] = high_low.max(high_close).max(low_close);
    }
    tr
}

/// Average True Range with Wilder smoothing. Warmup: period bars.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut result = nan_column(bars.len());
    if period == 0 || bars.len() < period + 1 {
        return result;
    }

    let tr = true_range(bars);
    let mut value = tr[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = value;

    for i in period + 1..bars.len() {
        value = (value * (period - 1) as f64 + tr[i]) / period as f64;
        result[i] = value;
    }
    result
}

/// ATR expressed as a fraction of the close.
pub fn atr_percent(bars: &[Bar], period: usize) -> Vec<f64> {
    atr(bars, period)
        .iter()
        .zip(bars)
        .map(|(a, b)| if b.close > 0.0 { a / b.close } else { f64::NAN })
        .collect()
}

/// Average Directional Index — trend strength (0-100) with DI+ / DI-.
pub struct AdxResult {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(bars: &[Bar], period: usize) -> AdxResult {
    let n = bars.len();
    let mut result = AdxResult {
        adx: nan_column(n),
        plus_di: nan_column(n),
        minus_di: nan_column(n),
    };
    if period == 0 || n < period * 2 {
        return result;
    }

    // +DM, -DM and TR, defined from the second bar
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let tr = true_range(bars);

    for i in 1..n {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    // Wilder smoothed sums over the first window
    let mut smoothed_plus = plus_dm[1..=period].iter().sum::<f64>();
    let mut smoothed_minus = minus_dm[1..=period].iter().sum::<f64>();
    let mut smoothed_tr = tr[1..=period].iter().sum::<f64>();

    let mut dx = nan_column(n);
    for i in period..n {
        if i > period {
            smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dm[i];
            smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dm[i];
            smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + tr[i];
        }

        let (pdi, mdi) = if smoothed_tr > 0.0 {
            (
                100.0 * smoothed_plus / smoothed_tr,
                100.0 * smoothed_minus / smoothed_tr,
            )
        } else {
            (0.0, 0.0)
        };
        result.plus_di[i] = pdi;
        result.minus_di[i] = mdi;

        let di_sum = pdi + mdi;
        dx[i] = if di_sum > 0.0 {
            100.0 * (pdi - mdi).abs() / di_sum
        } else {
            0.0
        };
    }

    // Smooth DX into ADX
    let adx_start = period * 2 - 1;
    if adx_start >= n {
        return result;
    }
    let mut adx_val = dx[period..=adx_start].iter().sum::<f64>() / period as f64;
    result.adx[adx_start] = adx_val;
    for i in adx_start + 1..n {
        adx_val = (adx_val * (period - 1) as f64 + dx[i]) / period as f64;
        result.adx[i] = adx_val;
    }
    result
}

/// Bollinger Bands plus the derived width, %B and squeeze columns.
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    /// (upper - lower) / middle
    pub width: Vec<f64>,
    /// (close - lower) / (upper - lower)
    pub percent_b: Vec<f64>,
    /// 1.0 when width drops below its rolling 20th percentile over 20 bars
    pub squeeze: Vec<f64>,
}

pub fn bollinger(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let n = data.len();
    let middle = sma(data, period);
    let mut upper = nan_column(n);
    let mut lower = nan_column(n);
    let mut width = nan_column(n);
    let mut percent_b = nan_column(n);

    if period > 0 && n >= period {
        for i in period - 1..n {
            let mean = middle[i];
            if mean.is_nan() {
                continue;
            }
            let window = &data[i + 1 - period..=i];
            let variance =
                window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
            let std = variance.sqrt();
            let up = mean + std_dev * std;
            let lo = mean - std_dev * std;
            upper[i] = up;
            lower[i] = lo;
            if mean != 0.0 {
                width[i] = (up - lo) / mean;
            }
            if up > lo {
                percent_b[i] = (data[i] - lo) / (up - lo);
            }
        }
    }

    let threshold = rolling_percentile(&width, 20, 0.2);
    let squeeze: Vec<f64> = width
        .iter()
        .zip(&threshold)
        .map(|(w, t)| {
            if w.is_nan() || t.is_nan() {
                f64::NAN
            } else if w < t {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    BollingerBands {
        upper,
        middle,
        lower,
        width,
        percent_b,
        squeeze,
    }
}

/// Keltner Channels (EMA +/- ATR × multiplier)
pub struct KeltnerChannels {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn keltner(
    bars: &[Bar],
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
) -> KeltnerChannels {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let middle = ema(&closes, ema_period);
    let atr_values = atr(bars, atr_period);

    let upper: Vec<f64> = middle
        .iter()
        .zip(&atr_values)
        .map(|(m, a)| m + multiplier * a)
        .collect();
    let lower: Vec<f64> = middle
        .iter()
        .zip(&atr_values)
        .map(|(m, a)| m - multiplier * a)
        .collect();

    KeltnerChannels {
        upper,
        middle,
        lower,
    }
}

/// Stochastic Oscillator
pub struct StochasticResult {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> StochasticResult {
    let n = bars.len();
    let mut k = nan_column(n);
    if k_period == 0 || n < k_period {
        return StochasticResult {
            d: nan_column(n),
            k,
        };
    }

    for i in k_period - 1..n {
        let window = &bars[i + 1 - k_period..=i];
        let highest = window
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        k[i] = if highest == lowest {
            50.0
        } else {
            100.0 * (bars[i].close - lowest) / (highest - lowest)
        };
    }

    let d = sma(&k, d_period);
    StochasticResult { k, d }
}

/// On-Balance Volume
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut result = Vec::with_capacity(bars.len());
    if bars.is_empty() {
        return result;
    }
    result.push(bars[0].volume);
    for i in 1..bars.len() {
        let prev = result[i - 1];
        let next = if bars[i].close > bars[i - 1].close {
            prev + bars[i].volume
        } else if bars[i].close < bars[i - 1].close {
            prev - bars[i].volume
        } else {
            prev
        };
        result.push(next);
    }
    result
}

/// Volume-Price Trend: cumulative volume scaled by fractional price change.
pub fn vpt(bars: &[Bar]) -> Vec<f64> {
    let mut result = Vec::with_capacity(bars.len());
    if bars.is_empty() {
        return result;
    }
    result.push(0.0);
    for i in 1..bars.len() {
        let prev_close = bars[i - 1].close;
        let delta = if prev_close > 0.0 {
            bars[i].volume * (bars[i].close - prev_close) / prev_close
        } else {
            0.0
        };
        result.push(result[i - 1] + delta);
    }
    result
}

/// Volume-Weighted Average Price (cumulative over the series)
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut result = Vec::with_capacity(bars.len());
    let mut cumulative_tpv = 0.0;
    let mut cumulative_volume = 0.0;

    for bar in bars {
        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        cumulative_tpv += typical_price * bar.volume;
        cumulative_volume += bar.volume;
        result.push(if cumulative_volume > 0.0 {
            cumulative_tpv / cumulative_volume
        } else {
            typical_price
        });
    }
    result
}

/// Money Flow Index. Warmup: period bars.
pub fn mfi(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut result = nan_column(n);
    if period == 0 || n < period + 1 {
        return result;
    }

    let typical: Vec<f64> = bars
        .iter()
        .map(|b| (b.high + b.low + b.close) / 3.0)
        .collect();
    let mut positive = vec![0.0; n];
    let mut negative = vec![0.0; n];
    for i in 1..n {
        let flow = typical[i] * bars[i].volume;
        if typical[i] > typical[i - 1] {
            positive[i] = flow;
        } else if typical[i] < typical[i - 1] {
            negative[i] = flow;
        }
    }

    for i in period..n {
        let pos: f64 = positive[i + 1 - period..=i].iter().sum();
        let neg: f64 = negative[i + 1 - period..=i].iter().sum();
        result[i] = if neg == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + pos / neg)
        };
    }
    result
}

/// Commodity Channel Index. Warmup: period - 1 bars.
pub fn cci(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut result = nan_column(n);
    if period == 0 || n < period {
        return result;
    }

    let typical: Vec<f64> = bars
        .iter()
        .map(|b| (b.high + b.low + b.close) / 3.0)
        .collect();

    for i in period - 1..n {
        let window = &typical[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let mean_dev = window.iter().map(|t| (t - mean).abs()).sum::<f64>() / period as f64;
        result[i] = if mean_dev > 0.0 {
            (typical[i] - mean) / (0.015 * mean_dev)
        } else {
            0.0
        };
    }
    result
}

/// Williams %R (-100..0). Warmup: period - 1 bars.
pub fn williams_r(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut result = nan_column(n);
    if period == 0 || n < period {
        return result;
    }

    for i in period - 1..n {
        let window = &bars[i + 1 - period..=i];
        let highest = window
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        result[i] = if highest == lowest {
            -50.0
        } else {
            -100.0 * (highest - bars[i].close) / (highest - lowest)
        };
    }
    result
}

/// Annualized historical volatility: stdev of log returns over `period`
/// bars × sqrt(252). Warmup: period bars.
pub fn historical_volatility(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = nan_column(n);
    if period < 2 || n < period + 1 {
        return result;
    }

    let mut log_returns = nan_column(n);
    for i in 1..n {
        if data[i] > 0.0 && data[i - 1] > 0.0 {
            log_returns[i] = (data[i] / data[i - 1]).ln();
        }
    }

    for i in period..n {
        let window = &log_returns[i + 1 - period..=i];
        if window.iter().any(|r| r.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance =
            window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (period as f64 - 1.0);
        result[i] = variance.sqrt() * 252.0_f64.sqrt();
    }
    result
}

/// Rolling maximum over the trailing window.
pub fn rolling_max(data: &[f64], window: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if window == 0 {
        return result;
    }
    for i in window - 1..data.len() {
        let slice = &data[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }
    result
}

/// Rolling minimum over the trailing window.
pub fn rolling_min(data: &[f64], window: usize) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if window == 0 {
        return result;
    }
    for i in window - 1..data.len() {
        let slice = &data[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = slice.iter().copied().fold(f64::INFINITY, f64::min);
    }
    result
}

/// Rolling percentile (linear interpolation between order statistics).
pub fn rolling_percentile(data: &[f64], window: usize, pct: f64) -> Vec<f64> {
    let mut result = nan_column(data.len());
    if window == 0 {
        return result;
    }
    for i in window.saturating_sub(1)..data.len() {
        let slice = &data[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mut sorted: Vec<f64> = slice.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = pct.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        result[i] = if lo == hi {
            sorted[lo]
        } else {
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        };
    }
    result
}
