//! Candlestick pattern flags.
//!
//! Each detector uses fixed body/shadow ratio thresholds, documented per
//! pattern. Column builders return full-length 0.0/1.0 columns aligned to
//! the bars (two-bar patterns are NaN on the first bar).

use market_core::Bar;

/// Doji: body smaller than 10% of the bar's range.
pub fn is_doji(bar: &Bar) -> bool {
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    range > 0.0 && body / range < 0.1
}

/// Hammer: body under 30% of range, lower shadow over 2× the body, upper
/// shadow under half the body.
pub fn is_hammer(bar: &Bar) -> bool {
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    if range == 0.0 || body == 0.0 {
        return false;
    }
    let lower_shadow = bar.open.min(bar.close) - bar.low;
    let upper_shadow = bar.high - bar.open.max(bar.close);
    body / range < 0.3 && lower_shadow > 2.0 * body && upper_shadow < body * 0.5
}

/// Shooting star: mirror of the hammer — body under 30% of range, upper
/// shadow over 2× the body, lower shadow under half the body.
pub fn is_shooting_star(bar: &Bar) -> bool {
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    if range == 0.0 || body == 0.0 {
        return false;
    }
    let lower_shadow = bar.open.min(bar.close) - bar.low;
    let upper_shadow = bar.high - bar.open.max(bar.close);
    body / range < 0.3 && upper_shadow > 2.0 * body && lower_shadow < body * 0.5
}

/// Bullish engulfing: previous bar bearish, current bar bullish with a body
/// that spans the previous body.
pub fn is_bullish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close < prev.open
        && curr.close > curr.open
        && curr.open <= prev.close
        && curr.close >= prev.open
}

/// Bearish engulfing: previous bar bullish, current bar bearish with a body
/// that spans the previous body.
pub fn is_bearish_engulfing(prev: &Bar, curr: &Bar) -> bool {
    prev.close > prev.open
        && curr.close < curr.open
        && curr.open >= prev.close
        && curr.close <= prev.open
}

fn flag(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

/// Single-bar pattern column.
fn single_bar_column(bars: &[Bar], predicate: fn(&Bar) -> bool) -> Vec<f64> {
    bars.iter().map(|b| flag(predicate(b))).collect()
}

/// Two-bar pattern column (NaN on the first bar).
fn two_bar_column(bars: &[Bar], predicate: fn(&Bar, &Bar) -> bool) -> Vec<f64> {
    let mut result = vec![f64::NAN; bars.len()];
    for i in 1..bars.len() {
        result[i] = flag(predicate(&bars[i - 1], &bars[i]));
    }
    result
}

pub fn doji_column(bars: &[Bar]) -> Vec<f64> {
    single_bar_column(bars, is_doji)
}

pub fn hammer_column(bars: &[Bar]) -> Vec<f64> {
    single_bar_column(bars, is_hammer)
}

pub fn shooting_star_column(bars: &[Bar]) -> Vec<f64> {
    single_bar_column(bars, is_shooting_star)
}

pub fn bullish_engulfing_column(bars: &[Bar]) -> Vec<f64> {
    two_bar_column(bars, is_bullish_engulfing)
}

pub fn bearish_engulfing_column(bars: &[Bar]) -> Vec<f64> {
    two_bar_column(bars, is_bearish_engulfing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_doji_small_body() {
        assert!(is_doji(&bar(100.0, 101.0, 99.0, 100.05)));
        assert!(!is_doji(&bar(100.0, 101.0, 99.0, 100.8)));
    }

    #[test]
    fn test_hammer_long_lower_shadow() {
        // Body 0.3 at the top of a 2.0 range, lower shadow 1.6
        assert!(is_hammer(&bar(101.6, 102.0, 100.0, 101.9)));
        // Shadow on the wrong side
        assert!(!is_hammer(&bar(100.1, 102.0, 100.0, 100.4)));
    }

    #[test]
    fn test_shooting_star_long_upper_shadow() {
        assert!(is_shooting_star(&bar(100.1, 102.0, 100.0, 100.4)));
        assert!(!is_shooting_star(&bar(101.6, 102.0, 100.0, 101.9)));
    }

    #[test]
    fn test_engulfing_requires_opposite_bodies() {
        let prev = bar(101.0, 101.5, 99.5, 100.0); // bearish
        let curr = bar(99.8, 102.0, 99.5, 101.5); // bullish, engulfs
        assert!(is_bullish_engulfing(&prev, &curr));
        assert!(!is_bearish_engulfing(&prev, &curr));

        let prev = bar(100.0, 101.5, 99.5, 101.0); // bullish
        let curr = bar(101.2, 101.5, 99.0, 99.8); // bearish, engulfs
        assert!(is_bearish_engulfing(&prev, &curr));
    }

    #[test]
    fn test_two_bar_column_undefined_on_first_bar() {
        let bars = vec![
            bar(101.0, 101.5, 99.5, 100.0),
            bar(99.8, 102.0, 99.5, 101.5),
        ];
        let col = bullish_engulfing_column(&bars);
        assert!(col[0].is_nan());
        assert_eq!(col[1], 1.0);
    }
}
