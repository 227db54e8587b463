//! Fibonacci retracement levels between the swing high and swing low of the
//! last `lookback` bars. Level 0 is the high, level 100 the low.

use std::collections::VecDeque;

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_LOOKBACK: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FibonacciLevels {
    pub level_0: f64,
    pub level_236: f64,
    pub level_382: f64,
    pub level_500: f64,
    pub level_618: f64,
    pub level_100: f64,
}

impl FibonacciLevels {
    pub fn from_range(high: f64, low: f64) -> Self {
        let diff = high - low;
        FibonacciLevels {
            level_0: high,
            level_236: high - 0.236 * diff,
            level_382: high - 0.382 * diff,
            level_500: high - 0.5 * diff,
            level_618: high - 0.618 * diff,
            level_100: low,
        }
    }

    pub fn as_array(&self) -> [(&'static str, f64); 6] {
        [
            ("0%", self.level_0),
            ("23.6%", self.level_236),
            ("38.2%", self.level_382),
            ("50%", self.level_500),
            ("61.8%", self.level_618),
            ("100%", self.level_100),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Fibonacci {
    lookback: usize,
    window: VecDeque<(f64, f64)>,
}

impl Fibonacci {
    pub fn new(lookback: usize) -> Result<Self, ConfluenceError> {
        require_period("fibonacci lookback", lookback)?;
        Ok(Fibonacci {
            lookback,
            window: VecDeque::with_capacity(lookback + 1),
        })
    }

    pub fn update(&mut self, bar: &PriceBar) -> Option<FibonacciLevels> {
        self.window.push_back((bar.high, bar.low));
        if self.window.len() > self.lookback {
            self.window.pop_front();
        }
        if self.window.len() < self.lookback {
            return None;
        }
        let high = self
            .window
            .iter()
            .map(|&(h, _)| h)
            .fold(f64::NEG_INFINITY, f64::max);
        let low = self
            .window
            .iter()
            .map(|&(_, l)| l)
            .fold(f64::INFINITY, f64::min);
        Some(FibonacciLevels::from_range(high, low))
    }
}

pub fn calculate_fibonacci(
    bars: &[PriceBar],
    lookback: usize,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut fib = Fibonacci::new(lookback)?;
    let kind = IndicatorKind::Fibonacci { lookback };
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        fib.update(bar).map(IndicatorValue::Fibonacci)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_hlc;

    #[test]
    fn levels_from_range() {
        let levels = FibonacciLevels::from_range(200.0, 100.0);
        assert!((levels.level_0 - 200.0).abs() < 1e-12);
        assert!((levels.level_236 - 176.4).abs() < 1e-9);
        assert!((levels.level_382 - 161.8).abs() < 1e-9);
        assert!((levels.level_500 - 150.0).abs() < 1e-9);
        assert!((levels.level_618 - 138.2).abs() < 1e-9);
        assert!((levels.level_100 - 100.0).abs() < 1e-12);
    }

    #[test]
    fn fibonacci_window_rolls() {
        let bars = make_hlc(&[
            (300.0, 290.0, 295.0),
            (120.0, 100.0, 110.0),
            (150.0, 130.0, 140.0),
            (160.0, 140.0, 150.0),
        ]);
        let series = calculate_fibonacci(&bars, 3).unwrap();
        assert!(!series.values[1].is_valid());

        match series.values[3].value {
            Some(IndicatorValue::Fibonacci(levels)) => {
                // bar 0 has left the window
                assert!((levels.level_0 - 160.0).abs() < 1e-12);
                assert!((levels.level_100 - 100.0).abs() < 1e-12);
            }
            other => panic!("expected Fibonacci, got {:?}", other),
        }
    }

    #[test]
    fn fibonacci_insufficient() {
        let bars = make_hlc(&[(10.0, 9.0, 9.5); 10]);
        assert!(calculate_fibonacci(&bars, 50)
            .unwrap_err()
            .is_insufficient_data());
    }
}
