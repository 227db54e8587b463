//! Exponential Moving Average and the fast/slow EMA pair.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = EMA[i-1] + k*(C[i] - EMA[i-1]).
//! The increment form is exact on constant input.
//! Warmup: first (n-1) bars are invalid.

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_PAIR_FAST: usize = 50;
pub const DEFAULT_PAIR_SLOW: usize = 200;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    seen: usize,
    sum: f64,
    ema: f64,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, ConfluenceError> {
        require_period("ema period", period)?;
        Ok(Ema {
            period,
            k: 2.0 / (period as f64 + 1.0),
            seen: 0,
            sum: 0.0,
            ema: 0.0,
        })
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        self.seen += 1;
        if self.seen < self.period {
            self.sum += value;
            None
        } else if self.seen == self.period {
            self.sum += value;
            self.ema = self.sum / self.period as f64;
            Some(self.ema)
        } else {
            self.ema += self.k * (value - self.ema);
            Some(self.ema)
        }
    }
}

pub fn calculate_ema(bars: &[PriceBar], period: usize) -> Result<IndicatorSeries, ConfluenceError> {
    let mut ema = Ema::new(period)?;
    let kind = IndicatorKind::Ema(period);
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        ema.update(bar.close).map(IndicatorValue::Simple)
    }))
}

/// Two EMAs over the same closes. Valid once the slower one is.
#[derive(Debug, Clone)]
pub struct EmaPair {
    fast: Ema,
    slow: Ema,
}

impl EmaPair {
    pub fn new(fast: usize, slow: usize) -> Result<Self, ConfluenceError> {
        if fast >= slow {
            return Err(ConfluenceError::invalid_parameter(
                "ema pair",
                format!("fast period {fast} must be shorter than slow period {slow}"),
            ));
        }
        Ok(EmaPair {
            fast: Ema::new(fast)?,
            slow: Ema::new(slow)?,
        })
    }

    /// Returns (fast, slow).
    pub fn update(&mut self, close: f64) -> Option<(f64, f64)> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        fast.zip(slow)
    }
}

pub fn calculate_ema_pair(
    bars: &[PriceBar],
    fast: usize,
    slow: usize,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut pair = EmaPair::new(fast, slow)?;
    let kind = IndicatorKind::EmaPair { fast, slow };
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        pair.update(bar.close).map(|(fast, slow)| IndicatorValue::EmaPair {
            fast,
            slow,
            spread: fast - slow,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    fn simple(series: &IndicatorSeries, i: usize) -> f64 {
        series.values[i].simple().expect("valid simple value")
    }

    #[test]
    fn ema_warmup() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3).unwrap();

        assert!(!series.values[0].is_valid());
        assert!(!series.values[1].is_valid());
        assert!(series.values[2].is_valid());
        assert!(series.values[3].is_valid());
        assert!(series.values[4].is_valid());
    }

    #[test]
    fn ema_period_1() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 1).unwrap();

        assert!((simple(&series, 0) - 10.0).abs() < f64::EPSILON);
        assert!((simple(&series, 1) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = make_bars(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3).unwrap();
        let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
        assert!((simple(&series, 2) - expected_sma).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3).unwrap();

        let k = 2.0 / 4.0;
        let sma = (10.0 + 20.0 + 30.0) / 3.0;
        let ema_3 = sma + k * (40.0 - sma);
        let ema_4 = ema_3 + k * (50.0 - ema_3);

        assert!((simple(&series, 3) - ema_3).abs() < f64::EPSILON);
        assert!((simple(&series, 4) - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_equal_prices() {
        let bars = make_bars(&[100.0, 100.0, 100.0, 100.0, 100.0]);
        let series = calculate_ema(&bars, 3).unwrap();
        for i in 2..5 {
            assert!((simple(&series, i) - 100.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_constant_input_stays_exact() {
        let bars = make_bars(&vec![123.45; 400]);
        let series = calculate_ema(&bars, 200).unwrap();
        let seed = simple(&series, 199);
        for i in 200..400 {
            assert_eq!(simple(&series, i), seed);
        }
    }

    #[test]
    fn ema_too_short() {
        let bars = make_bars(&[10.0, 20.0]);
        assert!(calculate_ema(&bars, 3).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn ema_period_0() {
        let bars = make_bars(&[10.0, 20.0]);
        assert!(matches!(
            calculate_ema(&bars, 0),
            Err(ConfluenceError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn ema_pair_valid_with_slow() {
        let prices: Vec<f64> = (0..6).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&prices);
        let series = calculate_ema_pair(&bars, 2, 4).unwrap();
        assert!(!series.values[2].is_valid());
        assert!(series.values[3].is_valid());
        match series.values[5].value {
            Some(IndicatorValue::EmaPair { fast, slow, spread }) => {
                assert!(fast > slow);
                assert!((spread - (fast - slow)).abs() < f64::EPSILON);
            }
            other => panic!("expected EmaPair, got {:?}", other),
        }
    }

    #[test]
    fn ema_pair_rejects_inverted_periods() {
        let bars = make_bars(&[1.0; 10]);
        assert!(calculate_ema_pair(&bars, 5, 5).is_err());
        assert!(calculate_ema_pair(&bars, 6, 5).is_err());
    }
}
