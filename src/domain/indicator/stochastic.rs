//! Stochastic oscillator.
//!
//! %K = (close - lowest low) / (highest high - lowest low) × 100 over k bars,
//! 50 when the range is flat. %D = SMA(d) of %K.
//! Warmup: k + d - 1 bars.

use std::collections::VecDeque;

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
    Sma,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_K_PERIOD: usize = 14;
pub const DEFAULT_D_PERIOD: usize = 3;

#[derive(Debug, Clone)]
pub struct Stochastic {
    k_period: usize,
    window: VecDeque<(f64, f64)>,
    d: Sma,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Result<Self, ConfluenceError> {
        require_period("stochastic k period", k_period)?;
        Ok(Stochastic {
            k_period,
            window: VecDeque::with_capacity(k_period + 1),
            d: Sma::new(d_period)?,
        })
    }

    pub fn update(&mut self, bar: &PriceBar) -> Option<IndicatorValue> {
        self.window.push_back((bar.high, bar.low));
        if self.window.len() > self.k_period {
            self.window.pop_front();
        }
        if self.window.len() < self.k_period {
            return None;
        }

        let highest = self
            .window
            .iter()
            .map(|&(h, _)| h)
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = self
            .window
            .iter()
            .map(|&(_, l)| l)
            .fold(f64::INFINITY, f64::min);
        let range = highest - lowest;
        let k = if range > 0.0 {
            ((bar.close - lowest) / range * 100.0).clamp(0.0, 100.0)
        } else {
            50.0
        };

        let d = self.d.update(k)?;
        Some(IndicatorValue::Stochastic { k, d })
    }
}

pub fn calculate_stochastic(
    bars: &[PriceBar],
    k_period: usize,
    d_period: usize,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut stoch = Stochastic::new(k_period, d_period)?;
    let kind = IndicatorKind::Stochastic { k_period, d_period };
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| stoch.update(bar)))
}
