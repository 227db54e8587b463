//! Simple Moving Average.
//!
//! SMA(n)[i] = mean of the last n closes, kept as a running sum.
//! Warmup: first (n-1) bars are invalid.

use std::collections::VecDeque;

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, ConfluenceError> {
        require_period("sma period", period)?;
        Ok(Sma {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: 0.0,
        })
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        if self.window.len() == self.period {
            Some(self.sum / self.period as f64)
        } else {
            None
        }
    }
}

pub fn calculate_sma(bars: &[PriceBar], period: usize) -> Result<IndicatorSeries, ConfluenceError> {
    let mut sma = Sma::new(period)?;
    let kind = IndicatorKind::Sma(period);
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        sma.update(bar.close).map(IndicatorValue::Simple)
    }))
}
