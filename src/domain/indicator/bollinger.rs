//! Bollinger Bands indicator.
//!
//! Bollinger Bands consist of:
//! - Middle: Simple Moving Average (SMA) over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! Where StdDev is population standard deviation (divides by N, not N-1).
//! Bandwidth is (upper - lower) / middle × 100, reported as 0 when middle is 0.
//!
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) bars are invalid.

use std::collections::VecDeque;

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_STDDEV_MULT_X100: u32 = 200;

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    mult: f64,
    window: VecDeque<f64>,
}

impl Bollinger {
    pub fn new(period: usize, stddev_mult_x100: u32) -> Result<Self, ConfluenceError> {
        require_period("bollinger period", period)?;
        if stddev_mult_x100 == 0 {
            return Err(ConfluenceError::invalid_parameter(
                "bollinger multiplier",
                "must be positive",
            ));
        }
        Ok(Bollinger {
            period,
            mult: stddev_mult_x100 as f64 / 100.0,
            window: VecDeque::with_capacity(period + 1),
        })
    }

    pub fn update(&mut self, close: f64) -> Option<IndicatorValue> {
        self.window.push_back(close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let middle = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|c| {
                let diff = c - middle;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let stddev = variance.sqrt();
        let upper = middle + self.mult * stddev;
        let lower = middle - self.mult * stddev;
        let bandwidth = if middle != 0.0 {
            (upper - lower) / middle * 100.0
        } else {
            0.0
        };

        Some(IndicatorValue::Bollinger {
            upper,
            middle,
            lower,
            bandwidth,
        })
    }
}

pub fn calculate_bollinger(
    bars: &[PriceBar],
    period: usize,
    stddev_mult_x100: u32,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut bands = Bollinger::new(period, stddev_mult_x100)?;
    let kind = IndicatorKind::Bollinger {
        period,
        stddev_mult_x100,
    };
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| bands.update(bar.close)))
}
