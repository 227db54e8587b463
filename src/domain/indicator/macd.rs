//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: slow + signal - 1 bars. The signal EMA starts only once the
//! MACD line exists, seeded by the SMA of its first `signal` values.

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, Ema, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, ConfluenceError> {
        if fast >= slow {
            return Err(ConfluenceError::invalid_parameter(
                "macd",
                format!("fast period {fast} must be shorter than slow period {slow}"),
            ));
        }
        Ok(Macd {
            fast: Ema::new(fast)?,
            slow: Ema::new(slow)?,
            signal: Ema::new(signal)?,
        })
    }

    pub fn update(&mut self, close: f64) -> Option<IndicatorValue> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let line = fast? - slow?;
        let signal = self.signal.update(line)?;
        Some(IndicatorValue::Macd {
            line,
            signal,
            histogram: line - signal,
        })
    }
}

pub fn calculate_macd(
    bars: &[PriceBar],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut macd = Macd::new(fast, slow, signal)?;
    let kind = IndicatorKind::Macd { fast, slow, signal };
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| macd.update(bar.close)))
}
