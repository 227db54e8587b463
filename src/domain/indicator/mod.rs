//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorKind`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values
//!
//! Every indicator is an incremental state machine with an `update` method
//! that consumes one bar (or one value) and returns `None` while warming up.
//! The `calculate_*` functions drive that state across a slice of bars, so a
//! batch result and a bar-by-bar replay produce identical numbers.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod fibonacci;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod vwap;

pub use atr::{calculate_atr, Atr};
pub use bollinger::{calculate_bollinger, Bollinger};
pub use ema::{calculate_ema, calculate_ema_pair, Ema, EmaPair};
pub use fibonacci::{calculate_fibonacci, Fibonacci, FibonacciLevels};
pub use macd::{calculate_macd, Macd};
pub use obv::{calculate_obv, Obv};
pub use rsi::{calculate_rsi, Rsi};
pub use sma::{calculate_sma, Sma};
pub use stochastic::{calculate_stochastic, Stochastic};
pub use vwap::{calculate_vwap, Vwap, VwapSession};

use chrono::{DateTime, Utc};
use std::fmt;

use crate::domain::error::ConfluenceError;
use crate::domain::ohlcv::PriceBar;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    /// `None` during warm-up.
    pub value: Option<IndicatorValue>,
}

impl IndicatorPoint {
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    pub fn simple(&self) -> Option<f64> {
        match self.value {
            Some(IndicatorValue::Simple(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
        /// (upper - lower) / middle * 100
        bandwidth: f64,
    },
    EmaPair {
        fast: f64,
        slow: f64,
        spread: f64,
    },
    Fibonacci(FibonacciLevels),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IndicatorKind {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Obv,
    Vwap(VwapSession),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Stochastic {
        k_period: usize,
        d_period: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
    EmaPair {
        fast: usize,
        slow: usize,
    },
    Fibonacci {
        lookback: usize,
    },
}

impl IndicatorKind {
    /// Number of bars needed before the first valid reading.
    pub fn warmup(&self) -> usize {
        match *self {
            IndicatorKind::Sma(n) | IndicatorKind::Ema(n) | IndicatorKind::Atr(n) => n,
            IndicatorKind::Rsi(n) => n + 1,
            IndicatorKind::Obv | IndicatorKind::Vwap(_) => 1,
            IndicatorKind::Macd { slow, signal, .. } => slow + signal - 1,
            IndicatorKind::Stochastic { k_period, d_period } => k_period + d_period - 1,
            IndicatorKind::Bollinger { period, .. } => period,
            IndicatorKind::EmaPair { fast, slow } => fast.max(slow),
            IndicatorKind::Fibonacci { lookback } => lookback,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndicatorSeries {
    pub kind: IndicatorKind,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn last_value(&self) -> Option<IndicatorValue> {
        self.values.last().and_then(|p| p.value)
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|p| p.is_valid()).count()
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorKind::Sma(period) => write!(f, "SMA({})", period),
            IndicatorKind::Ema(period) => write!(f, "EMA({})", period),
            IndicatorKind::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorKind::Atr(period) => write!(f, "ATR({})", period),
            IndicatorKind::Obv => write!(f, "OBV"),
            IndicatorKind::Vwap(session) => write!(f, "VWAP({})", session),
            IndicatorKind::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorKind::Stochastic { k_period, d_period } => {
                write!(f, "STOCHASTIC({},{})", k_period, d_period)
            }
            IndicatorKind::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
            IndicatorKind::EmaPair { fast, slow } => write!(f, "EMA_PAIR({},{})", fast, slow),
            IndicatorKind::Fibonacci { lookback } => write!(f, "FIBONACCI({})", lookback),
        }
    }
}

pub(crate) fn require_period(name: &str, period: usize) -> Result<(), ConfluenceError> {
    if period == 0 {
        return Err(ConfluenceError::invalid_parameter(
            name,
            "period must be at least 1",
        ));
    }
    Ok(())
}

pub(crate) fn require_bars(kind: &IndicatorKind, bars: &[PriceBar]) -> Result<(), ConfluenceError> {
    let minimum = kind.warmup();
    if bars.len() < minimum {
        return Err(ConfluenceError::insufficient(
            kind.to_string(),
            bars.len(),
            minimum,
        ));
    }
    Ok(())
}

/// Drive a per-bar update function across `bars`.
pub(crate) fn collect_series<F>(kind: IndicatorKind, bars: &[PriceBar], mut step: F) -> IndicatorSeries
where
    F: FnMut(&PriceBar) -> Option<IndicatorValue>,
{
    let values = bars
        .iter()
        .map(|bar| IndicatorPoint {
            timestamp: bar.timestamp,
            value: step(bar),
        })
        .collect();
    IndicatorSeries { kind, values }
}
