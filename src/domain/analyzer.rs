//! Incremental indicator state.
//!
//! `Analyzer` owns one streaming instance of every indicator and pattern
//! detector plus the bounded windows they need. It only ever sees the bars
//! pushed into it, so a reading at bar t depends on bars 0..=t alone. The
//! single-shot signal and the backtest both drive the same type.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    atr, bollinger, ema, fibonacci, macd, rsi, stochastic, Atr, Bollinger, EmaPair, Fibonacci,
    FibonacciLevels, IndicatorKind, IndicatorValue, Macd, Obv, Rsi, Sma, Stochastic, Vwap,
    VwapSession,
};
use crate::domain::ohlcv::PriceBar;
use crate::domain::patterns::{
    Cross, CrossDetector, Divergence, DivergenceDetector, DEFAULT_DIVERGENCE_LOOKBACK,
};

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_mult_x100: u32,
    pub stochastic_k: usize,
    pub stochastic_d: usize,
    pub atr_period: usize,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub vwap_session: VwapSession,
    pub fibonacci_lookback: usize,
    pub divergence_lookback: usize,
    pub obv_trend_bars: usize,
    pub volume_average_bars: usize,
    /// ATR values ranked for the volatility percentile.
    pub atr_percentile_window: usize,
}

pub const DEFAULT_ATR_PERCENTILE_WINDOW: usize = 250;

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            rsi_period: rsi::DEFAULT_PERIOD,
            macd_fast: macd::DEFAULT_FAST,
            macd_slow: macd::DEFAULT_SLOW,
            macd_signal: macd::DEFAULT_SIGNAL,
            bollinger_period: bollinger::DEFAULT_PERIOD,
            bollinger_mult_x100: bollinger::DEFAULT_STDDEV_MULT_X100,
            stochastic_k: stochastic::DEFAULT_K_PERIOD,
            stochastic_d: stochastic::DEFAULT_D_PERIOD,
            atr_period: atr::DEFAULT_PERIOD,
            sma_fast: 50,
            sma_slow: 200,
            ema_fast: ema::DEFAULT_PAIR_FAST,
            ema_slow: ema::DEFAULT_PAIR_SLOW,
            vwap_session: VwapSession::Daily,
            fibonacci_lookback: fibonacci::DEFAULT_LOOKBACK,
            divergence_lookback: DEFAULT_DIVERGENCE_LOOKBACK,
            obv_trend_bars: 20,
            volume_average_bars: 20,
            atr_percentile_window: DEFAULT_ATR_PERCENTILE_WINDOW,
        }
    }
}

impl IndicatorConfig {
    /// Kinds that must be warm before a signal can be produced.
    pub fn required_kinds(&self) -> [IndicatorKind; 7] {
        [
            IndicatorKind::Rsi(self.rsi_period),
            IndicatorKind::Macd {
                fast: self.macd_fast,
                slow: self.macd_slow,
                signal: self.macd_signal,
            },
            IndicatorKind::Bollinger {
                period: self.bollinger_period,
                stddev_mult_x100: self.bollinger_mult_x100,
            },
            IndicatorKind::Stochastic {
                k_period: self.stochastic_k,
                d_period: self.stochastic_d,
            },
            IndicatorKind::Atr(self.atr_period),
            IndicatorKind::Vwap(self.vwap_session),
            IndicatorKind::Obv,
        ]
    }

    /// Bars needed before the first signal.
    pub fn warmup(&self) -> usize {
        self.required_kinds()
            .iter()
            .map(IndicatorKind::warmup)
            .max()
            .unwrap_or(1)
    }

    /// The required indicator that warms up last.
    pub fn slowest_required(&self) -> IndicatorKind {
        let kinds = self.required_kinds();
        let mut slowest = kinds[0];
        for kind in kinds {
            if kind.warmup() > slowest.warmup() {
                slowest = kind;
            }
        }
        slowest
    }

    /// Bars needed before every optional reading is also warm.
    pub fn full_warmup(&self) -> usize {
        self.warmup()
            .max(self.sma_slow)
            .max(self.ema_slow)
            .max(self.fibonacci_lookback)
            .max(self.obv_trend_bars)
            .max(self.volume_average_bars)
    }
}

/// Price and OBV moving together or apart over the trend window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ObvTrend {
    Supported,
    Divergence,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MacdReading {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BollingerReading {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StochasticReading {
    pub k: f64,
    pub d: f64,
}

/// All readings at one bar. Required readings are plain values, optional
/// ones are `None` while their indicator is warming up.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
    pub rsi: f64,
    pub macd: MacdReading,
    pub bollinger: BollingerReading,
    pub stochastic: StochasticReading,
    pub atr: f64,
    /// Share of the ATR history (this bar included) at or below the current ATR.
    pub atr_percentile: f64,
    pub vwap: f64,
    pub obv: f64,
    pub sma_fast: Option<f64>,
    pub sma_slow: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub obv_trend: Option<ObvTrend>,
    pub average_volume: Option<f64>,
    pub divergence: Option<Divergence>,
    pub cross: Option<Cross>,
    pub fibonacci: Option<FibonacciLevels>,
}

#[derive(Debug, Clone)]
pub struct Analyzer {
    bars_seen: usize,
    obv_trend_bars: usize,
    volume_average_bars: usize,
    atr_percentile_window: usize,
    rsi: Rsi,
    macd: Macd,
    bollinger: Bollinger,
    stochastic: Stochastic,
    atr: Atr,
    vwap: Vwap,
    obv: Obv,
    sma_fast: Sma,
    sma_slow: Sma,
    ema_pair: EmaPair,
    cross: CrossDetector,
    divergence: DivergenceDetector,
    fibonacci: Fibonacci,
    obv_window: VecDeque<(f64, f64)>,
    volume_window: VecDeque<f64>,
    /// Arrival order of the ranked ATR values.
    atr_window: VecDeque<f64>,
    /// Same values, sorted.
    atr_sorted: Vec<f64>,
}

impl Analyzer {
    pub fn new(config: &IndicatorConfig) -> Result<Self, ConfluenceError> {
        if config.obv_trend_bars < 2 {
            return Err(ConfluenceError::invalid_parameter(
                "obv trend bars",
                "must be at least 2",
            ));
        }
        if config.volume_average_bars == 0 {
            return Err(ConfluenceError::invalid_parameter(
                "volume average bars",
                "must be at least 1",
            ));
        }
        if config.atr_percentile_window == 0 {
            return Err(ConfluenceError::invalid_parameter(
                "atr percentile window",
                "must be at least 1",
            ));
        }
        Ok(Analyzer {
            bars_seen: 0,
            obv_trend_bars: config.obv_trend_bars,
            volume_average_bars: config.volume_average_bars,
            atr_percentile_window: config.atr_percentile_window,
            rsi: Rsi::new(config.rsi_period)?,
            macd: Macd::new(config.macd_fast, config.macd_slow, config.macd_signal)?,
            bollinger: Bollinger::new(config.bollinger_period, config.bollinger_mult_x100)?,
            stochastic: Stochastic::new(config.stochastic_k, config.stochastic_d)?,
            atr: Atr::new(config.atr_period)?,
            vwap: Vwap::new(config.vwap_session),
            obv: Obv::new(),
            sma_fast: Sma::new(config.sma_fast)?,
            sma_slow: Sma::new(config.sma_slow)?,
            ema_pair: EmaPair::new(config.ema_fast, config.ema_slow)?,
            cross: CrossDetector::new(),
            divergence: DivergenceDetector::new(config.divergence_lookback)?,
            fibonacci: Fibonacci::new(config.fibonacci_lookback)?,
            obv_window: VecDeque::with_capacity(config.obv_trend_bars + 1),
            volume_window: VecDeque::with_capacity(config.volume_average_bars + 1),
            atr_window: VecDeque::with_capacity(config.atr_percentile_window),
            atr_sorted: Vec::with_capacity(config.atr_percentile_window),
        })
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// Advance by one bar. Returns `None` until every required indicator is warm.
    pub fn push(&mut self, bar: &PriceBar) -> Option<IndicatorSnapshot> {
        self.bars_seen += 1;

        // Every stream advances on every bar, warm or not.
        let rsi = self.rsi.update(bar.close);
        let macd = self.macd.update(bar.close);
        let bollinger = self.bollinger.update(bar.close);
        let stochastic = self.stochastic.update(bar);
        let atr = self.atr.update(bar);
        let vwap = self.vwap.update(bar);
        let obv = self.obv.update(bar);
        let sma_fast = self.sma_fast.update(bar.close);
        let sma_slow = self.sma_slow.update(bar.close);
        let ema_pair = self.ema_pair.update(bar.close);
        let cross = self.cross.update(ema_pair);
        let divergence = self.divergence.update(bar.close, rsi);
        let fibonacci = self.fibonacci.update(bar);
        let obv_trend = self.update_obv_trend(bar.close, obv);
        let average_volume = self.update_volume(bar.volume);
        let atr_percentile = atr.map(|value| self.record_atr(value));

        let macd = match macd? {
            IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } => MacdReading {
                line,
                signal,
                histogram,
            },
            _ => return None,
        };
        let bollinger = match bollinger? {
            IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
                bandwidth,
            } => BollingerReading {
                upper,
                middle,
                lower,
                bandwidth,
            },
            _ => return None,
        };
        let stochastic = match stochastic? {
            IndicatorValue::Stochastic { k, d } => StochasticReading { k, d },
            _ => return None,
        };

        Some(IndicatorSnapshot {
            timestamp: bar.timestamp,
            close: bar.close,
            volume: bar.volume,
            rsi: rsi?,
            macd,
            bollinger,
            stochastic,
            atr: atr?,
            atr_percentile: atr_percentile?,
            vwap: vwap?,
            obv,
            sma_fast,
            sma_slow,
            ema_fast: ema_pair.map(|(f, _)| f),
            ema_slow: ema_pair.map(|(_, s)| s),
            obv_trend,
            average_volume,
            divergence,
            cross,
            fibonacci,
        })
    }

    fn update_obv_trend(&mut self, close: f64, obv: f64) -> Option<ObvTrend> {
        self.obv_window.push_back((close, obv));
        if self.obv_window.len() > self.obv_trend_bars {
            self.obv_window.pop_front();
        }
        if self.obv_window.len() < self.obv_trend_bars {
            return None;
        }
        let (first_close, first_obv) = *self.obv_window.front()?;
        let price_trend = close - first_close;
        let obv_trend = obv - first_obv;
        let trend = if (price_trend > 0.0 && obv_trend > 0.0) || (price_trend < 0.0 && obv_trend < 0.0)
        {
            ObvTrend::Supported
        } else if (price_trend > 0.0 && obv_trend < 0.0) || (price_trend < 0.0 && obv_trend > 0.0)
        {
            ObvTrend::Divergence
        } else {
            ObvTrend::Flat
        };
        Some(trend)
    }

    fn update_volume(&mut self, volume: f64) -> Option<f64> {
        self.volume_window.push_back(volume);
        if self.volume_window.len() > self.volume_average_bars {
            self.volume_window.pop_front();
        }
        if self.volume_window.len() < self.volume_average_bars {
            return None;
        }
        Some(self.volume_window.iter().sum::<f64>() / self.volume_average_bars as f64)
    }

    /// Share of the window at or below `atr`, the new value included.
    fn record_atr(&mut self, atr: f64) -> f64 {
        if self.atr_window.len() == self.atr_percentile_window {
            if let Some(oldest) = self.atr_window.pop_front() {
                let pos = self.atr_sorted.partition_point(|&x| x < oldest);
                self.atr_sorted.remove(pos);
            }
        }
        self.atr_window.push_back(atr);
        let at_or_below = self.atr_sorted.partition_point(|&x| x <= atr);
        self.atr_sorted.insert(at_or_below, atr);
        (at_or_below + 1) as f64 / self.atr_sorted.len() as f64
    }
}
