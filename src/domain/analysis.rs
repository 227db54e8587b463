//! Request-level entry points: one-shot analysis and windowed backtests
//! against a `DataPort`.

use chrono::{DateTime, Utc};

use super::analyzer::{IndicatorConfig, IndicatorSnapshot};
use super::backtest::{run_backtest_from, BacktestConfig, BacktestObserver, BacktestResult};
use super::confluence::{Vote, Voter};
use super::error::ConfluenceError;
use super::indicator::{IndicatorKind, IndicatorValue};
use super::ohlcv::Timeframe;
use super::patterns::{detect_chart_patterns, find_support_resistance, ChartPattern};
use super::signal::{Signal, SignalConfig, SignalGenerator};
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub coin: String,
    pub timeframe: Timeframe,
    /// Evaluate at the last bar at or before this instant; latest bar if `None`.
    pub as_of: Option<DateTime<Utc>>,
}

/// One indicator value at the evaluated bar, with the vote it cast.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndicatorReading {
    pub kind: IndicatorKind,
    pub timestamp: DateTime<Utc>,
    pub value: IndicatorValue,
    /// `None` for readings that do not vote (ATR, Fibonacci).
    pub label: Option<Vote>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalysisReport {
    pub coin: String,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub signal: Signal,
    pub readings: Vec<IndicatorReading>,
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
    pub patterns: Vec<ChartPattern>,
}

pub fn analyze(
    request: &AnalysisRequest,
    provider: &dyn DataPort,
    config: &SignalConfig,
) -> Result<AnalysisReport, ConfluenceError> {
    let generator = SignalGenerator::new(config.clone())?;
    let series = provider.fetch_series(&request.coin, request.timeframe, None, request.as_of)?;
    let (snapshot, signal) = generator.evaluate(&series)?;
    let levels = find_support_resistance(series.bars());
    let patterns = detect_chart_patterns(series.bars());

    tracing::info!(
        coin = %request.coin,
        timeframe = %request.timeframe,
        timestamp = %signal.timestamp,
        kind = %signal.kind,
        probability = signal.success_probability,
        "analysis complete"
    );

    Ok(AnalysisReport {
        coin: request.coin.clone(),
        timeframe: request.timeframe,
        bars: series.len(),
        readings: collect_readings(&snapshot, &signal, &config.indicators),
        signal,
        support: levels.support,
        resistance: levels.resistance,
        patterns,
    })
}

/// Readings in display order; optional indicators still warming are skipped.
pub fn collect_readings(
    snapshot: &IndicatorSnapshot,
    signal: &Signal,
    config: &IndicatorConfig,
) -> Vec<IndicatorReading> {
    let vote = |voter| signal.confluence.vote_of(voter);
    let reading = |kind, value, label| IndicatorReading {
        kind,
        timestamp: snapshot.timestamp,
        value,
        label,
    };

    let mut readings = vec![
        reading(
            IndicatorKind::Rsi(config.rsi_period),
            IndicatorValue::Simple(snapshot.rsi),
            vote(Voter::Rsi),
        ),
        reading(
            IndicatorKind::Macd {
                fast: config.macd_fast,
                slow: config.macd_slow,
                signal: config.macd_signal,
            },
            IndicatorValue::Macd {
                line: snapshot.macd.line,
                signal: snapshot.macd.signal,
                histogram: snapshot.macd.histogram,
            },
            vote(Voter::Macd),
        ),
        reading(
            IndicatorKind::Bollinger {
                period: config.bollinger_period,
                stddev_mult_x100: config.bollinger_mult_x100,
            },
            IndicatorValue::Bollinger {
                upper: snapshot.bollinger.upper,
                middle: snapshot.bollinger.middle,
                lower: snapshot.bollinger.lower,
                bandwidth: snapshot.bollinger.bandwidth,
            },
            vote(Voter::Bollinger),
        ),
        reading(
            IndicatorKind::Stochastic {
                k_period: config.stochastic_k,
                d_period: config.stochastic_d,
            },
            IndicatorValue::Stochastic {
                k: snapshot.stochastic.k,
                d: snapshot.stochastic.d,
            },
            vote(Voter::Stochastic),
        ),
        reading(
            IndicatorKind::Atr(config.atr_period),
            IndicatorValue::Simple(snapshot.atr),
            None,
        ),
        reading(
            IndicatorKind::Vwap(config.vwap_session),
            IndicatorValue::Simple(snapshot.vwap),
            vote(Voter::Vwap),
        ),
        reading(
            IndicatorKind::Obv,
            IndicatorValue::Simple(snapshot.obv),
            vote(Voter::Obv),
        ),
    ];

    if let Some(sma) = snapshot.sma_fast {
        readings.push(reading(
            IndicatorKind::Sma(config.sma_fast),
            IndicatorValue::Simple(sma),
            vote(Voter::MovingAverages),
        ));
    }
    if let Some(sma) = snapshot.sma_slow {
        readings.push(reading(
            IndicatorKind::Sma(config.sma_slow),
            IndicatorValue::Simple(sma),
            vote(Voter::MovingAverages),
        ));
    }
    if let (Some(fast), Some(slow)) = (snapshot.ema_fast, snapshot.ema_slow) {
        readings.push(reading(
            IndicatorKind::EmaPair {
                fast: config.ema_fast,
                slow: config.ema_slow,
            },
            IndicatorValue::EmaPair {
                fast,
                slow,
                spread: fast - slow,
            },
            vote(Voter::TrendFilter),
        ));
    }
    if let Some(levels) = snapshot.fibonacci {
        readings.push(reading(
            IndicatorKind::Fibonacci {
                lookback: config.fibonacci_lookback,
            },
            IndicatorValue::Fibonacci(levels),
            None,
        ));
    }
    readings
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRequest {
    pub coin: String,
    pub timeframe: Timeframe,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
}

/// Backtest over `[start_date, end_date]`. Bars from a warm-up lookback
/// ahead of the window feed the indicators but are never traded.
pub fn run_backtest_request(
    request: &BacktestRequest,
    provider: &dyn DataPort,
    signal_config: &SignalConfig,
    backtest_config: &BacktestConfig,
    observer: &mut dyn BacktestObserver,
) -> Result<BacktestResult, ConfluenceError> {
    if request.start_date >= request.end_date {
        return Err(ConfluenceError::invalid_parameter(
            "backtest window",
            format!(
                "start {} is not before end {}",
                request.start_date, request.end_date
            ),
        ));
    }

    let lookback = signal_config.indicators.full_warmup();
    let warm_start = i32::try_from(lookback)
        .ok()
        .and_then(|bars| request.timeframe.step().checked_mul(bars))
        .and_then(|span| request.start_date.checked_sub_signed(span))
        .ok_or_else(|| {
            ConfluenceError::invalid_parameter(
                "backtest window",
                format!("warm-up of {} bars reaches before the epoch range", lookback),
            )
        })?;

    let series = provider.fetch_series(
        &request.coin,
        request.timeframe,
        Some(warm_start),
        Some(request.end_date),
    )?;
    let trade_from = series
        .bars()
        .partition_point(|b| b.timestamp < request.start_date);
    if trade_from == series.len() {
        return Err(ConfluenceError::NoData {
            coin: request.coin.clone(),
            timeframe: request.timeframe.to_string(),
        });
    }
    if trade_from < lookback {
        tracing::warn!(
            coin = %request.coin,
            available = trade_from,
            wanted = lookback,
            "short warm-up before backtest window"
        );
    }

    let config = BacktestConfig {
        initial_capital: request.initial_capital,
        ..backtest_config.clone()
    };
    run_backtest_from(&series, trade_from, signal_config, &config, observer)
}
