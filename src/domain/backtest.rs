//! Backtest engine and event loop.
//!
//! Replays a series bar by bar through one `Analyzer`, so the signal at bar t
//! is built from bars 0..=t only. Single long-only position, whole-capital
//! sizing.

use std::ops::ControlFlow;

use chrono::{DateTime, Utc};

use super::analyzer::Analyzer;
use super::error::ConfluenceError;
use super::execution::{self, Entry, ExecutionConfig};
use super::metrics::BacktestMetrics;
use super::ohlcv::PriceSeries;
use super::portfolio::{EquityPoint, Portfolio};
use super::position::{ExitReason, Trade};
use super::signal::{self, build_signal, Signal, SignalConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub risk_free_rate: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
    /// Buy signals below this success probability are not taken.
    pub min_entry_probability: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            risk_free_rate: 0.02,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            min_entry_probability: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ConfluenceError> {
        if !(self.initial_capital > 0.0) {
            return Err(ConfluenceError::invalid_parameter(
                "initial_capital",
                "must be positive",
            ));
        }
        if self.commission_pct < 0.0 || self.slippage_pct < 0.0 {
            return Err(ConfluenceError::invalid_parameter(
                "costs",
                "commission and slippage must be non-negative",
            ));
        }
        if !(0.0..=100.0).contains(&self.min_entry_probability) {
            return Err(ConfluenceError::invalid_parameter(
                "min_entry_probability",
                "must be in [0, 100]",
            ));
        }
        Ok(())
    }

    fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_pct: self.commission_pct,
            slippage_pct: self.slippage_pct,
        }
    }
}

/// Reported to the observer after each processed bar.
#[derive(Debug, Clone, Copy)]
pub struct BarProgress<'a> {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// `None` on warm-up bars.
    pub signal: Option<&'a Signal>,
    pub equity: f64,
}

/// Per-bar callback; `ControlFlow::Break` cancels the run.
pub trait BacktestObserver {
    fn on_bar(&mut self, progress: &BarProgress<'_>) -> ControlFlow<()>;
}

impl<F> BacktestObserver for F
where
    F: FnMut(&BarProgress<'_>) -> ControlFlow<()>,
{
    fn on_bar(&mut self, progress: &BarProgress<'_>) -> ControlFlow<()> {
        self(progress)
    }
}

/// Observer that never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunToEnd;

impl BacktestObserver for RunToEnd {
    fn on_bar(&mut self, _progress: &BarProgress<'_>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
}

pub fn run_backtest(
    series: &PriceSeries,
    signal_config: &SignalConfig,
    config: &BacktestConfig,
    observer: &mut dyn BacktestObserver,
) -> Result<BacktestResult, ConfluenceError> {
    run_backtest_from(series, 0, signal_config, config, observer)
}

/// Bars before `trade_from` only warm the indicators; trading, equity and
/// observer callbacks start at `trade_from`.
pub fn run_backtest_from(
    series: &PriceSeries,
    trade_from: usize,
    signal_config: &SignalConfig,
    config: &BacktestConfig,
    observer: &mut dyn BacktestObserver,
) -> Result<BacktestResult, ConfluenceError> {
    config.validate()?;
    signal_config.validate()?;
    let warmup = signal_config.indicators.warmup();
    if series.len() < warmup {
        return Err(signal::not_ready(&signal_config.indicators, series.len()));
    }
    if trade_from >= series.len() {
        return Err(ConfluenceError::invalid_parameter(
            "backtest window",
            format!("start index {} beyond {} bars", trade_from, series.len()),
        ));
    }

    let execution_config = config.execution();
    let mut analyzer = Analyzer::new(&signal_config.indicators)?;
    let mut portfolio = Portfolio::new(config.initial_capital);
    let bars = series.bars();
    let last_index = bars.len() - 1;

    for (t, bar) in bars.iter().enumerate() {
        let snapshot = analyzer.push(bar);
        if t < trade_from {
            continue;
        }

        let entry_index = portfolio.state.position().map(|p| p.entry_index);
        if entry_index.is_some_and(|entry| t > entry) {
            if let Some((price, reason)) = execution::check_triggers(&portfolio, bar) {
                execution::exit_long(&mut portfolio, t, bar.timestamp, price, reason, &execution_config)?;
            }
        }

        let signal = snapshot.map(|s| build_signal(&s, signal_config));
        if let Some(signal) = &signal {
            if portfolio.is_long() && signal.kind.is_sell() {
                execution::exit_long(
                    &mut portfolio,
                    t,
                    bar.timestamp,
                    bar.close,
                    ExitReason::SellSignal,
                    &execution_config,
                )?;
            } else if !portfolio.is_long()
                && t < last_index
                && signal.kind.is_buy()
                && signal.success_probability >= config.min_entry_probability
            {
                execution::enter_long(
                    &mut portfolio,
                    Entry {
                        index: t,
                        timestamp: bar.timestamp,
                        market_price: bar.close,
                        stop_loss: signal.stop_loss,
                        take_profit: signal.take_profit,
                    },
                    &execution_config,
                )?;
            }
        }

        if t == last_index && portfolio.is_long() {
            execution::exit_long(
                &mut portfolio,
                t,
                bar.timestamp,
                bar.close,
                ExitReason::EndOfData,
                &execution_config,
            )?;
        }

        let equity = portfolio.equity(bar.close);
        portfolio.record_equity(bar.timestamp, equity);

        let progress = BarProgress {
            index: t,
            timestamp: bar.timestamp,
            signal: signal.as_ref(),
            equity,
        };
        if observer.on_bar(&progress).is_break() {
            let processed = t + 1 - trade_from;
            tracing::info!(processed, "backtest cancelled by observer");
            return Err(ConfluenceError::Cancelled { processed });
        }
    }

    let metrics = BacktestMetrics::compute(
        &portfolio.trades,
        &portfolio.equity_curve,
        config.initial_capital,
        series.timeframe(),
        config.risk_free_rate,
    );
    tracing::info!(
        bars = bars.len() - trade_from,
        trades = metrics.total_trades,
        closed_pnl = portfolio.closed_pnl(),
        final_equity = metrics.final_equity,
        "backtest complete"
    );

    Ok(BacktestResult {
        trades: portfolio.trades,
        equity_curve: portfolio.equity_curve,
        metrics,
    })
}
