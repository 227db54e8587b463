//! End-to-end tests for the signal pipeline and the backtest engine.
//!
//! Tests cover:
//! - Causality: backtest signals equal one-shot signals over the prefix
//! - Determinism of repeated replays
//! - Monotonic series behavior (RSI saturation, no losing trades)
//! - Engineered EMA crosses flagged on the exact bar
//! - Warm-up boundaries
//! - Request-level analysis and backtests through a DataPort

mod common;

use common::*;
use confluence::domain::analysis::{analyze, run_backtest_request, AnalysisRequest, BacktestRequest};
use confluence::domain::analyzer::{Analyzer, IndicatorConfig};
use confluence::domain::backtest::{
    run_backtest, BacktestConfig, BacktestResult, BarProgress, RunToEnd,
};
use confluence::domain::confluence::Voter;
use confluence::domain::error::ConfluenceError;
use confluence::domain::indicator::{calculate_rsi, IndicatorValue};
use confluence::domain::metrics::BacktestMetrics;
use confluence::domain::patterns::{detect_crosses, Cross};
use confluence::domain::portfolio::EquityPoint;
use confluence::domain::position::{ExitReason, Trade};
use confluence::domain::signal::{Signal, SignalConfig, SignalGenerator};
use std::ops::ControlFlow;

fn backtest(series: &PriceSeries) -> BacktestResult {
    run_backtest(
        series,
        &SignalConfig::default(),
        &BacktestConfig::default(),
        &mut RunToEnd,
    )
    .unwrap()
}

mod causality {
    use super::*;

    #[test]
    fn backtest_signals_match_prefix_generation() {
        let series = wave_series(300);
        let mut seen: Vec<(usize, Signal)> = Vec::new();
        let mut observer = |p: &BarProgress<'_>| {
            if let Some(signal) = p.signal {
                seen.push((p.index, signal.clone()));
            }
            ControlFlow::Continue(())
        };
        run_backtest(
            &series,
            &SignalConfig::default(),
            &BacktestConfig::default(),
            &mut observer,
        )
        .unwrap();

        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        assert_eq!(seen.len(), 300 - 33);
        for (t, signal) in &seen {
            let prefix = series.prefix(t + 1).unwrap();
            assert_eq!(&generator.generate(&prefix).unwrap(), signal, "bar {t}");
        }
    }

    #[test]
    fn appending_bars_does_not_change_past_signals() {
        let long = wave_series(260);
        let short = long.prefix(200).unwrap();
        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        let at = generator.generate_at(&long, ts(199)).unwrap();
        assert_eq!(at, generator.generate(&short).unwrap());
    }
}

mod determinism {
    use super::*;

    #[test]
    fn repeated_replays_are_identical() {
        let series = wave_series(400);
        let first = backtest(&series);
        let second = backtest(&series);
        assert_eq!(first, second);
    }

    #[test]
    fn repeated_generation_is_identical() {
        let series = wave_series(250);
        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        assert_eq!(
            generator.generate(&series).unwrap(),
            generator.generate(&series).unwrap()
        );
    }
}

mod position_lifecycle {
    use super::*;

    #[test]
    fn trades_never_overlap_and_equity_reconciles() {
        let series = wave_series(500);
        let result = backtest(&series);

        for pair in result.trades.windows(2) {
            assert!(pair[0].exit_timestamp <= pair[1].entry_timestamp);
        }
        for trade in &result.trades {
            assert!(trade.exit_timestamp > trade.entry_timestamp);
        }
        let closed: f64 = result.trades.iter().map(|t| t.pnl).sum();
        let final_equity = result.equity_curve.last().unwrap().equity;
        approx::assert_relative_eq!(final_equity, 10_000.0 + closed, epsilon = 1e-6);
        approx::assert_relative_eq!(result.metrics.final_equity, final_equity, epsilon = 1e-9);
    }

    #[test]
    fn open_position_force_closed_on_last_bar() {
        let series = wave_series(500);
        let result = backtest(&series);
        let last = series.last().timestamp;
        let forced: Vec<&Trade> = result.trades.iter().filter(|t| t.is_force_closed()).collect();
        assert!(forced.len() <= 1);
        if let Some(trade) = forced.first() {
            assert_eq!(trade.exit_timestamp, last);
            assert_eq!(trade.exit_reason, ExitReason::EndOfData);
        }
    }

    #[test]
    fn costs_reduce_final_equity() {
        let series = wave_series(500);
        let frictionless = backtest(&series);
        let costly = run_backtest(
            &series,
            &SignalConfig::default(),
            &BacktestConfig {
                commission_pct: 0.2,
                slippage_pct: 0.1,
                ..BacktestConfig::default()
            },
            &mut RunToEnd,
        )
        .unwrap();
        if !frictionless.trades.is_empty() && frictionless.trades.len() == costly.trades.len() {
            assert!(costly.metrics.final_equity < frictionless.metrics.final_equity);
        }
    }

    #[test]
    fn observer_can_cancel() {
        let series = wave_series(200);
        let mut calls = 0;
        let mut observer = |_: &BarProgress<'_>| {
            calls += 1;
            if calls == 10 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let err = run_backtest(
            &series,
            &SignalConfig::default(),
            &BacktestConfig::default(),
            &mut observer,
        )
        .unwrap_err();
        assert!(matches!(err, ConfluenceError::Cancelled { processed: 10 }));
    }
}

mod monotonic_series {
    use super::*;

    #[test]
    fn rsi_saturates_at_100() {
        let series = series_from_closes(&rising_closes(300));
        let rsi = calculate_rsi(series.bars(), 14).unwrap();
        for point in &rsi.values {
            if let Some(value) = point.simple() {
                assert!(value <= 100.0);
                assert!((value - 100.0).abs() < 1e-9);
            }
        }
        assert_eq!(rsi.valid_count(), 300 - 14);
    }

    #[test]
    fn rising_series_has_no_losing_trades() {
        let series = series_from_closes(&rising_closes(300));
        let result = backtest(&series);
        assert_eq!(result.metrics.losing_trades, 0);
        assert!(result.trades.iter().all(|t| t.pnl > 0.0));
        assert!(result.trades.iter().all(|t| t.exit_reason != ExitReason::StopLoss));
    }
}

mod engineered_crosses {
    use super::*;

    /// Flat at 100, then a step to 110 at `jump`.
    fn step_closes(n: usize, jump: usize) -> Vec<f64> {
        (0..n).map(|i| if i < jump { 100.0 } else { 110.0 }).collect()
    }

    #[test]
    fn golden_cross_on_exact_bar() {
        let bars = bars_from_closes(&step_closes(160, 120));
        let crosses = detect_crosses(&bars, 20, 100).unwrap();
        for (i, cross) in crosses.iter().enumerate() {
            if i == 120 {
                assert_eq!(*cross, Some(Cross::Golden));
            } else {
                assert_eq!(*cross, None, "unexpected cross at bar {i}");
            }
        }
    }

    #[test]
    fn death_cross_on_exact_bar() {
        let closes: Vec<f64> = (0..160).map(|i| if i < 120 { 100.0 } else { 90.0 }).collect();
        let crosses = detect_crosses(&bars_from_closes(&closes), 20, 100).unwrap();
        let flagged: Vec<usize> = crosses
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|_| i))
            .collect();
        assert_eq!(flagged, vec![120]);
        assert_eq!(crosses[120], Some(Cross::Death));
    }

    #[test]
    fn default_pair_cross_reaches_the_signal() {
        let series = series_from_closes(&step_closes(280, 250));
        let mut analyzer = Analyzer::new(&IndicatorConfig::default()).unwrap();
        let mut crosses = Vec::new();
        for (i, bar) in series.bars().iter().enumerate() {
            if let Some(snapshot) = analyzer.push(bar) {
                if snapshot.cross.is_some() {
                    crosses.push((i, snapshot.cross));
                }
            }
        }
        assert_eq!(crosses, vec![(250, Some(Cross::Golden))]);

        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        let signal = generator.generate(&series.prefix(251).unwrap()).unwrap();
        assert_eq!(signal.cross, Some(Cross::Golden));
        assert!(signal.confluence.vote_of(Voter::Cross).is_some());

        let after = generator.generate(&series.prefix(252).unwrap()).unwrap();
        assert_eq!(after.cross, None);
        assert!(after.confluence.vote_of(Voter::Cross).is_none());
    }
}

mod warmup_boundary {
    use super::*;

    #[test]
    fn rsi_exact_length_has_one_reading() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + (i % 3) as f64).collect();
        let rsi = calculate_rsi(&bars_from_closes(&closes), 14).unwrap();
        assert_eq!(rsi.valid_count(), 1);
        assert!(rsi.values.last().unwrap().is_valid());

        let err = calculate_rsi(&bars_from_closes(&closes[..14]), 14).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn signal_at_exact_warmup() {
        let warmup = IndicatorConfig::default().warmup();
        assert_eq!(warmup, 34);
        let series = wave_series(warmup);
        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        let signal = generator.generate(&series).unwrap();
        assert_eq!(signal.timestamp, ts(warmup - 1));

        let short = series.prefix(warmup - 1).unwrap();
        match generator.generate(&short).unwrap_err() {
            ConfluenceError::InsufficientData {
                indicator,
                bars,
                minimum,
            } => {
                assert!(indicator.starts_with("MACD"));
                assert_eq!(bars, warmup - 1);
                assert_eq!(minimum, warmup);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn backtest_at_exact_warmup_sees_one_signal() {
        let series = wave_series(34);
        let mut signals = 0;
        let mut observer = |p: &BarProgress<'_>| {
            if p.signal.is_some() {
                signals += 1;
            }
            ControlFlow::Continue(())
        };
        let result = run_backtest(
            &series,
            &SignalConfig::default(),
            &BacktestConfig::default(),
            &mut observer,
        )
        .unwrap();
        assert_eq!(signals, 1);
        assert_eq!(result.equity_curve.len(), 34);
        // The only signal is on the final bar, where no position is opened.
        assert!(result.trades.is_empty());
    }
}

mod metrics_edge_cases {
    use super::*;

    #[test]
    fn profit_factor_without_losses_is_none() {
        let trade = Trade {
            entry_timestamp: ts(0),
            exit_timestamp: ts(5),
            entry_price: 100.0,
            exit_price: 105.0,
            quantity: 100.0,
            pnl: 500.0,
            pnl_pct: 5.0,
            exit_reason: ExitReason::TakeProfit,
            bars_held: 5,
        };
        let curve = vec![
            EquityPoint { timestamp: ts(0), equity: 10_000.0 },
            EquityPoint { timestamp: ts(5), equity: 10_500.0 },
        ];
        let metrics = BacktestMetrics::compute(&[trade], &curve, 10_000.0, Timeframe::H1, 0.02);
        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.winning_trades, 1);
        assert!((metrics.win_rate - 1.0).abs() < f64::EPSILON);
        assert!((metrics.total_profit_loss - 500.0).abs() < 1e-9);
    }

    #[test]
    fn flat_market_has_no_drawdown() {
        let series = series_from_closes(&vec![100.0; 120]);
        let result = backtest(&series);
        assert!(result.metrics.max_drawdown.abs() < 1e-9);
    }
}

mod pipeline_through_port {
    use super::*;

    fn port() -> MockDataPort {
        MockDataPort::new().with_bars("BTC", Timeframe::H1, wave_bars(400, 15.0, 60.0, 0.02))
    }

    #[test]
    fn analyze_reports_signal_and_levels() {
        let request = AnalysisRequest {
            coin: "BTC".into(),
            timeframe: Timeframe::H1,
            as_of: None,
        };
        let report = analyze(&request, &port(), &SignalConfig::default()).unwrap();
        assert_eq!(report.bars, 400);
        assert_eq!(report.signal.timestamp, ts(399));
        let close = report.signal.close;
        assert!(report.support.iter().all(|&s| s < close));
        assert!(report.resistance.iter().all(|&r| r > close));
        assert!(report.readings.iter().any(|r| matches!(r.value, IndicatorValue::Macd { .. })));
    }

    #[test]
    fn analyze_as_of_uses_only_earlier_bars() {
        let request = AnalysisRequest {
            coin: "BTC".into(),
            timeframe: Timeframe::H1,
            as_of: Some(ts(150)),
        };
        let report = analyze(&request, &port(), &SignalConfig::default()).unwrap();
        let direct = SignalGenerator::new(SignalConfig::default())
            .unwrap()
            .generate(&PriceSeries::new(Timeframe::H1, wave_bars(151, 15.0, 60.0, 0.02)).unwrap())
            .unwrap();
        assert_eq!(report.signal, direct);
    }

    #[test]
    fn missing_coin_is_no_data() {
        let request = AnalysisRequest {
            coin: "DOGE".into(),
            timeframe: Timeframe::H1,
            as_of: None,
        };
        let err = analyze(&request, &port(), &SignalConfig::default()).unwrap_err();
        assert!(matches!(err, ConfluenceError::NoData { .. }));
    }

    #[test]
    fn provider_errors_propagate() {
        let port = port().with_error("BTC", "connection refused");
        let request = AnalysisRequest {
            coin: "BTC".into(),
            timeframe: Timeframe::H1,
            as_of: None,
        };
        let err = analyze(&request, &port, &SignalConfig::default()).unwrap_err();
        assert!(matches!(err, ConfluenceError::DataSource { .. }));
    }

    #[test]
    fn windowed_backtest_warms_up_before_start() {
        let request = BacktestRequest {
            coin: "BTC".into(),
            timeframe: Timeframe::H1,
            start_date: ts(250),
            end_date: ts(399),
            initial_capital: 20_000.0,
        };
        let mut first_signal_index = None;
        let mut observer = |p: &BarProgress<'_>| {
            if first_signal_index.is_none() && p.signal.is_some() {
                first_signal_index = Some(p.index);
            }
            ControlFlow::Continue(())
        };
        let result = run_backtest_request(
            &request,
            &port(),
            &SignalConfig::default(),
            &BacktestConfig::default(),
            &mut observer,
        )
        .unwrap();

        // warm-up lookback of 200 bars puts the window start at index 200
        assert_eq!(first_signal_index, Some(200));
        assert_eq!(result.equity_curve.len(), 150);
        approx::assert_relative_eq!(result.equity_curve[0].equity, 20_000.0, epsilon = 1e-6);
    }
}
