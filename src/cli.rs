//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::analysis::{self, AnalysisReport, AnalysisRequest, BacktestRequest};
use crate::domain::analyzer::IndicatorConfig;
use crate::domain::backtest::{BacktestConfig, BacktestResult, RunToEnd};
use crate::domain::config_validation::{
    config_datetime, parse_datetime, validate_analysis_config, validate_backtest_config,
};
use crate::domain::confluence::{ConfluenceConfig, Voter};
use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{IndicatorValue, VwapSession};
use crate::domain::ohlcv::Timeframe;
use crate::domain::signal::SignalConfig;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "confluence", about = "Multi-indicator confluence signals and backtests")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate the signal at the latest bar, or at --as-of
    Analyze {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        coin: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Replay the signal over [backtest] start_date..end_date
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        coin: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long)]
        trades_out: Option<PathBuf>,
        #[arg(long)]
        equity_out: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the data range for a coin
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        coin: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
    },
    /// List coins with data at a timeframe
    ListCoins {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        timeframe: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Analyze {
            config,
            coin,
            timeframe,
            as_of,
        } => run_analyze(&config, coin.as_deref(), timeframe.as_deref(), as_of.as_deref()),
        Command::Backtest {
            config,
            coin,
            timeframe,
            trades_out,
            equity_out,
        } => run_backtest(
            &config,
            coin.as_deref(),
            timeframe.as_deref(),
            trades_out.as_deref(),
            equity_out.as_deref(),
        ),
        Command::Validate { config } => run_validate(&config),
        Command::Info {
            config,
            coin,
            timeframe,
        } => run_info(&config, coin.as_deref(), timeframe.as_deref()),
        Command::ListCoins { config, timeframe } => run_list_coins(&config, timeframe.as_deref()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ConfluenceError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

pub fn build_indicator_config(adapter: &dyn ConfigPort) -> Result<IndicatorConfig, ConfluenceError> {
    let defaults = IndicatorConfig::default();
    let period = |key: &str, default: usize| -> Result<usize, ConfluenceError> {
        let value = adapter.get_int("indicators", key, default as i64);
        usize::try_from(value).map_err(|_| ConfluenceError::ConfigInvalid {
            section: "indicators".into(),
            key: key.into(),
            reason: format!("{key} must be non-negative"),
        })
    };

    let bollinger_mult = adapter.get_double(
        "indicators",
        "bollinger_mult",
        f64::from(defaults.bollinger_mult_x100) / 100.0,
    );
    let vwap_session = match adapter.get_string("indicators", "vwap_session") {
        Some(s) => VwapSession::from_str(&s)?,
        None => defaults.vwap_session,
    };

    Ok(IndicatorConfig {
        rsi_period: period("rsi_period", defaults.rsi_period)?,
        macd_fast: period("macd_fast", defaults.macd_fast)?,
        macd_slow: period("macd_slow", defaults.macd_slow)?,
        macd_signal: period("macd_signal", defaults.macd_signal)?,
        bollinger_period: period("bollinger_period", defaults.bollinger_period)?,
        bollinger_mult_x100: (bollinger_mult * 100.0).round().max(0.0) as u32,
        stochastic_k: period("stochastic_k", defaults.stochastic_k)?,
        stochastic_d: period("stochastic_d", defaults.stochastic_d)?,
        atr_period: period("atr_period", defaults.atr_period)?,
        sma_fast: period("sma_fast", defaults.sma_fast)?,
        sma_slow: period("sma_slow", defaults.sma_slow)?,
        ema_fast: period("ema_fast", defaults.ema_fast)?,
        ema_slow: period("ema_slow", defaults.ema_slow)?,
        vwap_session,
        fibonacci_lookback: period("fibonacci_lookback", defaults.fibonacci_lookback)?,
        divergence_lookback: period("divergence_lookback", defaults.divergence_lookback)?,
        obv_trend_bars: period("obv_trend_bars", defaults.obv_trend_bars)?,
        volume_average_bars: period("volume_average_bars", defaults.volume_average_bars)?,
        atr_percentile_window: period("atr_percentile_window", defaults.atr_percentile_window)?,
    })
}

pub fn build_signal_config(adapter: &dyn ConfigPort) -> Result<SignalConfig, ConfluenceError> {
    let d = SignalConfig::default();
    let c = ConfluenceConfig::default();
    let get = |key: &str, default: f64| adapter.get_double("signal", key, default);

    let config = SignalConfig {
        strong_buy_threshold: get("strong_buy", d.strong_buy_threshold),
        buy_threshold: get("buy", d.buy_threshold),
        sell_threshold: get("sell", d.sell_threshold),
        strong_sell_threshold: get("strong_sell", d.strong_sell_threshold),
        magnitude_weight: get("magnitude_weight", d.magnitude_weight),
        agreement_weight: get("agreement_weight", d.agreement_weight),
        cross_multiplier: get("cross_multiplier", d.cross_multiplier),
        divergence_multiplier: get("divergence_multiplier", d.divergence_multiplier),
        counter_trend_multiplier: get("counter_trend_multiplier", d.counter_trend_multiplier),
        high_volatility_multiplier: get("high_volatility_multiplier", d.high_volatility_multiplier),
        low_volatility_multiplier: get("low_volatility_multiplier", d.low_volatility_multiplier),
        high_volatility_percentile: get("high_volatility_percentile", d.high_volatility_percentile),
        low_volatility_percentile: get("low_volatility_percentile", d.low_volatility_percentile),
        stop_atr_multiplier: get("stop_atr_multiplier", d.stop_atr_multiplier),
        target_atr_multiplier: get("target_atr_multiplier", d.target_atr_multiplier),
        stop_floor_ratio: get("stop_floor_ratio", d.stop_floor_ratio),
        low_volume_ratio: get("low_volume_ratio", d.low_volume_ratio),
        low_confluence_threshold: get("low_confluence_threshold", d.low_confluence_threshold),
        indicators: build_indicator_config(adapter)?,
        confluence: ConfluenceConfig {
            rsi_oversold: get("rsi_oversold", c.rsi_oversold),
            rsi_overbought: get("rsi_overbought", c.rsi_overbought),
            stochastic_oversold: get("stochastic_oversold", c.stochastic_oversold),
            stochastic_overbought: get("stochastic_overbought", c.stochastic_overbought),
            vwap_band: get("vwap_band", c.vwap_band),
            trend_band: get("trend_band", c.trend_band),
            cross_weight: get("cross_weight", c.cross_weight),
            divergence_weight: get("divergence_weight", c.divergence_weight),
        },
    };
    config.validate()?;
    Ok(config)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, ConfluenceError> {
    let d = BacktestConfig::default();
    let config = BacktestConfig {
        initial_capital: adapter.get_double("backtest", "initial_capital", d.initial_capital),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", d.risk_free_rate),
        commission_pct: adapter.get_double("backtest", "commission_pct", d.commission_pct),
        slippage_pct: adapter.get_double("backtest", "slippage_pct", d.slippage_pct),
        min_entry_probability: adapter.get_double(
            "backtest",
            "min_entry_probability",
            d.min_entry_probability,
        ),
    };
    config.validate()?;
    Ok(config)
}

/// Coin and timeframe from the command line, falling back to `[analysis]`.
pub fn resolve_target(
    adapter: &dyn ConfigPort,
    coin_override: Option<&str>,
    timeframe_override: Option<&str>,
) -> Result<(String, Timeframe), ConfluenceError> {
    let coin = match coin_override {
        Some(c) => c.trim().to_uppercase(),
        None => adapter
            .get_string("analysis", "coin")
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ConfluenceError::ConfigMissing {
                section: "analysis".into(),
                key: "coin".into(),
            })?,
    };
    Ok((coin, resolve_timeframe(adapter, timeframe_override)?))
}

fn resolve_timeframe(
    adapter: &dyn ConfigPort,
    timeframe_override: Option<&str>,
) -> Result<Timeframe, ConfluenceError> {
    match timeframe_override {
        Some(t) => Timeframe::from_str(t),
        None => {
            let raw = adapter.get_string("analysis", "timeframe").ok_or_else(|| {
                ConfluenceError::ConfigMissing {
                    section: "analysis".into(),
                    key: "timeframe".into(),
                }
            })?;
            Timeframe::from_str(&raw)
        }
    }
}

fn data_adapter(adapter: &dyn ConfigPort) -> Result<CsvAdapter, ConfluenceError> {
    let dir = adapter
        .get_string("data", "dir")
        .ok_or_else(|| ConfluenceError::ConfigMissing {
            section: "data".into(),
            key: "dir".into(),
        })?;
    Ok(CsvAdapter::new(PathBuf::from(dir)))
}

fn run_analyze(
    config_path: &Path,
    coin: Option<&str>,
    timeframe: Option<&str>,
    as_of: Option<&str>,
) -> Result<(), ConfluenceError> {
    let adapter = load_config(config_path)?;
    validate_analysis_config(&adapter)?;
    let signal_config = build_signal_config(&adapter)?;
    let (coin, timeframe) = resolve_target(&adapter, coin, timeframe)?;
    let as_of = as_of
        .map(|s| {
            parse_datetime(s, true).ok_or_else(|| {
                ConfluenceError::invalid_parameter("as_of", format!("cannot parse '{s}'"))
            })
        })
        .transpose()?;

    let data_port = data_adapter(&adapter)?;
    let request = AnalysisRequest {
        coin,
        timeframe,
        as_of,
    };
    let report = analysis::analyze(&request, &data_port, &signal_config)?;
    print_analysis(&report);
    Ok(())
}

fn print_analysis(report: &AnalysisReport) {
    let signal = &report.signal;
    println!(
        "{} {} @ {} ({} bars)",
        report.coin, report.timeframe, signal.timestamp, report.bars
    );
    println!("Close:            {:.4}", signal.close);
    println!("Signal:           {}", signal.kind);
    println!("Probability:      {:.1}%", signal.success_probability);
    println!(
        "Confluence:       {:+.3} ({} bullish, {} bearish, {} neutral)",
        signal.confluence.score,
        signal.confluence.bullish_count,
        signal.confluence.bearish_count,
        signal.confluence.neutral_count
    );
    if let (Some(stop), Some(target)) = (signal.stop_loss, signal.take_profit) {
        println!("Stop loss:        {:.4}", stop);
        println!("Take profit:      {:.4}", target);
    }
    if signal.trend_override {
        println!("Trend filter overrode a buy signal");
    }
    if let Some(cross) = signal.cross {
        println!("Cross:            {}", cross);
    }
    if let Some(divergence) = signal.divergence {
        println!("RSI divergence:   {}", divergence);
    }

    println!("\nIndicators:");
    for reading in &report.readings {
        let label = reading
            .label
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {:<28} {:<40} {}", reading.kind.to_string(), format_value(&reading.value), label);
    }

    let join = |levels: &[f64]| {
        levels
            .iter()
            .map(|l| format!("{:.4}", l))
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!("\nSupport:          {}", join(&report.support));
    println!("Resistance:       {}", join(&report.resistance));
    for pattern in &report.patterns {
        println!(
            "Pattern:          {} ({:.0}% confidence)",
            pattern,
            pattern.confidence() * 100.0
        );
    }

    let names = |voters: &[Voter]| {
        voters.iter().map(|v| v.name()).collect::<Vec<_>>().join(", ")
    };
    println!("\nSupporting:       {}", names(&signal.supporting_indicators));
    println!("Conflicting:      {}", names(&signal.conflicting_indicators));
    for risk in &signal.risk_factors {
        println!("Risk:             {}", risk);
    }
}

fn format_value(value: &IndicatorValue) -> String {
    match value {
        IndicatorValue::Simple(v) => format!("{:.4}", v),
        IndicatorValue::Macd {
            line,
            signal,
            histogram,
        } => format!("line {:.4} signal {:.4} hist {:.4}", line, signal, histogram),
        IndicatorValue::Stochastic { k, d } => format!("%K {:.2} %D {:.2}", k, d),
        IndicatorValue::Bollinger {
            upper,
            middle,
            lower,
            ..
        } => format!("{:.4} / {:.4} / {:.4}", upper, middle, lower),
        IndicatorValue::EmaPair { fast, slow, spread } => {
            format!("fast {:.4} slow {:.4} ({:+.4})", fast, slow, spread)
        }
        IndicatorValue::Fibonacci(levels) => levels
            .as_array()
            .iter()
            .map(|(name, level)| format!("{name} {level:.2}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn run_backtest(
    config_path: &Path,
    coin: Option<&str>,
    timeframe: Option<&str>,
    trades_out: Option<&Path>,
    equity_out: Option<&Path>,
) -> Result<(), ConfluenceError> {
    // Stage 1: Load and validate config
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;

    // Stage 2: Build engine configs
    let signal_config = build_signal_config(&adapter)?;
    let bt_config = build_backtest_config(&adapter)?;
    let (coin, timeframe) = resolve_target(&adapter, coin, timeframe)?;
    let request = BacktestRequest {
        coin,
        timeframe,
        start_date: config_datetime(&adapter, "backtest", "start_date", false)?,
        end_date: config_datetime(&adapter, "backtest", "end_date", true)?,
        initial_capital: bt_config.initial_capital,
    };

    // Stage 3: Replay
    let data_port = data_adapter(&adapter)?;
    eprintln!(
        "Running backtest: {} {}, {} to {}",
        request.coin, request.timeframe, request.start_date, request.end_date
    );
    let result = analysis::run_backtest_request(
        &request,
        &data_port,
        &signal_config,
        &bt_config,
        &mut RunToEnd,
    )?;

    // Stage 4: Summary and reports
    print_backtest_summary(&result, request.initial_capital);
    let reporter = CsvReportAdapter::new();
    if let Some(path) = trades_out {
        reporter.write_trades(&result, &path.to_string_lossy())?;
        eprintln!("Trade log written to: {}", path.display());
    }
    if let Some(path) = equity_out {
        reporter.write_equity(&result, &path.to_string_lossy())?;
        eprintln!("Equity curve written to: {}", path.display());
    }
    Ok(())
}

fn print_backtest_summary(result: &BacktestResult, initial_capital: f64) {
    let m = &result.metrics;
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Initial Capital:  {:.2}", initial_capital);
    eprintln!("Final Equity:     {:.2}", m.final_equity);
    eprintln!(
        "Total P&L:        {:.2} ({:.2}%)",
        m.total_profit_loss, m.total_profit_loss_pct
    );
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown_pct);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    match m.profit_factor {
        Some(pf) => eprintln!("Profit Factor:    {:.2}", pf),
        None => eprintln!("Profit Factor:    n/a (no losing trades)"),
    }
    eprintln!("Avg Duration:     {:.1} bars", m.average_trade_duration_bars);
}

fn run_validate(config_path: &Path) -> Result<(), ConfluenceError> {
    let adapter = load_config(config_path)?;
    validate_analysis_config(&adapter)?;
    let signal_config = build_signal_config(&adapter)?;
    eprintln!(
        "Indicators valid: warm-up {} bars ({} for all readings)",
        signal_config.indicators.warmup(),
        signal_config.indicators.full_warmup()
    );

    let has_backtest = adapter.has_key("backtest", "start_date")
        || adapter.has_key("backtest", "end_date");
    if has_backtest {
        validate_backtest_config(&adapter)?;
        build_backtest_config(&adapter)?;
        eprintln!("Backtest section valid");
    }

    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn run_info(
    config_path: &Path,
    coin: Option<&str>,
    timeframe: Option<&str>,
) -> Result<(), ConfluenceError> {
    let adapter = load_config(config_path)?;
    let (coin, timeframe) = resolve_target(&adapter, coin, timeframe)?;
    let data_port = data_adapter(&adapter)?;

    match data_port.get_data_range(&coin, timeframe)? {
        Some((first, last, count)) => {
            println!("{} {}: {} bars, {} to {}", coin, timeframe, count, first, last);
            Ok(())
        }
        None => Err(ConfluenceError::NoData {
            coin,
            timeframe: timeframe.to_string(),
        }),
    }
}

fn run_list_coins(config_path: &Path, timeframe: Option<&str>) -> Result<(), ConfluenceError> {
    let adapter = load_config(config_path)?;
    let timeframe = resolve_timeframe(&adapter, timeframe)?;
    let data_port = data_adapter(&adapter)?;

    let coins = data_port.list_coins(timeframe)?;
    if coins.is_empty() {
        eprintln!("No coins found for {}", timeframe);
    } else {
        for coin in &coins {
            println!("{}", coin);
        }
        eprintln!("{} coins found", coins.len());
    }
    Ok(())
}
