//! Configuration validation.
//!
//! Validates all config fields before a run. Missing optional keys fall back
//! to defaults; present keys must parse and be in range.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::VwapSession;
use crate::domain::ohlcv::Timeframe;
use crate::domain::patterns::MIN_DIVERGENCE_BARS;
use crate::ports::config_port::ConfigPort;

pub fn validate_analysis_config(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    require_string(config, "data", "dir")?;
    require_string(config, "analysis", "coin")?;
    let timeframe = require_string(config, "analysis", "timeframe")?;
    Timeframe::from_str(&timeframe).map_err(|_| invalid("analysis", "timeframe", "unknown timeframe"))?;
    validate_indicator_config(config)?;
    validate_signal_config(config)?;
    Ok(())
}

pub fn validate_indicator_config(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    const PERIODS: [&str; 15] = [
        "rsi_period",
        "macd_fast",
        "macd_slow",
        "macd_signal",
        "bollinger_period",
        "stochastic_k",
        "stochastic_d",
        "atr_period",
        "sma_fast",
        "sma_slow",
        "ema_fast",
        "ema_slow",
        "fibonacci_lookback",
        "divergence_lookback",
        "atr_percentile_window",
    ];
    for key in PERIODS {
        if let Some(value) = optional_int(config, "indicators", key)? {
            if value < 1 {
                return Err(invalid("indicators", key, "period must be at least 1"));
            }
        }
    }

    let pair_ordered = |fast: &str, slow: &str, default_fast: i64, default_slow: i64| {
        config.get_int("indicators", fast, default_fast) < config.get_int("indicators", slow, default_slow)
    };
    if !pair_ordered("macd_fast", "macd_slow", 12, 26) {
        return Err(invalid("indicators", "macd_fast", "macd_fast must be below macd_slow"));
    }
    if !pair_ordered("ema_fast", "ema_slow", 50, 200) {
        return Err(invalid("indicators", "ema_fast", "ema_fast must be below ema_slow"));
    }
    if !pair_ordered("sma_fast", "sma_slow", 50, 200) {
        return Err(invalid("indicators", "sma_fast", "sma_fast must be below sma_slow"));
    }

    if let Some(lookback) = optional_int(config, "indicators", "divergence_lookback")? {
        if lookback < MIN_DIVERGENCE_BARS as i64 {
            return Err(invalid(
                "indicators",
                "divergence_lookback",
                &format!("divergence_lookback must be at least {}", MIN_DIVERGENCE_BARS),
            ));
        }
    }

    if let Some(mult) = optional_double(config, "indicators", "bollinger_mult")? {
        if mult <= 0.0 {
            return Err(invalid("indicators", "bollinger_mult", "bollinger_mult must be positive"));
        }
    }

    if let Some(session) = config.get_string("indicators", "vwap_session") {
        VwapSession::from_str(&session).map_err(|_| {
            invalid(
                "indicators",
                "vwap_session",
                "expected daily, weekly or never",
            )
        })?;
    }
    Ok(())
}

pub fn validate_signal_config(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    const KEYS: [&str; 22] = [
        "strong_buy",
        "buy",
        "sell",
        "strong_sell",
        "rsi_oversold",
        "rsi_overbought",
        "stochastic_oversold",
        "stochastic_overbought",
        "vwap_band",
        "trend_band",
        "cross_weight",
        "divergence_weight",
        "magnitude_weight",
        "agreement_weight",
        "cross_multiplier",
        "divergence_multiplier",
        "counter_trend_multiplier",
        "high_volatility_multiplier",
        "low_volatility_multiplier",
        "stop_atr_multiplier",
        "target_atr_multiplier",
        "low_volume_ratio",
    ];
    for key in KEYS {
        optional_double(config, "signal", key)?;
    }

    let get = |key: &str, default: f64| config.get_double("signal", key, default);

    let (strong_buy, buy, sell, strong_sell) = (
        get("strong_buy", 0.6),
        get("buy", 0.2),
        get("sell", -0.2),
        get("strong_sell", -0.6),
    );
    if !(-1.0 <= strong_sell && strong_sell <= sell && sell < 0.0 && 0.0 < buy && buy <= strong_buy && strong_buy <= 1.0) {
        return Err(invalid(
            "signal",
            "buy",
            "thresholds must satisfy -1 <= strong_sell <= sell < 0 < buy <= strong_buy <= 1",
        ));
    }

    for (low, high) in [
        ("rsi_oversold", "rsi_overbought"),
        ("stochastic_oversold", "stochastic_overbought"),
    ] {
        let (lo, hi) = (get(low, 0.0), get(high, 100.0));
        if !(0.0..=100.0).contains(&lo) || !(0.0..=100.0).contains(&hi) || lo >= hi {
            return Err(invalid("signal", low, &format!("{low} must be below {high}, both in [0, 100]")));
        }
    }

    for key in ["vwap_band", "trend_band", "low_volume_ratio"] {
        if get(key, 0.0) < 0.0 {
            return Err(invalid("signal", key, &format!("{key} must be non-negative")));
        }
    }

    for key in ["cross_weight", "divergence_weight", "stop_atr_multiplier"] {
        if get(key, 1.0) <= 0.0 {
            return Err(invalid("signal", key, &format!("{key} must be positive")));
        }
    }
    if get("target_atr_multiplier", 3.0) <= get("stop_atr_multiplier", 2.0) {
        return Err(invalid(
            "signal",
            "target_atr_multiplier",
            "target_atr_multiplier must exceed stop_atr_multiplier",
        ));
    }

    let (magnitude, agreement) = (get("magnitude_weight", 0.5), get("agreement_weight", 0.5));
    if magnitude < 0.0 || agreement < 0.0 || magnitude + agreement > 1.0 + 1e-9 {
        return Err(invalid(
            "signal",
            "magnitude_weight",
            "probability weights must be non-negative and sum to at most 1",
        ));
    }
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    validate_analysis_config(config)?;
    validate_initial_capital(config)?;
    validate_costs(config)?;
    validate_risk_free_rate(config)?;
    validate_min_entry_probability(config)?;
    validate_dates(config)?;
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    let value = optional_double(config, "backtest", "initial_capital")?.unwrap_or(10_000.0);
    if value <= 0.0 {
        return Err(invalid("backtest", "initial_capital", "initial_capital must be positive"));
    }
    Ok(())
}

fn validate_costs(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    for key in ["commission_pct", "slippage_pct"] {
        if optional_double(config, "backtest", key)?.unwrap_or(0.0) < 0.0 {
            return Err(invalid("backtest", key, &format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    let value = optional_double(config, "backtest", "risk_free_rate")?.unwrap_or(0.02);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_min_entry_probability(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    let value = optional_double(config, "backtest", "min_entry_probability")?.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "min_entry_probability",
            "min_entry_probability must be between 0 and 100",
        ));
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), ConfluenceError> {
    let start = config_datetime(config, "backtest", "start_date", false)?;
    let end = config_datetime(config, "backtest", "end_date", true)?;
    if start >= end {
        return Err(invalid("backtest", "start_date", "start_date must be before end_date"));
    }
    Ok(())
}

/// Reads a required date key. `end_of_day` maps a bare date to its last
/// second so the whole day is included.
pub fn config_datetime(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    end_of_day: bool,
) -> Result<DateTime<Utc>, ConfluenceError> {
    let value = require_string(config, section, key)?;
    parse_datetime(&value, end_of_day).ok_or_else(|| {
        invalid(
            section,
            key,
            &format!("invalid {key} format, expected YYYY-MM-DD or RFC 3339"),
        )
    })
}

/// `YYYY-MM-DD` (UTC midnight, or 23:59:59 with `end_of_day`) or RFC 3339.
pub fn parse_datetime(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
}

fn require_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, ConfluenceError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ConfluenceError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn optional_int(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<i64>, ConfluenceError> {
    config
        .get_string(section, key)
        .map(|s| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| invalid(section, key, &format!("{key} must be an integer")))
        })
        .transpose()
}

fn optional_double(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, ConfluenceError> {
    config
        .get_string(section, key)
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(section, key, &format!("{key} must be a number")))
        })
        .transpose()
}

fn invalid(section: &str, key: &str, reason: &str) -> ConfluenceError {
    ConfluenceError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
