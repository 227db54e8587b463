#![allow(dead_code)]

use chrono::{DateTime, Utc};
use confluence::domain::error::ConfluenceError;
pub use confluence::domain::ohlcv::{PriceBar, PriceSeries, Timeframe};
use confluence::ports::data_port::DataPort;
use std::collections::HashMap;

/// 2024-01-01 00:00:00 UTC
pub const BASE_TS: i64 = 1_704_067_200;

pub struct MockDataPort {
    pub data: HashMap<(String, Timeframe), Vec<PriceBar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, coin: &str, timeframe: Timeframe, bars: Vec<PriceBar>) -> Self {
        self.data.insert((coin.to_string(), timeframe), bars);
        self
    }

    pub fn with_error(mut self, coin: &str, reason: &str) -> Self {
        self.errors.insert(coin.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_series(
        &self,
        coin: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceSeries, ConfluenceError> {
        if let Some(reason) = self.errors.get(coin) {
            return Err(ConfluenceError::DataSource {
                reason: reason.clone(),
            });
        }
        let bars: Vec<PriceBar> = self
            .data
            .get(&(coin.to_string(), timeframe))
            .map(|bars| {
                bars.iter()
                    .filter(|b| start.is_none_or(|s| b.timestamp >= s))
                    .filter(|b| end.is_none_or(|e| b.timestamp <= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if bars.is_empty() {
            return Err(ConfluenceError::NoData {
                coin: coin.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        PriceSeries::new(timeframe, bars)
    }

    fn list_coins(&self, timeframe: Timeframe) -> Result<Vec<String>, ConfluenceError> {
        let mut coins: Vec<String> = self
            .data
            .keys()
            .filter(|(_, tf)| *tf == timeframe)
            .map(|(coin, _)| coin.clone())
            .collect();
        coins.sort();
        Ok(coins)
    }

    fn get_data_range(
        &self,
        coin: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, ConfluenceError> {
        match self.data.get(&(coin.to_string(), timeframe)) {
            Some(bars) if !bars.is_empty() => Ok(Some((
                bars[0].timestamp,
                bars[bars.len() - 1].timestamp,
                bars.len(),
            ))),
            _ => Ok(None),
        }
    }
}

/// Hourly timestamp `i` bars after `BASE_TS`.
pub fn ts(i: usize) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_TS + i as i64 * 3600, 0).unwrap()
}

/// Flat bar at `close` with a 1% range.
pub fn make_bar(i: usize, close: f64) -> PriceBar {
    PriceBar {
        timestamp: ts(i),
        open: close,
        high: close * 1.005,
        low: close * 0.995,
        close,
        volume: 1000.0,
    }
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c))
        .collect()
}

pub fn series_from_closes(closes: &[f64]) -> PriceSeries {
    PriceSeries::new(Timeframe::H1, bars_from_closes(closes)).unwrap()
}

/// close = 100 * 1.01^i
pub fn rising_closes(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 * 1.01_f64.powi(i as i32)).collect()
}

/// A slow sine around 100 with a drift, opens at the prior close.
pub fn wave_bars(n: usize, amplitude: f64, period: f64, drift: f64) -> Vec<PriceBar> {
    let close_at = |i: usize| {
        100.0 + drift * i as f64 + amplitude * (i as f64 * std::f64::consts::TAU / period).sin()
    };
    (0..n)
        .map(|i| {
            let close = close_at(i);
            let open = if i == 0 { close } else { close_at(i - 1) };
            PriceBar {
                timestamp: ts(i),
                open,
                high: open.max(close) * 1.003,
                low: open.min(close) * 0.997,
                close,
                volume: 800.0 + ((i * 37) % 11) as f64 * 60.0,
            }
        })
        .collect()
}

pub fn wave_series(n: usize) -> PriceSeries {
    PriceSeries::new(Timeframe::H1, wave_bars(n, 15.0, 60.0, 0.02)).unwrap()
}
