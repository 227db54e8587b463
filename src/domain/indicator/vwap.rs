//! VWAP (Volume Weighted Average Price).
//!
//! VWAP = Σ(typical price × volume) / Σ(volume), accumulated within a session
//! and reset at each session boundary (UTC calendar day or ISO week).
//! A session with no volume so far has no VWAP.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum VwapSession {
    #[default]
    Daily,
    Weekly,
    /// Cumulative over the whole series.
    Never,
}

impl VwapSession {
    fn key(self, timestamp: DateTime<Utc>) -> (i32, u32) {
        match self {
            VwapSession::Daily => (timestamp.year(), timestamp.ordinal()),
            VwapSession::Weekly => {
                let week = timestamp.iso_week();
                (week.year(), week.week())
            }
            VwapSession::Never => (0, 0),
        }
    }
}

impl fmt::Display for VwapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VwapSession::Daily => write!(f, "daily"),
            VwapSession::Weekly => write!(f, "weekly"),
            VwapSession::Never => write!(f, "never"),
        }
    }
}

impl FromStr for VwapSession {
    type Err = ConfluenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(VwapSession::Daily),
            "weekly" => Ok(VwapSession::Weekly),
            "never" | "none" => Ok(VwapSession::Never),
            other => Err(ConfluenceError::invalid_parameter(
                "vwap session",
                format!("unknown session '{other}', expected daily, weekly or never"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vwap {
    session: VwapSession,
    current: Option<(i32, u32)>,
    cum_pv: f64,
    cum_volume: f64,
}

impl Vwap {
    pub fn new(session: VwapSession) -> Self {
        Vwap {
            session,
            current: None,
            cum_pv: 0.0,
            cum_volume: 0.0,
        }
    }

    pub fn update(&mut self, bar: &PriceBar) -> Option<f64> {
        let key = self.session.key(bar.timestamp);
        if self.current != Some(key) {
            self.current = Some(key);
            self.cum_pv = 0.0;
            self.cum_volume = 0.0;
        }
        self.cum_pv += bar.typical_price() * bar.volume;
        self.cum_volume += bar.volume;

        if self.cum_volume > 0.0 {
            Some(self.cum_pv / self.cum_volume)
        } else {
            None
        }
    }
}

pub fn calculate_vwap(
    bars: &[PriceBar],
    session: VwapSession,
) -> Result<IndicatorSeries, ConfluenceError> {
    let mut vwap = Vwap::new(session);
    let kind = IndicatorKind::Vwap(session);
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        vwap.update(bar).map(IndicatorValue::Simple)
    }))
}
