//! OHLCV bar, timeframe and validated price series.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

use super::error::ConfluenceError;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    fn validate(&self) -> Result<(), ConfluenceError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(ConfluenceError::invalid_parameter(
                "bar",
                format!("non-positive price at {}", self.timestamp),
            ));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(ConfluenceError::invalid_parameter(
                "bar",
                format!("high/low do not bracket open/close at {}", self.timestamp),
            ));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(ConfluenceError::invalid_parameter(
                "bar",
                format!("negative volume at {}", self.timestamp),
            ));
        }
        Ok(())
    }
}

/// Bar interval of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Timeframe {
    M15,
    H1,
    H4,
    H8,
    H12,
    D1,
    W1,
    D15,
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 9] = [
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
        Timeframe::D15,
        Timeframe::Mo1,
    ];

    /// Nominal bar length. Months are taken as 30 days.
    pub fn step(self) -> Duration {
        match self {
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::H8 => Duration::hours(8),
            Timeframe::H12 => Duration::hours(12),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::weeks(1),
            Timeframe::D15 => Duration::days(15),
            Timeframe::Mo1 => Duration::days(30),
        }
    }

    /// Bars per calendar year for a market that trades around the clock.
    pub fn periods_per_year(self) -> f64 {
        match self {
            Timeframe::Mo1 => 12.0,
            other => 365.0 * 24.0 * 60.0 / other.step().num_minutes() as f64,
        }
    }

    fn accepts_spacing(self, delta: Duration) -> Spacing {
        match self {
            Timeframe::Mo1 => {
                if delta < Duration::days(28) {
                    Spacing::TooClose
                } else if delta > Duration::days(31) {
                    Spacing::Gap
                } else {
                    Spacing::Ok
                }
            }
            other => {
                let step = other.step();
                if delta < step {
                    Spacing::TooClose
                } else if delta > step {
                    Spacing::Gap
                } else {
                    Spacing::Ok
                }
            }
        }
    }
}

enum Spacing {
    Ok,
    TooClose,
    Gap,
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "24h",
            Timeframe::W1 => "1w",
            Timeframe::D15 => "15d",
            Timeframe::Mo1 => "1M",
        };
        f.write_str(s)
    }
}

impl FromStr for Timeframe {
    type Err = ConfluenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "8h" => Ok(Timeframe::H8),
            "12h" => Ok(Timeframe::H12),
            "24h" | "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            "15d" => Ok(Timeframe::D15),
            "1M" => Ok(Timeframe::Mo1),
            other => Err(ConfluenceError::invalid_parameter(
                "timeframe",
                format!("unknown timeframe '{other}'"),
            )),
        }
    }
}

/// Ordered, gap-free bars of one timeframe. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    timeframe: Timeframe,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Validates bar shape, strict ordering and spacing.
    pub fn new(timeframe: Timeframe, bars: Vec<PriceBar>) -> Result<Self, ConfluenceError> {
        if bars.is_empty() {
            return Err(ConfluenceError::invalid_parameter(
                "series",
                "price series is empty",
            ));
        }

        for bar in &bars {
            bar.validate()?;
        }

        for pair in bars.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.timestamp <= prev.timestamp {
                return Err(ConfluenceError::invalid_parameter(
                    "series",
                    format!(
                        "timestamps not strictly increasing at {}",
                        next.timestamp
                    ),
                ));
            }
            match timeframe.accepts_spacing(next.timestamp - prev.timestamp) {
                Spacing::Ok => {}
                Spacing::Gap => {
                    return Err(ConfluenceError::DataGap {
                        previous: prev.timestamp,
                        next: next.timestamp,
                    });
                }
                Spacing::TooClose => {
                    return Err(ConfluenceError::invalid_parameter(
                        "series",
                        format!(
                            "bars at {} and {} are closer than {}",
                            prev.timestamp, next.timestamp, timeframe
                        ),
                    ));
                }
            }
        }

        Ok(PriceSeries { timeframe, bars })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> &PriceBar {
        // Construction rejects empty series.
        &self.bars[self.bars.len() - 1]
    }

    /// The first `len` bars, copied into a series of their own.
    pub fn prefix(&self, len: usize) -> Result<PriceSeries, ConfluenceError> {
        if len == 0 || len > self.bars.len() {
            return Err(ConfluenceError::invalid_parameter(
                "prefix",
                format!("length {} outside 1..={}", len, self.bars.len()),
            ));
        }
        Ok(PriceSeries {
            timeframe: self.timeframe,
            bars: self.bars[..len].to_vec(),
        })
    }

    /// Bars at or before `as_of`.
    pub fn up_to(&self, as_of: DateTime<Utc>) -> Result<PriceSeries, ConfluenceError> {
        let len = self.bars.partition_point(|b| b.timestamp <= as_of);
        if len == 0 {
            return Err(ConfluenceError::insufficient("series", 0, 1));
        }
        self.prefix(len)
    }

    /// Bars whose timestamps fall inside `[start, end]`.
    pub fn window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceSeries, ConfluenceError> {
        let from = self.bars.partition_point(|b| b.timestamp < start);
        let to = self.bars.partition_point(|b| b.timestamp <= end);
        if from >= to {
            return Err(ConfluenceError::insufficient("window", 0, 1));
        }
        Ok(PriceSeries {
            timeframe: self.timeframe,
            bars: self.bars[from..to].to_vec(),
        })
    }
}
