//! Price history port trait.

use chrono::{DateTime, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::ohlcv::{PriceSeries, Timeframe};

pub trait DataPort {
    /// Bars for `coin` at `timeframe` with timestamps in `[start, end]`.
    /// `None` leaves that side of the range open.
    fn fetch_series(
        &self,
        coin: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceSeries, ConfluenceError>;

    fn list_coins(&self, timeframe: Timeframe) -> Result<Vec<String>, ConfluenceError>;

    /// First timestamp, last timestamp and bar count, or `None` when the
    /// provider holds nothing for the pair.
    fn get_data_range(
        &self,
        coin: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, ConfluenceError>;
}
