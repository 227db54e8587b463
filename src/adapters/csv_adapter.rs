//! CSV file price history adapter.
//!
//! One file per coin and timeframe, named `{COIN}_{timeframe}.csv`, with the
//! header `timestamp,open,high,low,close,volume`.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::ohlcv::{PriceBar, PriceSeries, Timeframe};
use crate::ports::data_port::DataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, coin: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", coin, timeframe))
    }

    /// All bars in the file, sorted by timestamp.
    fn read_bars(&self, coin: &str, timeframe: Timeframe) -> Result<Vec<PriceBar>, ConfluenceError> {
        let path = self.csv_path(coin, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfluenceError::NoData {
                coin: coin.to_string(),
                timeframe: timeframe.to_string(),
            },
            _ => ConfluenceError::DataSource {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| ConfluenceError::DataSource {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let row = line + 2;

            let timestamp = parse_timestamp(field(&record, 0, "timestamp", row)?).ok_or_else(|| {
                ConfluenceError::DataSource {
                    reason: format!("row {}: invalid timestamp", row),
                }
            })?;

            bars.push(PriceBar {
                timestamp,
                open: parse_number(&record, 1, "open", row)?,
                high: parse_number(&record, 2, "high", row)?,
                low: parse_number(&record, 3, "low", row)?,
                close: parse_number(&record, 4, "close", row)?,
                volume: parse_number(&record, 5, "volume", row)?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
    row: usize,
) -> Result<&'r str, ConfluenceError> {
    record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| ConfluenceError::DataSource {
            reason: format!("row {}: missing {} column", row, name),
        })
}

fn parse_number(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    row: usize,
) -> Result<f64, ConfluenceError> {
    field(record, index, name, row)?
        .parse()
        .map_err(|e| ConfluenceError::DataSource {
            reason: format!("row {}: invalid {} value: {}", row, name, e),
        })
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or unix seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

impl DataPort for CsvAdapter {
    fn fetch_series(
        &self,
        coin: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<PriceSeries, ConfluenceError> {
        let bars: Vec<PriceBar> = self
            .read_bars(coin, timeframe)?
            .into_iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .collect();

        if bars.is_empty() {
            return Err(ConfluenceError::NoData {
                coin: coin.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        tracing::debug!(coin, %timeframe, bars = bars.len(), "loaded CSV series");
        PriceSeries::new(timeframe, bars)
    }

    fn list_coins(&self, timeframe: Timeframe) -> Result<Vec<String>, ConfluenceError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| ConfluenceError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let suffix = format!("_{}.csv", timeframe);
        let mut coins = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| ConfluenceError::DataSource {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(coin) = name_str.strip_suffix(&suffix) {
                coins.push(coin.to_string());
            }
        }

        coins.sort();
        Ok(coins)
    }

    fn get_data_range(
        &self,
        coin: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, ConfluenceError> {
        let bars = match self.read_bars(coin, timeframe) {
            Ok(bars) => bars,
            Err(ConfluenceError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp, bars.len())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "timestamp,open,high,low,close,volume\n";

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = format!(
            "{HEADER}\
            2024-01-15T02:00:00Z,102.0,108.0,101.0,107.0,700.5\n\
            2024-01-15 00:00:00,100.0,110.0,90.0,105.0,500\n\
            2024-01-15T01:00:00+00:00,105.0,115.0,100.0,102.0,600\n"
        );

        fs::write(path.join("BTC_1h.csv"), csv_content).unwrap();
        fs::write(path.join("ETH_1h.csv"), HEADER).unwrap();
        fs::write(path.join("SOL_4h.csv"), HEADER).unwrap();

        (dir, path)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(&format!("2024-01-15 {:02}:00:00", hour), "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn fetch_series_sorts_and_parses() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter.fetch_series("BTC", Timeframe::H1, None, None).unwrap();
        assert_eq!(series.len(), 3);
        let first = &series.bars()[0];
        assert_eq!(first.timestamp, at(0));
        assert_eq!(first.open, 100.0);
        assert_eq!(first.high, 110.0);
        assert_eq!(first.low, 90.0);
        assert_eq!(first.close, 105.0);
        assert_eq!(first.volume, 500.0);
        assert_eq!(series.last().volume, 700.5);
    }

    #[test]
    fn fetch_series_filters_by_range() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter
            .fetch_series("BTC", Timeframe::H1, Some(at(1)), Some(at(1)))
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars()[0].timestamp, at(1));
    }

    #[test]
    fn missing_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_series("XRP", Timeframe::H1, None, None).unwrap_err();
        assert!(matches!(err, ConfluenceError::NoData { .. }));
    }

    #[test]
    fn empty_file_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_series("ETH", Timeframe::H1, None, None).unwrap_err();
        assert!(matches!(err, ConfluenceError::NoData { .. }));
    }

    #[test]
    fn gap_in_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BTC_1h.csv"),
            format!(
                "{HEADER}2024-01-15 00:00:00,1,1,1,1,1\n2024-01-15 03:00:00,1,1,1,1,1\n"
            ),
        )
        .unwrap();
        let adapter = CsvAdapter::new(dir.path().to_path_buf());
        let err = adapter.fetch_series("BTC", Timeframe::H1, None, None).unwrap_err();
        assert!(matches!(err, ConfluenceError::DataGap { .. }));
    }

    #[test]
    fn bad_number_is_data_source_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BTC_1h.csv"),
            format!("{HEADER}2024-01-15 00:00:00,abc,1,1,1,1\n"),
        )
        .unwrap();
        let adapter = CsvAdapter::new(dir.path().to_path_buf());
        let err = adapter.fetch_series("BTC", Timeframe::H1, None, None).unwrap_err();
        assert!(matches!(err, ConfluenceError::DataSource { .. }));
    }

    #[test]
    fn list_coins_by_timeframe() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(adapter.list_coins(Timeframe::H1).unwrap(), vec!["BTC", "ETH"]);
        assert_eq!(adapter.list_coins(Timeframe::H4).unwrap(), vec!["SOL"]);
    }

    #[test]
    fn data_range_reports_bounds() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let (first, last, count) = adapter.get_data_range("BTC", Timeframe::H1).unwrap().unwrap();
        assert_eq!(first, at(0));
        assert_eq!(last, at(2));
        assert_eq!(count, 3);
        assert!(adapter.get_data_range("ETH", Timeframe::H1).unwrap().is_none());
        assert!(adapter.get_data_range("XRP", Timeframe::H1).unwrap().is_none());
    }

    #[test]
    fn parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2024-01-15T00:00:00Z"), Some(at(0)));
        assert_eq!(parse_timestamp("2024-01-15 00:00:00"), Some(at(0)));
        assert_eq!(parse_timestamp("1705276800"), Some(at(0)));
        assert_eq!(parse_timestamp("15/01/2024"), None);
    }
}
