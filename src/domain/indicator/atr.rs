//! ATR (Average True Range) indicator.
//!
//! TR[0] = high - low, TR[i] = max(high - low, |high - prev_close|, |low - prev_close|).
//! Seeded with the mean of the first n TR values, then Wilder smoothing:
//! ATR[i] = (ATR[i-1] * (n-1) + TR[i]) / n
//!
//! Warmup: first (n-1) bars are invalid.

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, require_period, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_PERIOD: usize = 14;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    seen: usize,
    atr: f64,
}

impl Atr {
    pub fn new(period: usize) -> Result<Self, ConfluenceError> {
        require_period("atr period", period)?;
        Ok(Atr {
            period,
            prev_close: None,
            seen: 0,
            atr: 0.0,
        })
    }

    pub fn update(&mut self, bar: &PriceBar) -> Option<f64> {
        let tr = match self.prev_close.replace(bar.close) {
            Some(prev) => bar.true_range(prev),
            None => bar.high - bar.low,
        };
        self.seen += 1;

        let n = self.period as f64;
        if self.seen < self.period {
            self.atr += tr;
            None
        } else if self.seen == self.period {
            self.atr = (self.atr + tr) / n;
            Some(self.atr)
        } else {
            self.atr = (self.atr * (n - 1.0) + tr) / n;
            Some(self.atr)
        }
    }
}

pub fn calculate_atr(bars: &[PriceBar], period: usize) -> Result<IndicatorSeries, ConfluenceError> {
    let mut atr = Atr::new(period)?;
    let kind = IndicatorKind::Atr(period);
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        atr.update(bar).map(IndicatorValue::Simple)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_hlc;

    #[test]
    fn atr_warmup() {
        let bars = make_hlc(&[
            (12.0, 10.0, 11.0),
            (13.0, 11.0, 12.0),
            (14.0, 12.0, 13.0),
            (15.0, 13.0, 14.0),
        ]);
        let series = calculate_atr(&bars, 3).unwrap();
        assert!(!series.values[0].is_valid());
        assert!(!series.values[1].is_valid());
        assert!(series.values[2].is_valid());
        assert!(series.values[3].is_valid());
    }

    #[test]
    fn atr_seed_and_smoothing() {
        let bars = make_hlc(&[
            (12.0, 10.0, 11.0), // TR 2
            (14.0, 11.0, 13.0), // TR max(3, 3, 0) = 3
            (13.0, 12.0, 12.5), // TR max(1, 0, 1) = 1
            (17.0, 12.0, 16.0), // TR max(5, 4.5, 0.5) = 5
        ]);
        let series = calculate_atr(&bars, 3).unwrap();

        let seed = (2.0 + 3.0 + 1.0) / 3.0;
        assert!((series.values[2].simple().unwrap() - seed).abs() < 1e-12);
        let next = (seed * 2.0 + 5.0) / 3.0;
        assert!((series.values[3].simple().unwrap() - next).abs() < 1e-12);
    }

    #[test]
    fn atr_gap_uses_previous_close() {
        let bars = make_hlc(&[(10.0, 9.0, 10.0), (21.0, 20.0, 20.5)]);
        let series = calculate_atr(&bars, 1).unwrap();
        // gap up: |21 - 10| = 11
        assert!((series.values[1].simple().unwrap() - 11.0).abs() < 1e-12);
    }

    #[test]
    fn atr_insufficient() {
        let bars = make_hlc(&[(12.0, 10.0, 11.0)]);
        assert!(calculate_atr(&bars, 14).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn atr_zero_period() {
        let bars = make_hlc(&[(12.0, 10.0, 11.0)]);
        assert!(matches!(
            calculate_atr(&bars, 0),
            Err(ConfluenceError::InvalidParameter { .. })
        ));
    }
}
