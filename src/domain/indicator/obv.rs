//! OBV (On-Balance Volume) indicator.

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{
    collect_series, require_bars, IndicatorKind, IndicatorSeries, IndicatorValue,
};
use crate::domain::ohlcv::PriceBar;

/// OBV[0] = volume[0]
/// If close[i] > close[i-1]: OBV[i] = OBV[i-1] + volume[i]
/// If close[i] < close[i-1]: OBV[i] = OBV[i-1] - volume[i]
/// If close[i] == close[i-1]: OBV[i] = OBV[i-1]
#[derive(Debug, Clone, Default)]
pub struct Obv {
    obv: f64,
    prev_close: Option<f64>,
}

impl Obv {
    pub fn new() -> Self {
        Obv::default()
    }

    pub fn update(&mut self, bar: &PriceBar) -> f64 {
        match self.prev_close.replace(bar.close) {
            None => self.obv = bar.volume,
            Some(prev) if bar.close > prev => self.obv += bar.volume,
            Some(prev) if bar.close < prev => self.obv -= bar.volume,
            Some(_) => {}
        }
        self.obv
    }
}

/// No warmup period; all bars are valid.
pub fn calculate_obv(bars: &[PriceBar]) -> Result<IndicatorSeries, ConfluenceError> {
    let mut obv = Obv::new();
    let kind = IndicatorKind::Obv;
    require_bars(&kind, bars)?;
    Ok(collect_series(kind, bars, |bar| {
        Some(IndicatorValue::Simple(obv.update(bar)))
    }))
}
