//! Position state machine and closed trades.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::error::ConfluenceError;
use crate::domain::ohlcv::PriceBar;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub entry_index: usize,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_commission: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price)
    }

    /// Fill price if the bar trades through the stop. Gaps fill at the open.
    pub fn stop_fill(&self, bar: &PriceBar) -> Option<f64> {
        let stop = self.stop_loss?;
        (bar.low <= stop).then(|| bar.open.min(stop))
    }

    /// Fill price if the bar trades through the target. Gaps fill at the open.
    pub fn target_fill(&self, bar: &PriceBar) -> Option<f64> {
        let target = self.take_profit?;
        (bar.high >= target).then(|| bar.open.max(target))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(Position),
}

impl PositionState {
    pub fn is_long(&self) -> bool {
        matches!(self, PositionState::Long(_))
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            PositionState::Long(p) => Some(p),
            PositionState::Flat => None,
        }
    }

    pub fn open(&mut self, position: Position) -> Result<(), ConfluenceError> {
        if let PositionState::Long(existing) = self {
            return Err(ConfluenceError::simulation(format!(
                "open requested at {} while already long since {}",
                position.entry_timestamp, existing.entry_timestamp
            )));
        }
        *self = PositionState::Long(position);
        Ok(())
    }

    pub fn close(&mut self) -> Result<Position, ConfluenceError> {
        match std::mem::take(self) {
            PositionState::Long(position) => Ok(position),
            PositionState::Flat => Err(ConfluenceError::simulation(
                "close requested while flat",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SellSignal,
    /// Force-closed at the last bar.
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::SellSignal => "sell_signal",
            ExitReason::EndOfData => "end_of_data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trade {
    pub entry_timestamp: DateTime<Utc>,
    pub exit_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Net of commissions.
    pub pnl: f64,
    /// P&L as a percentage of the entry notional.
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
    pub bars_held: usize,
}

impl Trade {
    pub fn is_force_closed(&self) -> bool {
        self.exit_reason == ExitReason::EndOfData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::ts;

    fn sample_position() -> Position {
        Position {
            entry_index: 3,
            entry_timestamp: ts(3),
            entry_price: 50.0,
            quantity: 100.0,
            entry_commission: 0.0,
            stop_loss: Some(45.0),
            take_profit: Some(60.0),
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: ts(4),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn market_value_and_unrealized() {
        let pos = sample_position();
        assert!((pos.market_value(55.0) - 5500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(55.0) - 500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(40.0) + 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_fill_at_stop_or_gap_open() {
        let pos = sample_position();
        assert_eq!(pos.stop_fill(&bar(48.0, 49.0, 44.0, 46.0)), Some(45.0));
        assert_eq!(pos.stop_fill(&bar(42.0, 43.0, 41.0, 42.5)), Some(42.0));
        assert_eq!(pos.stop_fill(&bar(48.0, 49.0, 46.0, 47.0)), None);
    }

    #[test]
    fn target_fill_at_target_or_gap_open() {
        let pos = sample_position();
        assert_eq!(pos.target_fill(&bar(58.0, 61.0, 57.0, 59.0)), Some(60.0));
        assert_eq!(pos.target_fill(&bar(63.0, 64.0, 62.0, 63.5)), Some(63.0));
        assert_eq!(pos.target_fill(&bar(58.0, 59.0, 57.0, 58.5)), None);
    }

    #[test]
    fn no_levels_never_fill() {
        let pos = Position {
            stop_loss: None,
            take_profit: None,
            ..sample_position()
        };
        assert_eq!(pos.stop_fill(&bar(1.0, 100.0, 0.5, 50.0)), None);
        assert_eq!(pos.target_fill(&bar(1.0, 100.0, 0.5, 50.0)), None);
    }

    #[test]
    fn open_twice_is_simulation_error() {
        let mut state = PositionState::Flat;
        state.open(sample_position()).unwrap();
        assert!(state.is_long());
        let err = state.open(sample_position()).unwrap_err();
        assert!(matches!(err, ConfluenceError::Simulation { .. }));
    }

    #[test]
    fn close_while_flat_is_simulation_error() {
        let mut state = PositionState::Flat;
        assert!(matches!(
            state.close(),
            Err(ConfluenceError::Simulation { .. })
        ));
    }

    #[test]
    fn close_returns_position_and_goes_flat() {
        let mut state = PositionState::Flat;
        state.open(sample_position()).unwrap();
        let pos = state.close().unwrap();
        assert_eq!(pos.entry_index, 3);
        assert!(!state.is_long());
        assert!(state.position().is_none());
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::EndOfData.to_string(), "end_of_data");
        assert_eq!(ExitReason::StopLoss.to_string(), "stop_loss");
    }
}
