//! Report output port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::ConfluenceError;

/// Port for persisting backtest results. Implementations only read the result.
pub trait ReportPort {
    fn write_trades(&self, result: &BacktestResult, output_path: &str)
    -> Result<(), ConfluenceError>;

    fn write_equity(&self, result: &BacktestResult, output_path: &str)
    -> Result<(), ConfluenceError>;
}
