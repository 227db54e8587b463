//! CSV report adapter: trade log and equity curve.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::ConfluenceError;
use crate::ports::report_port::ReportPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        CsvReportAdapter
    }

    fn writer(output_path: &str) -> Result<csv::Writer<std::fs::File>, ConfluenceError> {
        csv::Writer::from_path(Path::new(output_path)).map_err(|e| csv_error(output_path, e))
    }
}

fn csv_error(output_path: &str, err: csv::Error) -> ConfluenceError {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => ConfluenceError::Io(io),
        other => ConfluenceError::Io(std::io::Error::other(format!(
            "failed to write {}: {:?}",
            output_path, other
        ))),
    }
}

impl ReportPort for CsvReportAdapter {
    fn write_trades(&self, result: &BacktestResult, output_path: &str) -> Result<(), ConfluenceError> {
        let mut wtr = Self::writer(output_path)?;
        wtr.write_record([
            "entry_timestamp",
            "exit_timestamp",
            "entry_price",
            "exit_price",
            "quantity",
            "pnl",
            "pnl_pct",
            "exit_reason",
            "bars_held",
        ])
        .map_err(|e| csv_error(output_path, e))?;

        for trade in &result.trades {
            wtr.write_record([
                trade.entry_timestamp.to_rfc3339(),
                trade.exit_timestamp.to_rfc3339(),
                format!("{:.8}", trade.entry_price),
                format!("{:.8}", trade.exit_price),
                format!("{:.8}", trade.quantity),
                format!("{:.2}", trade.pnl),
                format!("{:.4}", trade.pnl_pct),
                trade.exit_reason.to_string(),
                trade.bars_held.to_string(),
            ])
            .map_err(|e| csv_error(output_path, e))?;
        }
        wtr.flush()?;
        tracing::info!(path = output_path, trades = result.trades.len(), "wrote trade log");
        Ok(())
    }

    fn write_equity(&self, result: &BacktestResult, output_path: &str) -> Result<(), ConfluenceError> {
        let mut wtr = Self::writer(output_path)?;
        wtr.write_record(["timestamp", "equity"])
            .map_err(|e| csv_error(output_path, e))?;
        for point in &result.equity_curve {
            wtr.write_record([point.timestamp.to_rfc3339(), format!("{:.2}", point.equity)])
                .map_err(|e| csv_error(output_path, e))?;
        }
        wtr.flush()?;
        tracing::info!(
            path = output_path,
            points = result.equity_curve.len(),
            "wrote equity curve"
        );
        Ok(())
    }
}
