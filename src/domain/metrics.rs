//! Performance metrics computed once from the trade log and equity curve.

use super::ohlcv::Timeframe;
use super::portfolio::EquityPoint;
use super::position::Trade;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    /// Fraction of trades won, 0 with no trades.
    pub win_rate: f64,
    pub total_profit_loss: f64,
    /// Percent of initial capital.
    pub total_profit_loss_pct: f64,
    pub max_drawdown: f64,
    /// Percent of the peak the drawdown is measured from.
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// `None` when nothing was lost but something was won.
    pub profit_factor: Option<f64>,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub average_trade_duration_bars: f64,
    pub final_equity: f64,
}

impl BacktestMetrics {
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        timeframe: Timeframe,
        risk_free_rate: f64,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);
        let total_profit_loss = final_equity - initial_capital;
        let total_profit_loss_pct = if initial_capital > 0.0 {
            total_profit_loss / initial_capital * 100.0
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = compute_drawdown(equity_curve);

        let periods = timeframe.periods_per_year();
        let (sharpe_ratio, sortino_ratio) =
            compute_risk_adjusted(equity_curve, risk_free_rate / periods, periods);

        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut breakeven_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_bars = 0usize;

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                winning_trades += 1;
                gross_profit += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                losing_trades += 1;
                gross_loss += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                breakeven_trades += 1;
            }
            total_bars += trade.bars_held;
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if gross_loss > 0.0 {
            Some(gross_profit / gross_loss)
        } else if gross_profit > 0.0 {
            None
        } else {
            Some(0.0)
        };

        let average_win = if winning_trades > 0 {
            gross_profit / winning_trades as f64
        } else {
            0.0
        };
        let average_loss = if losing_trades > 0 {
            gross_loss / losing_trades as f64
        } else {
            0.0
        };
        let average_trade_duration_bars = if total_trades > 0 {
            total_bars as f64 / total_trades as f64
        } else {
            0.0
        };

        BacktestMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            breakeven_trades,
            win_rate,
            total_profit_loss,
            total_profit_loss_pct,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            sortino_ratio,
            profit_factor,
            average_win,
            average_loss,
            largest_win,
            largest_loss,
            average_trade_duration_bars,
            final_equity,
        }
    }
}

/// Largest peak-to-trough fall: (absolute, percent of that peak).
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0.0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_pct = 0.0_f64;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
            continue;
        }
        let dd = peak - point.equity;
        if dd > max_dd {
            max_dd = dd;
            max_dd_pct = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }

    (max_dd, max_dd_pct)
}

/// Sharpe and Sortino from per-bar returns, population std-dev, annualized
/// by sqrt(periods per year).
fn compute_risk_adjusted(equity_curve: &[EquityPoint], rf_per_bar: f64, periods: f64) -> (f64, f64) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let excess_return = mean - rf_per_bar;
    let annualizer = periods.sqrt();

    let sharpe = if stddev > 0.0 {
        (excess_return / stddev) * annualizer
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < rf_per_bar)
        .map(|&r| (r - rf_per_bar).powi(2))
        .sum();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        (excess_return / downside_stddev) * annualizer
    } else {
        0.0
    };

    (sharpe, sortino)
}
