//! Trade execution and fill simulation.
//!
//! Implements whole-capital long entries and exits with percentage slippage
//! and commission.

use chrono::{DateTime, Utc};

use super::error::ConfluenceError;
use super::ohlcv::PriceBar;
use super::portfolio::Portfolio;
use super::position::{ExitReason, Position, Trade};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionConfig {
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

/// Calculate commission: trade_value * pct / 100.
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    trade_value * config.commission_pct / 100.0
}

/// Long entry (buy): execution_price = market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Long exit (sell): execution_price = market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub market_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Enter a long position with all available cash.
///
/// 1. Apply slippage to execution price
/// 2. Size so that notional + commission uses the whole cash balance
/// 3. Deduct cost + commission from cash
/// 4. Move the position slot to long
pub fn enter_long(
    portfolio: &mut Portfolio,
    entry: Entry,
    config: &ExecutionConfig,
) -> Result<(), ConfluenceError> {
    let execution_price = apply_slippage_entry(entry.market_price, config.slippage_pct);
    if portfolio.cash <= 0.0 || execution_price <= 0.0 {
        return Err(ConfluenceError::simulation(format!(
            "cannot size entry at {} with cash {:.2}",
            entry.timestamp, portfolio.cash
        )));
    }

    let quantity = portfolio.cash / (execution_price * (1.0 + config.commission_pct / 100.0));
    let cost = quantity * execution_price;
    let commission = calculate_commission(cost, config);

    portfolio.state.open(Position {
        entry_index: entry.index,
        entry_timestamp: entry.timestamp,
        entry_price: execution_price,
        quantity,
        entry_commission: commission,
        stop_loss: entry.stop_loss,
        take_profit: entry.take_profit,
    })?;
    portfolio.cash -= cost + commission;

    tracing::debug!(
        timestamp = %entry.timestamp,
        price = execution_price,
        quantity,
        "entered long"
    );
    Ok(())
}

/// Close the open position at `market_price` and record the trade.
///
/// PnL includes round-trip commissions.
pub fn exit_long(
    portfolio: &mut Portfolio,
    index: usize,
    timestamp: DateTime<Utc>,
    market_price: f64,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Result<Trade, ConfluenceError> {
    let position = portfolio.state.close()?;

    let exit_price = apply_slippage_exit(market_price, config.slippage_pct);
    let exit_value = position.quantity * exit_price;
    let exit_commission = calculate_commission(exit_value, config);
    let pnl = position.quantity * (exit_price - position.entry_price)
        - position.entry_commission
        - exit_commission;
    let entry_notional = position.quantity * position.entry_price;
    let pnl_pct = if entry_notional > 0.0 {
        pnl / entry_notional * 100.0
    } else {
        0.0
    };

    portfolio.cash += exit_value - exit_commission;

    let trade = Trade {
        entry_timestamp: position.entry_timestamp,
        exit_timestamp: timestamp,
        entry_price: position.entry_price,
        exit_price,
        quantity: position.quantity,
        pnl,
        pnl_pct,
        exit_reason: reason,
        bars_held: index.saturating_sub(position.entry_index),
    };
    tracing::debug!(
        timestamp = %timestamp,
        price = exit_price,
        pnl,
        reason = %reason,
        "exited long"
    );
    portfolio.record_trade(trade.clone());
    Ok(trade)
}

/// Stop-loss is checked before take-profit; a bar that touches both exits
/// at the stop.
pub fn check_triggers(portfolio: &Portfolio, bar: &PriceBar) -> Option<(f64, ExitReason)> {
    let position = portfolio.state.position()?;
    if let Some(price) = position.stop_fill(bar) {
        return Some((price, ExitReason::StopLoss));
    }
    position
        .target_fill(bar)
        .map(|price| (price, ExitReason::TakeProfit))
}
