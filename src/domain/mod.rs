//! Core domain types and logic.

pub mod analysis;
pub mod analyzer;
pub mod backtest;
pub mod config_validation;
pub mod confluence;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod metrics;
pub mod ohlcv;
pub mod patterns;
pub mod portfolio;
pub mod position;
pub mod signal;
