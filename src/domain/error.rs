//! Domain error types.

use chrono::{DateTime, Utc};

/// Top-level error type for confluence.
#[derive(Debug, thiserror::Error)]
pub enum ConfluenceError {
    #[error("insufficient data for {indicator}: have {bars} bars, need {minimum}")]
    InsufficientData {
        indicator: String,
        bars: usize,
        minimum: usize,
    },

    #[error("gap in price series between {previous} and {next}")]
    DataGap {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A position state machine invariant was broken. This is a defect.
    #[error("simulation invariant violated: {reason}")]
    Simulation { reason: String },

    #[error("backtest cancelled after {processed} bars")]
    Cancelled { processed: usize },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("no data for {coin} ({timeframe})")]
    NoData { coin: String, timeframe: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfluenceError {
    pub fn insufficient(indicator: impl Into<String>, bars: usize, minimum: usize) -> Self {
        ConfluenceError::InsufficientData {
            indicator: indicator.into(),
            bars,
            minimum,
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfluenceError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn simulation(reason: impl Into<String>) -> Self {
        ConfluenceError::Simulation {
            reason: reason.into(),
        }
    }

    /// True for a too-short series and for a series with a hole in it.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            ConfluenceError::InsufficientData { .. } | ConfluenceError::DataGap { .. }
        )
    }
}

impl From<&ConfluenceError> for std::process::ExitCode {
    fn from(err: &ConfluenceError) -> Self {
        let code: u8 = match err {
            ConfluenceError::Io(_) => 1,
            ConfluenceError::ConfigParse { .. }
            | ConfluenceError::ConfigMissing { .. }
            | ConfluenceError::ConfigInvalid { .. } => 2,
            ConfluenceError::DataSource { .. } => 3,
            ConfluenceError::NoData { .. }
            | ConfluenceError::InsufficientData { .. }
            | ConfluenceError::DataGap { .. } => 5,
            ConfluenceError::InvalidParameter { .. } => 6,
            ConfluenceError::Cancelled { .. } => 7,
            ConfluenceError::Simulation { .. } => 70,
        };
        std::process::ExitCode::from(code)
    }
}
