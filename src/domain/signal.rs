//! Signal generation: classification, success probability, ATR levels and
//! risk factors built from one indicator snapshot.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::analyzer::{Analyzer, IndicatorConfig, IndicatorSnapshot, ObvTrend};
use crate::domain::confluence::{self, ConfluenceConfig, ConfluenceResult, Vote, Voter};
use crate::domain::error::ConfluenceError;
use crate::domain::indicator::IndicatorKind;
use crate::domain::ohlcv::PriceSeries;
use crate::domain::patterns::{Cross, Divergence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SignalKind {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl SignalKind {
    pub fn is_buy(self) -> bool {
        matches!(self, SignalKind::StrongBuy | SignalKind::Buy)
    }

    pub fn is_sell(self) -> bool {
        matches!(self, SignalKind::StrongSell | SignalKind::Sell)
    }

    pub fn classify(score: f64, config: &SignalConfig) -> SignalKind {
        if score >= config.strong_buy_threshold {
            SignalKind::StrongBuy
        } else if score >= config.buy_threshold {
            SignalKind::Buy
        } else if score <= config.strong_sell_threshold {
            SignalKind::StrongSell
        } else if score <= config.sell_threshold {
            SignalKind::Sell
        } else {
            SignalKind::Neutral
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::StrongBuy => "strong_buy",
            SignalKind::Buy => "buy",
            SignalKind::Neutral => "neutral",
            SignalKind::Sell => "sell",
            SignalKind::StrongSell => "strong_sell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RiskFactor {
    HighVolatility,
    LowVolatility,
    LowVolume,
    ObvDivergence,
    AgainstLongTermTrend,
    TrendFilterOverride,
    LowConfluence,
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskFactor::HighVolatility => "high volatility (ATR in top percentile band)",
            RiskFactor::LowVolatility => "low volatility (ATR in bottom percentile band)",
            RiskFactor::LowVolume => "volume well below its recent average",
            RiskFactor::ObvDivergence => "OBV diverges from price",
            RiskFactor::AgainstLongTermTrend => "signal runs against the long-term EMA trend",
            RiskFactor::TrendFilterOverride => "buy signal neutralized by the long-term trend filter",
            RiskFactor::LowConfluence => "indicators disagree (low confluence)",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub strong_buy_threshold: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub strong_sell_threshold: f64,
    pub magnitude_weight: f64,
    pub agreement_weight: f64,
    pub cross_multiplier: f64,
    pub divergence_multiplier: f64,
    pub counter_trend_multiplier: f64,
    pub high_volatility_multiplier: f64,
    pub low_volatility_multiplier: f64,
    pub high_volatility_percentile: f64,
    pub low_volatility_percentile: f64,
    pub stop_atr_multiplier: f64,
    pub target_atr_multiplier: f64,
    /// Long stops never sit below close × ratio (short targets likewise).
    pub stop_floor_ratio: f64,
    pub low_volume_ratio: f64,
    pub low_confluence_threshold: f64,
    pub indicators: IndicatorConfig,
    pub confluence: ConfluenceConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            strong_buy_threshold: 0.6,
            buy_threshold: 0.2,
            sell_threshold: -0.2,
            strong_sell_threshold: -0.6,
            magnitude_weight: 0.5,
            agreement_weight: 0.5,
            cross_multiplier: 1.15,
            divergence_multiplier: 1.10,
            counter_trend_multiplier: 0.5,
            high_volatility_multiplier: 0.95,
            low_volatility_multiplier: 1.02,
            high_volatility_percentile: 0.8,
            low_volatility_percentile: 0.2,
            stop_atr_multiplier: 2.0,
            target_atr_multiplier: 3.0,
            stop_floor_ratio: 0.5,
            low_volume_ratio: 0.5,
            low_confluence_threshold: 0.2,
            indicators: IndicatorConfig::default(),
            confluence: ConfluenceConfig::default(),
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ConfluenceError> {
        let ordered = self.strong_sell_threshold <= self.sell_threshold
            && self.sell_threshold < 0.0
            && 0.0 < self.buy_threshold
            && self.buy_threshold <= self.strong_buy_threshold;
        if !ordered {
            return Err(ConfluenceError::invalid_parameter(
                "signal thresholds",
                "expected strong_sell <= sell < 0 < buy <= strong_buy",
            ));
        }
        if self.magnitude_weight < 0.0
            || self.agreement_weight < 0.0
            || self.magnitude_weight + self.agreement_weight > 1.0 + 1e-9
        {
            return Err(ConfluenceError::invalid_parameter(
                "probability weights",
                "weights must be non-negative and sum to at most 1",
            ));
        }
        if self.stop_atr_multiplier <= 0.0 || self.target_atr_multiplier <= self.stop_atr_multiplier
        {
            return Err(ConfluenceError::invalid_parameter(
                "atr multipliers",
                "target multiplier must exceed a positive stop multiplier",
            ));
        }
        if !(0.0..1.0).contains(&self.stop_floor_ratio) {
            return Err(ConfluenceError::invalid_parameter(
                "stop floor ratio",
                "must be in [0, 1)",
            ));
        }
        if self.confluence.cross_weight <= 0.0 || self.confluence.divergence_weight <= 0.0 {
            return Err(ConfluenceError::invalid_parameter(
                "vote weights",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub kind: SignalKind,
    /// Heuristic confidence in [0, 100], not a calibrated probability.
    pub success_probability: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub supporting_indicators: Vec<Voter>,
    pub conflicting_indicators: Vec<Voter>,
    pub risk_factors: Vec<RiskFactor>,
    /// A buy was replaced by neutral because the long-term trend is bearish.
    pub trend_override: bool,
    pub cross: Option<Cross>,
    pub divergence: Option<Divergence>,
    pub confluence: ConfluenceResult,
}

/// Build the signal for one snapshot. Pure; the backtest calls this per bar.
pub fn build_signal(snapshot: &IndicatorSnapshot, config: &SignalConfig) -> Signal {
    let confluence = confluence::evaluate(snapshot, &config.confluence);
    let score = confluence.score;
    let raw_kind = SignalKind::classify(score, config);
    let trend = confluence.vote_of(Voter::TrendFilter);
    let mut risk_factors = Vec::new();

    let mut kind = raw_kind;
    let mut trend_override = false;
    if raw_kind.is_buy() && trend == Some(Vote::Bearish) {
        tracing::debug!(
            timestamp = %snapshot.timestamp,
            score,
            "buy signal overridden by bearish long-term trend"
        );
        kind = SignalKind::Neutral;
        trend_override = true;
    }

    let success_probability = success_probability(snapshot, &confluence, raw_kind, trend, config);

    let against_trend = (raw_kind.is_buy() && trend == Some(Vote::Bearish))
        || (raw_kind.is_sell() && trend == Some(Vote::Bullish));
    if snapshot.atr_percentile > config.high_volatility_percentile {
        risk_factors.push(RiskFactor::HighVolatility);
    } else if snapshot.atr_percentile < config.low_volatility_percentile {
        risk_factors.push(RiskFactor::LowVolatility);
    }
    if let Some(average) = snapshot.average_volume {
        if snapshot.volume < config.low_volume_ratio * average {
            risk_factors.push(RiskFactor::LowVolume);
        }
    }
    if snapshot.obv_trend == Some(ObvTrend::Divergence) {
        risk_factors.push(RiskFactor::ObvDivergence);
    }
    if against_trend {
        risk_factors.push(RiskFactor::AgainstLongTermTrend);
    }
    if trend_override {
        risk_factors.push(RiskFactor::TrendFilterOverride);
    }
    if score.abs() < config.low_confluence_threshold && confluence.has_directional_votes() {
        risk_factors.push(RiskFactor::LowConfluence);
    }

    let (stop_loss, take_profit) = levels(kind, snapshot.close, snapshot.atr, config);

    let bullish = confluence.voters(Vote::Bullish);
    let bearish = confluence.voters(Vote::Bearish);
    let (supporting_indicators, conflicting_indicators) = if kind.is_buy() {
        (bullish, bearish)
    } else if kind.is_sell() {
        (bearish, bullish)
    } else {
        let mut directional = bullish;
        directional.extend(bearish);
        (confluence.voters(Vote::Neutral), directional)
    };

    Signal {
        timestamp: snapshot.timestamp,
        close: snapshot.close,
        kind,
        success_probability,
        stop_loss,
        take_profit,
        supporting_indicators,
        conflicting_indicators,
        risk_factors,
        trend_override,
        cross: snapshot.cross,
        divergence: snapshot.divergence,
        confluence,
    }
}

fn success_probability(
    snapshot: &IndicatorSnapshot,
    confluence: &ConfluenceResult,
    direction: SignalKind,
    trend: Option<Vote>,
    config: &SignalConfig,
) -> f64 {
    let long = direction.is_buy();
    let short = direction.is_sell();
    let mut p = (config.magnitude_weight * confluence.score.abs()
        + config.agreement_weight * confluence.agreement_ratio())
        * 100.0;

    let cross_aligned = matches!(
        (snapshot.cross, long, short),
        (Some(Cross::Golden), true, _) | (Some(Cross::Death), _, true)
    );
    if cross_aligned {
        p *= config.cross_multiplier;
    }
    let divergence_aligned = matches!(
        (snapshot.divergence, long, short),
        (Some(Divergence::Bullish), true, _) | (Some(Divergence::Bearish), _, true)
    );
    if divergence_aligned {
        p *= config.divergence_multiplier;
    }
    if (long && trend == Some(Vote::Bearish)) || (short && trend == Some(Vote::Bullish)) {
        p *= config.counter_trend_multiplier;
    }
    if snapshot.atr_percentile > config.high_volatility_percentile {
        p *= config.high_volatility_multiplier;
    } else if snapshot.atr_percentile < config.low_volatility_percentile {
        p *= config.low_volatility_multiplier;
    }
    p.clamp(0.0, 100.0)
}

fn levels(kind: SignalKind, close: f64, atr: f64, config: &SignalConfig) -> (Option<f64>, Option<f64>) {
    let floor = close * config.stop_floor_ratio;
    if kind.is_buy() {
        let stop = (close - config.stop_atr_multiplier * atr).max(floor);
        let target = close + config.target_atr_multiplier * atr;
        (Some(stop), Some(target))
    } else if kind.is_sell() {
        let stop = close + config.stop_atr_multiplier * atr;
        let target = (close - config.target_atr_multiplier * atr).max(floor);
        (Some(stop), Some(target))
    } else {
        (None, None)
    }
}

/// Error for a series on which the analyzer never produced a snapshot.
pub(crate) fn not_ready(config: &IndicatorConfig, bars: usize) -> ConfluenceError {
    let warmup = config.warmup();
    if bars < warmup {
        ConfluenceError::insufficient(config.slowest_required().to_string(), bars, warmup)
    } else {
        // Only VWAP can still be empty past warm-up: no volume yet this session.
        ConfluenceError::insufficient(
            IndicatorKind::Vwap(config.vwap_session).to_string(),
            bars,
            warmup,
        )
    }
}

/// Evaluates the signal at the last bar of a series.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    config: SignalConfig,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Result<Self, ConfluenceError> {
        config.validate()?;
        // Surfaces bad indicator periods before any data is read.
        Analyzer::new(&config.indicators)?;
        Ok(SignalGenerator { config })
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Snapshot and signal at the last bar.
    pub fn evaluate(
        &self,
        series: &PriceSeries,
    ) -> Result<(IndicatorSnapshot, Signal), ConfluenceError> {
        let mut analyzer = Analyzer::new(&self.config.indicators)?;
        let mut last = None;
        for bar in series.bars() {
            last = analyzer.push(bar);
        }
        let snapshot = last.ok_or_else(|| not_ready(&self.config.indicators, series.len()))?;
        let signal = build_signal(&snapshot, &self.config);
        Ok((snapshot, signal))
    }

    pub fn generate(&self, series: &PriceSeries) -> Result<Signal, ConfluenceError> {
        self.evaluate(series).map(|(_, signal)| signal)
    }

    /// Signal at the last bar at or before `as_of`.
    pub fn generate_at(
        &self,
        series: &PriceSeries,
        as_of: DateTime<Utc>,
    ) -> Result<Signal, ConfluenceError> {
        self.generate(&series.up_to(as_of)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::confluence::test_support::neutral_snapshot;
    use crate::domain::indicator::test_support::{make_bars, ts};
    use crate::domain::ohlcv::{PriceBar, Timeframe};

    fn bullish_snapshot() -> IndicatorSnapshot {
        let mut s = neutral_snapshot();
        s.rsi = 25.0;
        s.macd.line = 1.0;
        s.macd.signal = 0.5;
        s.macd.histogram = 0.5;
        s.close = 102.0;
        s.vwap = 100.0;
        s
    }

    #[test]
    fn classification_thresholds() {
        let config = SignalConfig::default();
        assert_eq!(SignalKind::classify(0.6, &config), SignalKind::StrongBuy);
        assert_eq!(SignalKind::classify(0.2, &config), SignalKind::Buy);
        assert_eq!(SignalKind::classify(0.0, &config), SignalKind::Neutral);
        assert_eq!(SignalKind::classify(0.19, &config), SignalKind::Neutral);
        assert_eq!(SignalKind::classify(-0.2, &config), SignalKind::Sell);
        assert_eq!(SignalKind::classify(-0.6, &config), SignalKind::StrongSell);
    }

    #[test]
    fn display_names() {
        assert_eq!(SignalKind::StrongBuy.to_string(), "strong_buy");
        assert_eq!(SignalKind::StrongSell.to_string(), "strong_sell");
    }

    #[test]
    fn neutral_snapshot_gives_neutral_signal() {
        let signal = build_signal(&neutral_snapshot(), &SignalConfig::default());
        assert_eq!(signal.kind, SignalKind::Neutral);
        assert_eq!(signal.stop_loss, None);
        assert_eq!(signal.take_profit, None);
        assert!(signal.success_probability.abs() < f64::EPSILON);
        assert_eq!(signal.supporting_indicators.len(), 5);
        assert!(signal.conflicting_indicators.is_empty());
        assert!(signal.risk_factors.is_empty());
    }

    #[test]
    fn buy_signal_levels_and_probability() {
        let config = SignalConfig::default();
        let signal = build_signal(&bullish_snapshot(), &config);

        // RSI, MACD, VWAP bullish; Bollinger, Stochastic neutral
        assert!((signal.confluence.score - 0.6).abs() < 1e-12);
        assert_eq!(signal.kind, SignalKind::StrongBuy);
        assert_eq!(
            signal.supporting_indicators,
            vec![Voter::Rsi, Voter::Macd, Voter::Vwap]
        );
        assert!((signal.stop_loss.unwrap() - 98.0).abs() < 1e-12);
        assert!((signal.take_profit.unwrap() - 108.0).abs() < 1e-12);

        let expected = (0.5 * 0.6 + 0.5 * 0.6) * 100.0;
        assert!((signal.success_probability - expected).abs() < 1e-9);
    }

    #[test]
    fn bearish_trend_overrides_buy() {
        let config = SignalConfig::default();
        let mut snapshot = bullish_snapshot();
        snapshot.ema_slow = Some(110.0);
        snapshot.rsi = 10.0;
        snapshot.stochastic.k = 10.0;
        snapshot.stochastic.d = 10.0;
        let signal = build_signal(&snapshot, &config);

        // four bullish, one bearish trend vote, one neutral: score 0.5
        assert!((signal.confluence.score - 0.5).abs() < 1e-12);
        assert_eq!(signal.kind, SignalKind::Neutral);
        assert!(signal.trend_override);
        assert!(signal.risk_factors.contains(&RiskFactor::TrendFilterOverride));
        assert!(signal.risk_factors.contains(&RiskFactor::AgainstLongTermTrend));
        assert_eq!(signal.stop_loss, None);

        let base = (0.5 * 0.5 + 0.5 * (4.0 / 6.0)) * 100.0;
        assert!((signal.success_probability - base * 0.5).abs() < 1e-9);
    }

    #[test]
    fn aligned_cross_boosts_probability() {
        let config = SignalConfig::default();
        let mut snapshot = bullish_snapshot();
        let plain = build_signal(&snapshot, &config).success_probability;
        snapshot.cross = Some(Cross::Golden);
        let boosted = build_signal(&snapshot, &config);
        assert_eq!(boosted.cross, Some(Cross::Golden));
        assert!(boosted.success_probability > plain);
    }

    #[test]
    fn sell_levels_mirror() {
        let config = SignalConfig::default();
        let mut snapshot = neutral_snapshot();
        snapshot.rsi = 80.0;
        snapshot.stochastic.k = 90.0;
        snapshot.stochastic.d = 90.0;
        snapshot.close = 97.0;
        let signal = build_signal(&snapshot, &config);
        assert!(signal.kind.is_sell());
        assert!((signal.stop_loss.unwrap() - 101.0).abs() < 1e-12);
        assert!((signal.take_profit.unwrap() - 91.0).abs() < 1e-12);
    }

    #[test]
    fn long_stop_is_floored() {
        let config = SignalConfig::default();
        let (stop, target) = levels(SignalKind::Buy, 10.0, 4.0, &config);
        assert!((stop.unwrap() - 5.0).abs() < 1e-12);
        assert!((target.unwrap() - 22.0).abs() < 1e-12);
    }

    #[test]
    fn volatility_and_volume_risks() {
        let config = SignalConfig::default();
        let mut snapshot = neutral_snapshot();
        snapshot.atr_percentile = 0.9;
        snapshot.average_volume = Some(5000.0);
        snapshot.obv_trend = Some(ObvTrend::Divergence);
        let signal = build_signal(&snapshot, &config);
        assert!(signal.risk_factors.contains(&RiskFactor::HighVolatility));
        assert!(signal.risk_factors.contains(&RiskFactor::LowVolume));
        assert!(signal.risk_factors.contains(&RiskFactor::ObvDivergence));
    }

    #[test]
    fn low_confluence_risk_needs_directional_vote() {
        let config = SignalConfig::default();
        let mut snapshot = neutral_snapshot();
        snapshot.rsi = 20.0;
        snapshot.stochastic.k = 90.0;
        snapshot.stochastic.d = 90.0;
        let signal = build_signal(&snapshot, &config);
        assert_eq!(signal.kind, SignalKind::Neutral);
        assert!(signal.risk_factors.contains(&RiskFactor::LowConfluence));
    }

    #[test]
    fn probability_clamped() {
        let config = SignalConfig {
            cross_multiplier: 5.0,
            ..SignalConfig::default()
        };
        let mut snapshot = bullish_snapshot();
        snapshot.cross = Some(Cross::Golden);
        let signal = build_signal(&snapshot, &config);
        assert!((signal.success_probability - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_rejected() {
        let config = SignalConfig {
            buy_threshold: 0.7,
            ..SignalConfig::default()
        };
        assert!(SignalGenerator::new(config).is_err());

        let config = SignalConfig {
            target_atr_multiplier: 1.0,
            ..SignalConfig::default()
        };
        assert!(SignalGenerator::new(config).is_err());
    }

    #[test]
    fn generate_short_series_is_insufficient() {
        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        let series = PriceSeries::new(Timeframe::H1, make_bars(&[100.0; 20])).unwrap();
        let err = generator.generate(&series).unwrap_err();
        assert!(matches!(
            err,
            ConfluenceError::InsufficientData {
                bars: 20,
                minimum: 34,
                ..
            }
        ));
    }

    #[test]
    fn generate_at_truncates() {
        let generator = SignalGenerator::new(SignalConfig::default()).unwrap();
        let bars: Vec<PriceBar> = make_bars(
            &(0..60)
                .map(|i| 100.0 + (i as f64 * 0.4).sin() * 3.0)
                .collect::<Vec<_>>(),
        );
        let series = PriceSeries::new(Timeframe::H1, bars).unwrap();
        let at = generator.generate_at(&series, ts(45)).unwrap();
        let prefix = generator.generate(&series.prefix(46).unwrap()).unwrap();
        assert_eq!(at, prefix);
        assert_eq!(at.timestamp, ts(45));
    }
}
