//! Confluence aggregation: one directional vote per indicator, fused into a
//! weighted score in [-1, 1].

use std::fmt;

use crate::domain::analyzer::{IndicatorSnapshot, ObvTrend};
use crate::domain::patterns::{Cross, Divergence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Vote {
    Bullish,
    Bearish,
    Neutral,
}

impl Vote {
    pub fn value(self) -> f64 {
        match self {
            Vote::Bullish => 1.0,
            Vote::Bearish => -1.0,
            Vote::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::Bullish => write!(f, "bullish"),
            Vote::Bearish => write!(f, "bearish"),
            Vote::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Voter {
    Rsi,
    Macd,
    Bollinger,
    MovingAverages,
    Stochastic,
    Vwap,
    Obv,
    TrendFilter,
    RsiDivergence,
    Cross,
}

impl Voter {
    pub fn name(self) -> &'static str {
        match self {
            Voter::Rsi => "RSI",
            Voter::Macd => "MACD",
            Voter::Bollinger => "Bollinger Bands",
            Voter::MovingAverages => "Moving Averages",
            Voter::Stochastic => "Stochastic",
            Voter::Vwap => "VWAP",
            Voter::Obv => "OBV",
            Voter::TrendFilter => "EMA Trend",
            Voter::RsiDivergence => "RSI Divergence",
            Voter::Cross => "MA Cross",
        }
    }
}

impl fmt::Display for Voter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VoteRecord {
    pub voter: Voter,
    pub vote: Vote,
    pub weight: f64,
}

/// Vote thresholds and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stochastic_oversold: f64,
    pub stochastic_overbought: f64,
    /// Fractional band around VWAP, 0.01 = 1%.
    pub vwap_band: f64,
    /// Fractional band around the slow EMA, 0.02 = 2%.
    pub trend_band: f64,
    pub cross_weight: f64,
    pub divergence_weight: f64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        ConfluenceConfig {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stochastic_oversold: 20.0,
            stochastic_overbought: 80.0,
            vwap_band: 0.01,
            trend_band: 0.02,
            cross_weight: 2.0,
            divergence_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConfluenceResult {
    /// Weighted mean vote, -1 all bearish to 1 all bullish.
    pub score: f64,
    /// (score + 1) / 2
    pub normalized: f64,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    pub total_weight: f64,
    pub votes: Vec<VoteRecord>,
}

impl ConfluenceResult {
    pub fn voters(&self, side: Vote) -> Vec<Voter> {
        self.votes
            .iter()
            .filter(|r| r.vote == side)
            .map(|r| r.voter)
            .collect()
    }

    pub fn vote_of(&self, voter: Voter) -> Option<Vote> {
        self.votes.iter().find(|r| r.voter == voter).map(|r| r.vote)
    }

    /// Weight share of the larger directional side over every voter.
    pub fn agreement_ratio(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        self.bullish_weight.max(self.bearish_weight) / self.total_weight
    }

    pub fn has_directional_votes(&self) -> bool {
        self.bullish_count + self.bearish_count > 0
    }
}

pub fn vote_rsi(rsi: f64, config: &ConfluenceConfig) -> Vote {
    if rsi < config.rsi_oversold {
        Vote::Bullish
    } else if rsi > config.rsi_overbought {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

pub fn vote_macd(line: f64, signal: f64, histogram: f64) -> Vote {
    if histogram > 0.0 && line > signal {
        Vote::Bullish
    } else if histogram < 0.0 && line < signal {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

pub fn vote_bollinger(close: f64, upper: f64, lower: f64) -> Vote {
    if close <= lower {
        Vote::Bullish
    } else if close >= upper {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

pub fn vote_moving_averages(close: f64, fast: f64, slow: f64) -> Vote {
    if close > fast && close > slow {
        Vote::Bullish
    } else if close < fast && close < slow {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

pub fn vote_stochastic(k: f64, d: f64, config: &ConfluenceConfig) -> Vote {
    if k < config.stochastic_oversold && d < config.stochastic_oversold {
        Vote::Bullish
    } else if k > config.stochastic_overbought && d > config.stochastic_overbought {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

pub fn vote_vwap(close: f64, vwap: f64, config: &ConfluenceConfig) -> Vote {
    if close > vwap * (1.0 + config.vwap_band) {
        Vote::Bullish
    } else if close < vwap * (1.0 - config.vwap_band) {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

/// Volume-backed moves vote with price against the fast SMA; a divergence
/// or flat trend is a neutral vote.
pub fn vote_obv(trend: ObvTrend, close: f64, sma_fast: Option<f64>) -> Vote {
    match (trend, sma_fast) {
        (ObvTrend::Supported, Some(sma)) if close > sma => Vote::Bullish,
        (ObvTrend::Supported, Some(sma)) if close < sma => Vote::Bearish,
        _ => Vote::Neutral,
    }
}

pub fn vote_trend(close: f64, ema_slow: f64, config: &ConfluenceConfig) -> Vote {
    if close > ema_slow * (1.0 + config.trend_band) {
        Vote::Bullish
    } else if close < ema_slow * (1.0 - config.trend_band) {
        Vote::Bearish
    } else {
        Vote::Neutral
    }
}

/// One record per voter with a valid reading. Divergence and cross only
/// vote when detected.
pub fn collect_votes(snapshot: &IndicatorSnapshot, config: &ConfluenceConfig) -> Vec<VoteRecord> {
    let s = snapshot;
    let mut votes = Vec::with_capacity(10);
    let mut push = |voter, vote, weight| votes.push(VoteRecord { voter, vote, weight });

    push(Voter::Rsi, vote_rsi(s.rsi, config), 1.0);
    push(
        Voter::Macd,
        vote_macd(s.macd.line, s.macd.signal, s.macd.histogram),
        1.0,
    );
    push(
        Voter::Bollinger,
        vote_bollinger(s.close, s.bollinger.upper, s.bollinger.lower),
        1.0,
    );
    if let (Some(fast), Some(slow)) = (s.sma_fast, s.sma_slow) {
        push(
            Voter::MovingAverages,
            vote_moving_averages(s.close, fast, slow),
            1.0,
        );
    }
    push(
        Voter::Stochastic,
        vote_stochastic(s.stochastic.k, s.stochastic.d, config),
        1.0,
    );
    push(Voter::Vwap, vote_vwap(s.close, s.vwap, config), 1.0);
    if let Some(trend) = s.obv_trend {
        push(Voter::Obv, vote_obv(trend, s.close, s.sma_fast), 1.0);
    }
    if let Some(ema_slow) = s.ema_slow {
        push(Voter::TrendFilter, vote_trend(s.close, ema_slow, config), 1.0);
    }
    match s.divergence {
        Some(Divergence::Bullish) => push(Voter::RsiDivergence, Vote::Bullish, config.divergence_weight),
        Some(Divergence::Bearish) => push(Voter::RsiDivergence, Vote::Bearish, config.divergence_weight),
        None => {}
    }
    match s.cross {
        Some(Cross::Golden) => push(Voter::Cross, Vote::Bullish, config.cross_weight),
        Some(Cross::Death) => push(Voter::Cross, Vote::Bearish, config.cross_weight),
        None => {}
    }
    votes
}

pub fn aggregate(votes: Vec<VoteRecord>) -> ConfluenceResult {
    let mut result = ConfluenceResult {
        score: 0.0,
        normalized: 0.5,
        bullish_count: 0,
        bearish_count: 0,
        neutral_count: 0,
        bullish_weight: 0.0,
        bearish_weight: 0.0,
        total_weight: 0.0,
        votes: Vec::new(),
    };
    let mut weighted_sum = 0.0;
    for record in &votes {
        match record.vote {
            Vote::Bullish => {
                result.bullish_count += 1;
                result.bullish_weight += record.weight;
            }
            Vote::Bearish => {
                result.bearish_count += 1;
                result.bearish_weight += record.weight;
            }
            Vote::Neutral => result.neutral_count += 1,
        }
        result.total_weight += record.weight;
        weighted_sum += record.vote.value() * record.weight;
    }
    if result.total_weight > 0.0 {
        result.score = (weighted_sum / result.total_weight).clamp(-1.0, 1.0);
        result.normalized = (result.score + 1.0) / 2.0;
    }
    result.votes = votes;
    result
}

pub fn evaluate(snapshot: &IndicatorSnapshot, config: &ConfluenceConfig) -> ConfluenceResult {
    aggregate(collect_votes(snapshot, config))
}
