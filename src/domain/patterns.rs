//! Pattern detectors: RSI divergence, EMA crossovers, swing
//! support/resistance levels and chart patterns.

use std::collections::VecDeque;
use std::fmt;

use crate::domain::error::ConfluenceError;
use crate::domain::indicator::{require_bars, EmaPair, IndicatorKind, Rsi};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_DIVERGENCE_LOOKBACK: usize = 20;
/// Fewer valid RSI readings than this in the window means no divergence.
pub const MIN_DIVERGENCE_BARS: usize = 10;

pub const SR_LOOKBACK: usize = 100;
pub const SR_MIN_BARS: usize = 20;
pub const SR_CLUSTER_THRESHOLD: f64 = 0.02;
pub const SR_MAX_LEVELS: usize = 5;

pub const PATTERN_MIN_BARS: usize = 20;
pub const DOUBLE_LOOKBACK: usize = 50;
/// Two swings within this fraction of each other form a double top/bottom.
pub const DOUBLE_TOLERANCE: f64 = 0.02;
pub const TRIANGLE_BARS: usize = 20;
pub const FLAG_POLE_BARS: usize = 30;
pub const FLAG_BARS: usize = 10;
pub const FLAG_POLE_MOVE: f64 = 0.05;
pub const FLAG_MAX_RANGE: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Divergence {
    /// Price lower low, RSI higher low.
    Bullish,
    /// Price higher high, RSI lower high.
    Bearish,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::Bullish => write!(f, "bullish divergence"),
            Divergence::Bearish => write!(f, "bearish divergence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Cross {
    Golden,
    Death,
}

impl fmt::Display for Cross {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cross::Golden => write!(f, "golden cross"),
            Cross::Death => write!(f, "death cross"),
        }
    }
}

fn last_two<T: Copy>(items: &[T]) -> Option<(T, T)> {
    match items {
        [.., prev, last] => Some((*prev, *last)),
        _ => None,
    }
}

fn swings(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut peaks = Vec::new();
    let mut troughs = Vec::new();
    for w in values.windows(3) {
        if w[1] > w[0] && w[1] > w[2] {
            peaks.push(w[1]);
        }
        if w[1] < w[0] && w[1] < w[2] {
            troughs.push(w[1]);
        }
    }
    (peaks, troughs)
}

/// Compare the last two strict swings of price and RSI over aligned slices.
pub fn find_divergence(closes: &[f64], rsi: &[f64]) -> Option<Divergence> {
    let len = closes.len().min(rsi.len());
    if len < MIN_DIVERGENCE_BARS {
        return None;
    }
    let closes = &closes[closes.len() - len..];
    let rsi = &rsi[rsi.len() - len..];

    let (price_peaks, price_troughs) = swings(closes);
    let (rsi_peaks, rsi_troughs) = swings(rsi);

    let mut found = None;
    if let (Some((pp, pl)), Some((rp, rl))) = (last_two(&price_troughs), last_two(&rsi_troughs)) {
        if pl < pp && rl > rp {
            found = Some(Divergence::Bullish);
        }
    }
    // Checked second so a bearish reading wins when both fire.
    if let (Some((pp, pl)), Some((rp, rl))) = (last_two(&price_peaks), last_two(&rsi_peaks)) {
        if pl > pp && rl < rp {
            found = Some(Divergence::Bearish);
        }
    }
    found
}

/// Rolling divergence check over the last `lookback` bars.
#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    lookback: usize,
    window: VecDeque<(f64, Option<f64>)>,
}

impl DivergenceDetector {
    pub fn new(lookback: usize) -> Result<Self, ConfluenceError> {
        if lookback < MIN_DIVERGENCE_BARS {
            return Err(ConfluenceError::invalid_parameter(
                "divergence lookback",
                format!("must be at least {MIN_DIVERGENCE_BARS}"),
            ));
        }
        Ok(DivergenceDetector {
            lookback,
            window: VecDeque::with_capacity(lookback + 1),
        })
    }

    pub fn update(&mut self, close: f64, rsi: Option<f64>) -> Option<Divergence> {
        self.window.push_back((close, rsi));
        if self.window.len() > self.lookback {
            self.window.pop_front();
        }

        // RSI stays valid once warm, so the valid readings form a suffix.
        let (closes, values): (Vec<f64>, Vec<f64>) = self
            .window
            .iter()
            .filter_map(|&(c, r)| r.map(|r| (c, r)))
            .unzip();
        find_divergence(&closes, &values)
    }
}

/// Divergence state at the last bar of `bars`.
pub fn detect_rsi_divergence(
    bars: &[PriceBar],
    rsi_period: usize,
    lookback: usize,
) -> Result<Option<Divergence>, ConfluenceError> {
    let mut rsi = Rsi::new(rsi_period)?;
    let mut detector = DivergenceDetector::new(lookback)?;
    require_bars(&IndicatorKind::Rsi(rsi_period), bars)?;

    let mut last = None;
    for bar in bars {
        last = detector.update(bar.close, rsi.update(bar.close));
    }
    Ok(last)
}

/// Spreads within this fraction of the slow average count as zero.
pub const CROSS_SPREAD_EPSILON: f64 = 1e-12;

/// Flags the bar where fast - slow changes sign.
#[derive(Debug, Clone, Default)]
pub struct CrossDetector {
    prev_spread: Option<f64>,
}

impl CrossDetector {
    pub fn new() -> Self {
        CrossDetector::default()
    }

    /// Takes the (fast, slow) pair once both averages are warm.
    pub fn update(&mut self, pair: Option<(f64, f64)>) -> Option<Cross> {
        let (fast, slow) = pair?;
        let mut spread = fast - slow;
        if spread.abs() <= CROSS_SPREAD_EPSILON * slow.abs() {
            spread = 0.0;
        }
        let prev = self.prev_spread.replace(spread)?;
        if prev <= 0.0 && spread > 0.0 {
            Some(Cross::Golden)
        } else if prev >= 0.0 && spread < 0.0 {
            Some(Cross::Death)
        } else {
            None
        }
    }
}

/// Per-bar cross events of EMA(fast) against EMA(slow), aligned with `bars`.
pub fn detect_crosses(
    bars: &[PriceBar],
    fast: usize,
    slow: usize,
) -> Result<Vec<Option<Cross>>, ConfluenceError> {
    let mut pair = EmaPair::new(fast, slow)?;
    require_bars(&IndicatorKind::EmaPair { fast, slow }, bars)?;
    let mut detector = CrossDetector::new();
    Ok(bars
        .iter()
        .map(|bar| detector.update(pair.update(bar.close)))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SupportResistance {
    /// Nearest first, all below the last close.
    pub support: Vec<f64>,
    /// Nearest first, all above the last close.
    pub resistance: Vec<f64>,
}

fn cluster_levels(mut levels: Vec<f64>) -> Vec<f64> {
    levels.sort_by(f64::total_cmp);
    let mut clustered = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    for level in levels {
        if let Some(&prev) = cluster.last() {
            if (level - prev).abs() / prev >= SR_CLUSTER_THRESHOLD {
                clustered.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
                cluster.clear();
            }
        }
        cluster.push(level);
    }
    if !cluster.is_empty() {
        clustered.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
    }
    clustered
}

/// Highs above the two bars on each side and lows below them, in order.
fn swing_levels(bars: &[PriceBar]) -> (Vec<f64>, Vec<f64>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for w in bars.windows(5) {
        let mid = &w[2];
        if w.iter().enumerate().all(|(i, b)| i == 2 || mid.high > b.high) {
            highs.push(mid.high);
        }
        if w.iter().enumerate().all(|(i, b)| i == 2 || mid.low < b.low) {
            lows.push(mid.low);
        }
    }
    (highs, lows)
}

/// Swing levels over the last 100 bars, relative to the last close.
pub fn find_support_resistance(bars: &[PriceBar]) -> SupportResistance {
    if bars.len() < SR_MIN_BARS {
        tracing::debug!(bars = bars.len(), "too few bars for support/resistance");
        return SupportResistance::default();
    }
    let recent = &bars[bars.len().saturating_sub(SR_LOOKBACK)..];
    let price = recent[recent.len() - 1].close;
    let (highs, lows) = swing_levels(recent);

    let mut support: Vec<f64> = cluster_levels(lows)
        .into_iter()
        .filter(|&s| s < price)
        .collect();
    support.sort_by(|a, b| b.total_cmp(a));
    support.truncate(SR_MAX_LEVELS);

    let mut resistance: Vec<f64> = cluster_levels(highs)
        .into_iter()
        .filter(|&r| r > price)
        .collect();
    resistance.sort_by(f64::total_cmp);
    resistance.truncate(SR_MAX_LEVELS);

    SupportResistance {
        support,
        resistance,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChartPattern {
    DoubleTop,
    DoubleBottom,
    AscendingTriangle,
    DescendingTriangle,
    BullFlag,
    BearFlag,
}

impl ChartPattern {
    pub fn is_bullish(self) -> bool {
        matches!(
            self,
            ChartPattern::DoubleBottom | ChartPattern::AscendingTriangle | ChartPattern::BullFlag
        )
    }

    /// Fixed heuristic confidence in [0, 1].
    pub fn confidence(self) -> f64 {
        match self {
            ChartPattern::DoubleTop | ChartPattern::DoubleBottom => 0.7,
            ChartPattern::AscendingTriangle | ChartPattern::DescendingTriangle => 0.6,
            ChartPattern::BullFlag | ChartPattern::BearFlag => 0.65,
        }
    }
}

impl fmt::Display for ChartPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartPattern::DoubleTop => "double top",
            ChartPattern::DoubleBottom => "double bottom",
            ChartPattern::AscendingTriangle => "ascending triangle",
            ChartPattern::DescendingTriangle => "descending triangle",
            ChartPattern::BullFlag => "bull flag",
            ChartPattern::BearFlag => "bear flag",
        };
        f.write_str(name)
    }
}

/// The last swing matches one of the three before it.
fn has_double(swings: &[f64]) -> bool {
    let Some((&last, earlier)) = swings.split_last() else {
        return false;
    };
    earlier
        .iter()
        .rev()
        .take(3)
        .any(|&prev| (last - prev).abs() / prev < DOUBLE_TOLERANCE)
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den > 0.0 { num / den } else { 0.0 }
}

fn triangle(closes: &[f64]) -> Option<ChartPattern> {
    let recent = &closes[closes.len() - TRIANGLE_BARS..];
    let window = |i: usize| &recent[i.saturating_sub(2)..(i + 3).min(recent.len())];
    let rolling_lows: Vec<f64> = (0..recent.len())
        .map(|i| window(i).iter().copied().fold(f64::INFINITY, f64::min))
        .collect();
    let rolling_highs: Vec<f64> = (0..recent.len())
        .map(|i| window(i).iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .collect();
    let lows_trend = slope(&rolling_lows);
    let highs_trend = slope(&rolling_highs);

    if lows_trend > 0.0 && highs_trend.abs() < lows_trend * 0.3 {
        Some(ChartPattern::AscendingTriangle)
    } else if highs_trend < 0.0 && lows_trend.abs() < highs_trend.abs() * 0.3 {
        Some(ChartPattern::DescendingTriangle)
    } else {
        None
    }
}

fn flag(closes: &[f64]) -> Option<ChartPattern> {
    if closes.len() < FLAG_POLE_BARS {
        return None;
    }
    let pole_start = closes[closes.len() - FLAG_POLE_BARS];
    let pole_end = closes[closes.len() - FLAG_BARS];
    let flag = &closes[closes.len() - FLAG_BARS..];
    let high = flag.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = flag.iter().copied().fold(f64::INFINITY, f64::min);
    let mean = flag.iter().sum::<f64>() / flag.len() as f64;
    let tight = (high - low) / mean < FLAG_MAX_RANGE;

    if pole_end > pole_start * (1.0 + FLAG_POLE_MOVE) {
        tight.then_some(ChartPattern::BullFlag)
    } else if pole_end < pole_start * (1.0 - FLAG_POLE_MOVE) {
        tight.then_some(ChartPattern::BearFlag)
    } else {
        None
    }
}

/// Double tops/bottoms over the last 50 bars' swings, a triangle over the
/// last 20 closes and a flag over the last 30. Empty under 20 bars.
pub fn detect_chart_patterns(bars: &[PriceBar]) -> Vec<ChartPattern> {
    if bars.len() < PATTERN_MIN_BARS {
        tracing::debug!(bars = bars.len(), "too few bars for chart patterns");
        return Vec::new();
    }
    let mut patterns = Vec::new();

    let (highs, lows) = swing_levels(&bars[bars.len().saturating_sub(DOUBLE_LOOKBACK)..]);
    if has_double(&highs) {
        patterns.push(ChartPattern::DoubleTop);
    }
    if has_double(&lows) {
        patterns.push(ChartPattern::DoubleBottom);
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    patterns.extend(triangle(&closes));
    patterns.extend(flag(&closes));
    patterns
}
