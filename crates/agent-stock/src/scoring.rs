//! Composite scoring of an indicator set
//!
//! Five signals each map to a 0-100 sub-score. Signals whose indicators are
//! unavailable drop out and the remaining weights are renormalised to sum
//! to one. With no signals at all the score is [`Score::InsufficientData`].

use crate::indicators::IndicatorSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scoring signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Moving average alignment against the close
    Trend,
    /// RSI level
    Momentum,
    /// MACD line against its signal line and zero
    Macd,
    /// Close position within the Bollinger bands
    Bollinger,
    /// Latest volume against its average
    Volume,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Trend,
        Signal::Momentum,
        Signal::Macd,
        Signal::Bollinger,
        Signal::Volume,
    ];
}

/// Relative weight of each signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub trend: f64,
    pub momentum: f64,
    pub macd: f64,
    pub bollinger: f64,
    pub volume: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            trend: 0.30,
            momentum: 0.20,
            macd: 0.20,
            bollinger: 0.15,
            volume: 0.15,
        }
    }
}

impl SignalWeights {
    pub fn get(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Trend => self.trend,
            Signal::Momentum => self.momentum,
            Signal::Macd => self.macd,
            Signal::Bollinger => self.bollinger,
            Signal::Volume => self.volume,
        }
    }
}

/// Lower bounds of each recommendation band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub strong_buy: f64,
    pub buy: f64,
    pub hold: f64,
    pub sell: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            strong_buy: 80.0,
            buy: 60.0,
            hold: 40.0,
            sell: 20.0,
        }
    }
}

/// Scorer configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: SignalWeights,
    pub thresholds: Thresholds,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        let weights: Vec<f64> = Signal::ALL.iter().map(|s| self.weights.get(*s)).collect();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("signal weights must be finite and non-negative".to_string());
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err("at least one signal weight must be positive".to_string());
        }

        let t = &self.thresholds;
        let ordered = [100.0, t.strong_buy, t.buy, t.hold, t.sell, 0.0]
            .windows(2)
            .all(|w| w[0] >= w[1]);
        if !ordered {
            return Err("thresholds must satisfy 100 >= strong_buy >= buy >= hold >= sell >= 0".to_string());
        }
        Ok(())
    }
}

/// Recommendation label, ordered from most bearish to most bullish
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl Recommendation {
    pub fn label(self) -> &'static str {
        match self {
            Self::StrongSell => "strong sell",
            Self::Sell => "sell",
            Self::Hold => "hold",
            Self::Buy => "buy",
            Self::StrongBuy => "strong buy",
        }
    }

    fn from_value(value: f64, t: &Thresholds) -> Self {
        if value >= t.strong_buy {
            Self::StrongBuy
        } else if value >= t.buy {
            Self::Buy
        } else if value >= t.hold {
            Self::Hold
        } else if value >= t.sell {
            Self::Sell
        } else {
            Self::StrongSell
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One signal's part in a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub signal: Signal,
    /// Sub-score in [0, 100]
    pub sub_score: f64,
    /// Renormalised weight; contributions of one score sum to 1
    pub weight: f64,
}

/// Composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Score {
    Rated {
        value: f64,
        recommendation: Recommendation,
        contributions: Vec<Contribution>,
    },
    /// No signal could be evaluated
    InsufficientData,
}

impl Score {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Rated { value, .. } => Some(*value),
            Self::InsufficientData => None,
        }
    }

    pub fn recommendation(&self) -> Option<Recommendation> {
        match self {
            Self::Rated { recommendation, .. } => Some(*recommendation),
            Self::InsufficientData => None,
        }
    }

    /// Whether this score clears a scan threshold
    ///
    /// Unrated instruments only pass a threshold of zero or below.
    pub fn passes(&self, min_score: f64) -> bool {
        match self {
            Self::Rated { value, .. } => *value >= min_score,
            Self::InsufficientData => min_score <= 0.0,
        }
    }

    /// Sort key, unrated last
    pub fn sort_key(&self) -> f64 {
        self.value().unwrap_or(f64::NEG_INFINITY)
    }
}

/// Maps indicator sets to scores
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScoringConfig,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, set: &IndicatorSet) -> Score {
        let available: Vec<(Signal, f64, f64)> = Signal::ALL
            .iter()
            .filter_map(|&signal| {
                let weight = self.config.weights.get(signal);
                let sub = sub_score(signal, set)?;
                (weight > 0.0 && sub.is_finite()).then_some((signal, sub.clamp(0.0, 100.0), weight))
            })
            .collect();

        let total: f64 = available.iter().map(|(_, _, w)| w).sum();
        if available.is_empty() || total <= 0.0 || !total.is_finite() {
            return Score::InsufficientData;
        }

        let contributions: Vec<Contribution> = available
            .into_iter()
            .map(|(signal, sub_score, weight)| Contribution {
                signal,
                sub_score,
                weight: weight / total,
            })
            .collect();

        let raw: f64 = contributions.iter().map(|c| c.sub_score * c.weight).sum();
        let value = if raw.is_finite() { raw.clamp(0.0, 100.0) } else { 50.0 };
        let value = (value * 100.0).round() / 100.0;

        Score::Rated {
            value,
            recommendation: Recommendation::from_value(value, &self.config.thresholds),
            contributions,
        }
    }
}

/// Sub-score of one signal, `None` when its inputs are unavailable
fn sub_score(signal: Signal, set: &IndicatorSet) -> Option<f64> {
    match signal {
        Signal::Trend => {
            let ma = &set.moving_averages;
            let (short, medium, close) = (ma.short?, ma.medium?, set.last_close?);
            let score = match ma.long {
                Some(long) if short > medium && medium > long => 100.0,
                Some(long) if short < medium && medium < long => 0.0,
                _ if short > medium && close > medium => 80.0,
                _ if short > medium => 65.0,
                _ if close > medium => 50.0,
                _ if short < medium && close < medium => 15.0,
                _ => 35.0,
            };
            Some(score)
        }
        Signal::Momentum => set.rsi,
        Signal::Macd => {
            let m = set.macd?;
            let score = if m.macd > m.signal && m.macd > 0.0 {
                100.0
            } else if m.macd > m.signal {
                70.0
            } else if m.macd < m.signal && m.macd < 0.0 {
                0.0
            } else {
                30.0
            };
            Some(score)
        }
        Signal::Bollinger => {
            let bands = set.bollinger?;
            let close = set.last_close?;
            Some(bands.percent_b(close).map_or(50.0, |b| b * 100.0))
        }
        Signal::Volume => {
            let ratio = set.volume?.ratio;
            let score = if ratio >= 1.5 {
                80.0
            } else if ratio > 1.0 {
                65.0
            } else if ratio >= 0.5 {
                50.0
            } else {
                35.0
            };
            Some(score)
        }
    }
}
