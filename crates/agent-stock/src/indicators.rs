//! Technical indicator computation
//!
//! [`compute`] is pure: the same series always yields the same values.
//! Indicators whose lookback exceeds the series length are `None`, never an
//! error.

use crate::series::{Bar, PriceSeries};
use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    SimpleMovingAverage,
};

/// Indicator windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub volume_ma: usize,
    pub atr_period: usize,
    pub volatility_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ma_short: 5,
            ma_medium: 20,
            ma_long: 60,
            ema_fast: 12,
            ema_slow: 26,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_k: 2.0,
            volume_ma: 20,
            atr_period: 14,
            volatility_window: 20,
        }
    }
}

impl IndicatorParams {
    /// Reject zero windows and inverted MACD periods
    pub fn validate(&self) -> Result<(), String> {
        let windows = [
            ("ma_short", self.ma_short),
            ("ma_medium", self.ma_medium),
            ("ma_long", self.ma_long),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("volume_ma", self.volume_ma),
            ("atr_period", self.atr_period),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, w)| *w == 0) {
            return Err(format!("{name} must be greater than 0"));
        }
        if self.bollinger_period < 2 || self.volatility_window < 2 {
            return Err("bollinger_period and volatility_window need at least 2 bars".to_string());
        }
        if self.macd_fast >= self.macd_slow {
            return Err("macd_fast must be shorter than macd_slow".to_string());
        }
        if !(self.bollinger_k.is_finite() && self.bollinger_k > 0.0) {
            return Err("bollinger_k must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingAverages {
    pub short: Option<f64>,
    pub medium: Option<f64>,
    pub long: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bollinger {
    /// Position of `price` within the bands, 0 at lower and 1 at upper
    pub fn percent_b(&self, price: f64) -> Option<f64> {
        let width = self.upper - self.lower;
        (width > 0.0).then(|| (price - self.lower) / width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    /// Moving average of volume
    pub average: f64,
    /// Latest volume over its average
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaTrend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MacdSignal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeStatus {
    High,
    Low,
    Normal,
}

/// Everything the engine computes for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub bar_count: usize,
    pub last_close: Option<f64>,
    pub moving_averages: MovingAverages,
    pub rsi: Option<f64>,
    pub macd: Option<Macd>,
    pub bollinger: Option<Bollinger>,
    pub volume: Option<VolumeStats>,
    pub atr: Option<f64>,
    /// Standard deviation of closes over their mean, in percent
    pub volatility: Option<f64>,
}

impl IndicatorSet {
    /// A set with nothing available
    pub fn empty(bar_count: usize) -> Self {
        Self {
            bar_count,
            last_close: None,
            moving_averages: MovingAverages {
                short: None,
                medium: None,
                long: None,
                ema_fast: None,
                ema_slow: None,
            },
            rsi: None,
            macd: None,
            bollinger: None,
            volume: None,
            atr: None,
            volatility: None,
        }
    }

    /// Short over medium over long moving average
    pub fn ma_trend(&self) -> Option<MaTrend> {
        let ma = &self.moving_averages;
        let (short, medium) = (ma.short?, ma.medium?);
        let trend = match ma.long {
            Some(long) if short > medium && medium > long => MaTrend::Up,
            Some(long) if short < medium && medium < long => MaTrend::Down,
            Some(_) => MaTrend::Flat,
            None if short > medium => MaTrend::Up,
            None if short < medium => MaTrend::Down,
            None => MaTrend::Flat,
        };
        Some(trend)
    }

    pub fn macd_signal(&self) -> Option<MacdSignal> {
        let macd = self.macd?;
        Some(if macd.macd > macd.signal {
            MacdSignal::Buy
        } else if macd.macd < macd.signal {
            MacdSignal::Sell
        } else {
            MacdSignal::Hold
        })
    }

    pub fn volume_status(&self) -> Option<VolumeStatus> {
        let ratio = self.volume?.ratio;
        Some(if ratio > 1.5 {
            VolumeStatus::High
        } else if ratio < 0.5 {
            VolumeStatus::Low
        } else {
            VolumeStatus::Normal
        })
    }

    /// Number of headline indicators present
    pub fn available_count(&self) -> usize {
        [
            self.moving_averages.short.is_some(),
            self.rsi.is_some(),
            self.macd.is_some(),
            self.bollinger.is_some(),
            self.volume.is_some(),
        ]
        .iter()
        .filter(|x| **x)
        .count()
    }
}

/// Compute every indicator the series is long enough for
pub fn compute(series: &PriceSeries, params: &IndicatorParams) -> IndicatorSet {
    let bars = series.bars();
    let closes = series.closes();
    let mut set = IndicatorSet::empty(bars.len());
    set.last_close = closes.last().copied();

    set.moving_averages = MovingAverages {
        short: sma(&closes, params.ma_short),
        medium: sma(&closes, params.ma_medium),
        long: sma(&closes, params.ma_long),
        ema_fast: ema(&closes, params.ema_fast),
        ema_slow: ema(&closes, params.ema_slow),
    };
    set.rsi = wilder_rsi(&closes, params.rsi_period);
    set.macd = macd(&closes, params);
    set.bollinger = bollinger(&closes, params.bollinger_period, params.bollinger_k);
    set.volume = volume_stats(bars, params.volume_ma);
    set.atr = atr(bars, params.atr_period);
    set.volatility = tail(&closes, params.volatility_window).and_then(|w| {
        let mean = mean(w);
        (mean != 0.0).then(|| sample_std(w, mean) / mean * 100.0)
    });

    set
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn tail(values: &[f64], n: usize) -> Option<&[f64]> {
    (n > 0 && values.len() >= n).then(|| &values[values.len() - n..])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let mut indicator = SimpleMovingAverage::new(period).ok()?;
    let last = closes.iter().fold(f64::NAN, |_, &c| indicator.next(c));
    finite(last)
}

fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let mut indicator = ExponentialMovingAverage::new(period).ok()?;
    let last = closes.iter().fold(f64::NAN, |_, &c| indicator.next(c));
    finite(last)
}

fn macd(closes: &[f64], params: &IndicatorParams) -> Option<Macd> {
    if closes.len() < params.macd_slow {
        return None;
    }
    let mut indicator =
        MovingAverageConvergenceDivergence::new(params.macd_fast, params.macd_slow, params.macd_signal)
            .ok()?;
    let out = closes.iter().map(|&c| indicator.next(c)).last()?;
    Some(Macd {
        macd: finite(out.macd)?,
        signal: finite(out.signal)?,
        histogram: finite(out.histogram)?,
    })
}

/// RSI with Wilder smoothing, `avg = (avg * (n - 1) + x) / n`
///
/// Seeded with the simple average of the first `period` changes. The `ta`
/// crate smooths RSI as an EMA with `alpha = 2 / (n + 1)`, which reads
/// higher and faster than the conventional figure.
fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = changes.split_at(period);
    let n = period as f64;

    let mut avg_gain = seed.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
    let mut avg_loss = seed.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;
    for c in rest {
        avg_gain = (avg_gain * (n - 1.0) + c.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-c).max(0.0)) / n;
    }

    let rsi = if avg_loss == 0.0 {
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    finite(rsi)
}

/// Bollinger bands at `mean ± k * s` over the trailing window, `s` the sample
/// standard deviation (divisor `n - 1`) where `ta` uses the population one
fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<Bollinger> {
    if period < 2 {
        return None;
    }
    let window = tail(closes, period)?;
    let middle = mean(window);
    let sd = sample_std(window, middle);
    Some(Bollinger {
        upper: finite(middle + k * sd)?,
        middle: finite(middle)?,
        lower: finite(middle - k * sd)?,
    })
}

fn volume_stats(bars: &[Bar], period: usize) -> Option<VolumeStats> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let volumes: Vec<f64> = bars[bars.len() - period..].iter().map(|b| b.volume).collect();
    let average = mean(&volumes);
    let last = *volumes.last()?;
    if average <= 0.0 {
        return None;
    }
    Some(VolumeStats {
        average: finite(average)?,
        ratio: finite(last / average)?,
    })
}

fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let mut indicator = AverageTrueRange::new(period).ok()?;
    let last = bars.iter().fold(f64::NAN, |_, bar| indicator.next(bar));
    finite(last)
}
