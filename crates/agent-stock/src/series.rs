//! Price history, date ranges and quotes

use crate::error::{Result, StockError};
use crate::market::Instrument;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Earliest date the service will ask upstreams for
pub fn min_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Default trailing window for history requests
pub const DEFAULT_HISTORY_DAYS: i64 = 365;

/// One trading day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Turnover in currency, when the source reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Percent change vs the previous close as reported by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            amount: None,
            change_pct: None,
        }
    }

    pub fn with_change_pct(mut self, change_pct: f64) -> Self {
        self.change_pct = Some(change_pct);
        self
    }

    fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

impl ta::Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Ascending, duplicate-free daily history of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    instrument: Instrument,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Sort and validate bars
    ///
    /// Rejects duplicate dates and non-finite prices or volumes.
    pub fn new(instrument: Instrument, mut bars: Vec<Bar>) -> Result<Self> {
        if let Some(bad) = bars.iter().find(|b| !b.is_finite()) {
            return Err(StockError::InvalidInput(format!(
                "non-finite bar for {instrument} on {}",
                bad.date
            )));
        }

        bars.sort_by_key(|b| b.date);
        if let Some(pair) = bars.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(StockError::InvalidInput(format!(
                "duplicate bar for {instrument} on {}",
                pair[0].date
            )));
        }

        Ok(Self { instrument, bars })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Percent change of the close over the last `n` bars
    pub fn return_over(&self, n: usize) -> Option<f64> {
        let len = self.bars.len();
        if n == 0 || len <= n {
            return None;
        }
        let base = self.bars[len - 1 - n].close;
        let last = self.bars[len - 1].close;
        (base != 0.0).then(|| (last - base) / base * 100.0)
    }

    /// Quote as of the latest bar
    pub fn latest_quote(&self) -> Option<Quote> {
        let last = self.bars.last()?;
        let prev_close = self
            .bars
            .len()
            .checked_sub(2)
            .map(|i| self.bars[i].close);

        let change = prev_close.map_or(0.0, |p| last.close - p);
        let change_pct = last.change_pct.unwrap_or_else(|| match prev_close {
            Some(p) if p != 0.0 => change / p * 100.0,
            _ => 0.0,
        });

        Some(Quote {
            instrument: self.instrument.clone(),
            date: last.date,
            price: last.close,
            open: last.open,
            high: last.high,
            low: last.low,
            volume: last.volume,
            prev_close,
            change,
            change_pct,
        })
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Validate against today's date
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        Self::new_as_of(start, end, Utc::now().date_naive())
    }

    /// Validate against an explicit `today`
    pub fn new_as_of(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(StockError::InvalidRange(format!("start {start} is after end {end}")));
        }
        let min = min_date();
        if start < min {
            return Err(StockError::InvalidRange(format!("start {start} is before {min}")));
        }
        if end > today {
            return Err(StockError::InvalidRange(format!("end {end} is in the future")));
        }
        Ok(Self { start, end })
    }

    /// The trailing `days` calendar days ending today
    pub fn trailing(days: i64) -> Self {
        let end = Utc::now().date_naive();
        let start = (end - Duration::days(days.max(0))).max(min_date());
        Self { start, end }
    }

    /// Parse `YYYYMMDD` or `YYYY-MM-DD` bounds; missing bounds use the default window
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let default = Self::trailing(DEFAULT_HISTORY_DAYS);
        let end = end.map(parse_date).transpose()?.unwrap_or(default.end);
        let start = match start {
            Some(s) => parse_date(s)?,
            None => end - Duration::days(DEFAULT_HISTORY_DAYS),
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::trailing(DEFAULT_HISTORY_DAYS)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| StockError::InvalidRange(format!("unparseable date: {raw}")))
}

/// Latest price snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub prev_close: Option<f64>,
    pub change: f64,
    pub change_pct: f64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::market::MarketType;

    pub fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    /// Bars with the given closes, one per day, flat-ish candles
    pub fn series_from_closes(code: &str, closes: &[f64]) -> PriceSeries {
        let instrument = Instrument::parse(code, MarketType::AShare).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(day(i as i64), c, c * 1.01, c * 0.99, c, 1_000.0 + i as f64))
            .collect();
        PriceSeries::new(instrument, bars).unwrap()
    }

    pub fn ascending(code: &str, n: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 * 0.5).collect();
        series_from_closes(code, &closes)
    }

    pub fn descending(code: &str, n: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..n).map(|i| 30.0 - i as f64 * 0.5).collect();
        series_from_closes(code, &closes)
    }
}
