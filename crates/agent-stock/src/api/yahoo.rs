//! Yahoo Finance API client
//!
//! Serves daily bars for Hong Kong and US listings.

use super::{DEFAULT_RATE_LIMIT, MarketDataSource, SharedRateLimiter, rate_limiter};
use crate::error::{Result, StockError};
use crate::market::Instrument;
use crate::series::{Bar, DateRange};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use yahoo_finance_api as yahoo;

const SOURCE: &str = "yahoo";

/// Yahoo Finance API client
pub struct YahooFinanceClient {
    connector: yahoo::YahooConnector,
    timeout: Duration,
    rate_limiter: SharedRateLimiter,
}

impl YahooFinanceClient {
    /// Create a new Yahoo Finance client
    ///
    /// `timeout` bounds each HTTP request and the whole fetch.
    pub fn new(timeout: Duration, rate_limit: Option<u32>) -> Result<Self> {
        let connector = yahoo::YahooConnector::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StockError::Config(format!("failed to build Yahoo client: {e}")))?;

        Ok(Self {
            connector,
            timeout,
            rate_limiter: rate_limiter(rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)),
        })
    }

    async fn history(&self, symbol: &str, range: DateRange) -> Result<Vec<Bar>> {
        let start = to_offset(range.start().and_time(NaiveTime::MIN).and_utc().timestamp())?;
        // end of day so the last session is included
        let end = to_offset(range.end().and_time(NaiveTime::MIN).and_utc().timestamp() + 86_399)?;

        let response = self
            .connector
            .get_quote_history(symbol, start, end)
            .await
            .map_err(|e| classify(&e.to_string()))?;

        let quotes = response.quotes().map_err(|e| classify(&e.to_string()))?;

        quotes
            .iter()
            .map(|q| {
                let date = DateTime::from_timestamp(q.timestamp as i64, 0)
                    .ok_or_else(|| StockError::unavailable(SOURCE, format!("bad timestamp {}", q.timestamp)))?
                    .date_naive();
                Ok(Bar::new(date, q.open, q.high, q.low, q.close, q.volume as f64))
            })
            .collect()
    }
}

fn to_offset(timestamp: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|e| StockError::InvalidRange(format!("invalid timestamp: {e}")))
}

/// Map a Yahoo error message onto the service taxonomy
///
/// The client library reports most failures as strings, so classification
/// works on the message text.
fn classify(message: &str) -> StockError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("too many") || lower.contains("429") || lower.contains("rate limit") {
        StockError::RateLimited {
            source_name: SOURCE.to_string(),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        StockError::UpstreamTimeout {
            source_name: SOURCE.to_string(),
        }
    } else if lower.contains("no data")
        || lower.contains("no result")
        || lower.contains("not found")
        || lower.contains("empty")
        || lower.contains("404")
    {
        StockError::NotFound(format!("{SOURCE}: {message}"))
    } else {
        StockError::unavailable(SOURCE, message)
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    #[instrument(skip(self), fields(symbol = %instrument.source_symbol()))]
    async fn fetch_bars(&self, instrument: &Instrument, range: DateRange) -> Result<Vec<Bar>> {
        self.rate_limiter.until_ready().await;

        let symbol = instrument.source_symbol();
        let bars = tokio::time::timeout(self.timeout, self.history(&symbol, range))
            .await
            .map_err(|_| StockError::UpstreamTimeout {
                source_name: SOURCE.to_string(),
            })??;

        debug!("Received {} bars", bars.len());
        Ok(bars)
    }
}
