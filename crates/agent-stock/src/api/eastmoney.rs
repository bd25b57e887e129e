//! Eastmoney kline API client
//!
//! Serves daily bars for mainland equities and exchange listed funds.
//! Prices are forward adjusted.

use super::{DEFAULT_RATE_LIMIT, MarketDataSource, SharedRateLimiter, rate_limiter};
use crate::error::{Result, StockError};
use crate::market::Instrument;
use crate::series::{Bar, DateRange};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

const EASTMONEY_BASE_URL: &str = "https://push2his.eastmoney.com";
const KLINE_PATH: &str = "/api/qt/stock/kline/get";
const SOURCE: &str = "eastmoney";

/// Eastmoney API client
pub struct EastmoneyClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    rate_limiter: SharedRateLimiter,
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(default)]
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

impl EastmoneyClient {
    /// Create a new client
    ///
    /// `rate_limit` is requests per minute.
    pub fn new(timeout: Duration, rate_limit: Option<u32>) -> Result<Self> {
        Self::with_base_url(EASTMONEY_BASE_URL, timeout, rate_limit)
    }

    /// Create a client against a different host
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration, rate_limit: Option<u32>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StockError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            rate_limiter: rate_limiter(rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)),
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> StockError {
        if e.is_timeout() {
            debug!("Eastmoney request timed out after {:?}", self.timeout);
            StockError::UpstreamTimeout {
                source_name: SOURCE.to_string(),
            }
        } else {
            StockError::unavailable(SOURCE, e.to_string())
        }
    }
}

/// Exchange prefix for the `secid` parameter
///
/// Shanghai listings (stocks 6xxxxx, funds 5xxxxx, B shares 9xxxxx) are `1`,
/// everything else (Shenzhen, Beijing) is `0`.
pub fn secid(code: &str) -> String {
    let market = match code.as_bytes().first() {
        Some(b'5' | b'6' | b'9') => 1,
        _ => 0,
    };
    format!("{market}.{code}")
}

/// Parse one `date,open,close,high,low,volume,amount,amplitude,change_pct,...` line
fn parse_kline(line: &str) -> Result<Bar> {
    let fields: Vec<&str> = line.split(',').collect();
    let malformed = || StockError::unavailable(SOURCE, format!("malformed kline: {line}"));
    if fields.len() < 6 {
        return Err(malformed());
    }

    let num = |i: usize| -> Result<f64> { fields[i].trim().parse::<f64>().map_err(|_| malformed()) };
    let opt = |i: usize| fields.get(i).and_then(|v| v.trim().parse::<f64>().ok());

    let date = NaiveDate::parse_from_str(fields[0].trim(), "%Y-%m-%d").map_err(|_| malformed())?;
    Ok(Bar {
        date,
        open: num(1)?,
        close: num(2)?,
        high: num(3)?,
        low: num(4)?,
        volume: num(5)?,
        amount: opt(6),
        change_pct: opt(8),
    })
}

#[async_trait]
impl MarketDataSource for EastmoneyClient {
    fn name(&self) -> &'static str {
        SOURCE
    }

    #[instrument(skip(self), fields(code = %instrument.code()))]
    async fn fetch_bars(&self, instrument: &Instrument, range: DateRange) -> Result<Vec<Bar>> {
        self.rate_limiter.until_ready().await;

        let beg = range.start().format("%Y%m%d").to_string();
        let end = range.end().format("%Y%m%d").to_string();
        let secid = secid(instrument.code());
        let params = [
            ("secid", secid.as_str()),
            ("klt", "101"),
            ("fqt", "1"),
            ("beg", beg.as_str()),
            ("end", end.as_str()),
            ("fields1", "f1,f2,f3,f4,f5,f6"),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
        ];

        let response = self
            .client
            .get(format!("{}{KLINE_PATH}", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(StockError::RateLimited {
                    source_name: SOURCE.to_string(),
                });
            }
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
                return Err(StockError::UpstreamTimeout {
                    source_name: SOURCE.to_string(),
                });
            }
            s => return Err(StockError::unavailable(SOURCE, format!("HTTP {s}"))),
        }

        let body: KlineResponse = response
            .json()
            .await
            .map_err(|e| StockError::unavailable(SOURCE, format!("failed to parse response: {e}")))?;

        let data = body
            .data
            .ok_or_else(|| StockError::NotFound(format!("{instrument} is unknown to {SOURCE}")))?;

        debug!("Received {} klines", data.klines.len());
        data.klines.iter().map(|line| parse_kline(line)).collect()
    }
}
