//! API clients for market data sources

pub mod eastmoney;
pub mod yahoo;

pub use eastmoney::EastmoneyClient;
pub use yahoo::YahooFinanceClient;

use crate::error::Result;
use crate::market::Instrument;
use crate::series::{Bar, DateRange};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

pub(crate) type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Requests per minute when nothing is configured
pub const DEFAULT_RATE_LIMIT: u32 = 120;

pub(crate) fn rate_limiter(per_minute: u32) -> SharedRateLimiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// One upstream of daily bars
///
/// Implementations pace themselves with a rate limiter and never retry.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Short name used in errors and logs
    fn name(&self) -> &'static str;

    /// Daily bars for `instrument` within `range`, in any order
    async fn fetch_bars(&self, instrument: &Instrument, range: DateRange) -> Result<Vec<Bar>>;
}
