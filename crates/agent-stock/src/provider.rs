//! Market data provider
//!
//! Routes each instrument to the source serving its market and caches the
//! resulting series by `(instrument, range)`.

use crate::api::{EastmoneyClient, MarketDataSource, YahooFinanceClient};
use crate::cache::{CacheKey, SeriesCache};
use crate::config::ServiceConfig;
use crate::error::{Result, StockError};
use crate::market::{Instrument, SourceKind};
use crate::series::{DateRange, PriceSeries, Quote};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Calendar days read to derive a quote
pub const QUOTE_WINDOW_DAYS: i64 = 30;

/// Source of price history and quotes
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Daily bars for `instrument` within `range`
    async fn fetch_history(&self, instrument: &Instrument, range: DateRange) -> Result<Arc<PriceSeries>>;

    /// Latest quote, derived from the last two bars
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<Quote> {
        let series = self
            .fetch_history(instrument, DateRange::trailing(QUOTE_WINDOW_DAYS))
            .await?;
        series
            .latest_quote()
            .ok_or_else(|| StockError::NotFound(format!("no recent bars for {instrument}")))
    }
}

/// Provider backed by Eastmoney for mainland listings and Yahoo elsewhere
#[derive(Clone)]
pub struct MarketDataProvider {
    eastmoney: Arc<dyn MarketDataSource>,
    yahoo: Arc<dyn MarketDataSource>,
    cache: SeriesCache,
}

impl MarketDataProvider {
    /// Provider over explicit sources
    pub fn new(eastmoney: Arc<dyn MarketDataSource>, yahoo: Arc<dyn MarketDataSource>, cache: SeriesCache) -> Self {
        Self {
            eastmoney,
            yahoo,
            cache,
        }
    }

    /// Provider with the live clients described by `config`
    ///
    /// Builds the HTTP clients only; nothing is sent until the first fetch.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let rate_limit = Some(config.upstream_rate_limit);
        let cache = SeriesCache::with_clock(
            config.cache_ttl,
            config.cache_capacity,
            Arc::new(crate::cache::SystemClock),
        );
        Ok(Self::new(
            Arc::new(EastmoneyClient::new(config.request_timeout, rate_limit)?),
            Arc::new(YahooFinanceClient::new(config.request_timeout, rate_limit)?),
            cache,
        ))
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    fn source_for(&self, instrument: &Instrument) -> &Arc<dyn MarketDataSource> {
        match instrument.market().source() {
            SourceKind::Eastmoney => &self.eastmoney,
            SourceKind::Yahoo => &self.yahoo,
        }
    }
}

#[async_trait]
impl DataProvider for MarketDataProvider {
    #[instrument(skip(self), fields(instrument = %instrument))]
    async fn fetch_history(&self, instrument: &Instrument, range: DateRange) -> Result<Arc<PriceSeries>> {
        let source = Arc::clone(self.source_for(instrument));
        let key = CacheKey::new(instrument, range);

        self.cache
            .get_or_fetch(key, || async move {
                let bars = source.fetch_bars(instrument, range).await?;
                if bars.is_empty() {
                    return Err(StockError::NotFound(format!(
                        "{} returned no bars for {instrument} between {} and {}",
                        source.name(),
                        range.start(),
                        range.end()
                    )));
                }
                debug!(source = source.name(), bars = bars.len(), "Fetched history");
                PriceSeries::new(instrument.clone(), bars)
            })
            .await
    }
}

impl std::fmt::Debug for MarketDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataProvider")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
