//! Caching layer for price history to reduce upstream calls

use crate::market::Instrument;
use crate::series::{DateRange, PriceSeries};
use cached::{Cached, SizedCache};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Source of monotonic time for expiry decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + offset
    }
}

/// Cache key for history requests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub instrument: Instrument,
    pub range: DateRange,
}

impl CacheKey {
    pub fn new(instrument: &Instrument, range: DateRange) -> Self {
        Self {
            instrument: instrument.clone(),
            range,
        }
    }
}

#[derive(Clone)]
struct Entry {
    inserted_at: Instant,
    series: Arc<PriceSeries>,
}

/// Thread-safe TTL cache of price series
///
/// Entries older than the TTL are treated as absent and dropped on access.
/// Capacity is bounded; the least recently used entry goes first.
#[derive(Clone)]
pub struct SeriesCache {
    entries: Arc<RwLock<SizedCache<CacheKey, Entry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SeriesCache {
    /// Default number of cached series
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a cache on the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Self::DEFAULT_CAPACITY, Arc::new(SystemClock))
    }

    /// Create a cache with explicit capacity and clock
    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(SizedCache::with_size(capacity.max(1)))),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a fresh value from the cache
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<PriceSeries>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let lookup = entries.cache_get(key).map(|entry| {
            let fresh = now.duration_since(entry.inserted_at) < self.ttl;
            (fresh, Arc::clone(&entry.series))
        });

        match lookup {
            Some((true, series)) => Some(series),
            Some((false, _)) => {
                entries.cache_remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value into the cache
    pub async fn insert(&self, key: CacheKey, series: Arc<PriceSeries>) {
        let entry = Entry {
            inserted_at: self.clock.now(),
            series,
        };
        let mut entries = self.entries.write().await;
        entries.cache_set(key, entry);
    }

    /// Get or fetch a value using the provided fetcher
    ///
    /// Errors from the fetcher are returned and not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: CacheKey, fetcher: F) -> Result<Arc<PriceSeries>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PriceSeries, E>>,
    {
        if let Some(series) = self.get(&key).await {
            tracing::debug!(instrument = %key.instrument, "Cache hit");
            return Ok(series);
        }

        tracing::debug!(instrument = %key.instrument, "Cache miss");
        let series = Arc::new(fetcher().await?);
        self.insert(key, Arc::clone(&series)).await;
        Ok(series)
    }

    /// Invalidate a specific cache entry
    pub async fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.write().await;
        entries.cache_remove(key);
    }

    /// Clear all cached entries
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.cache_clear();
    }

    /// Number of stored entries, including ones not yet evicted
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl fmt::Debug for SeriesCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesCache")
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::fixtures::{day, series_from_closes};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key_for(series: &PriceSeries) -> CacheKey {
        let range = DateRange::new_as_of(day(0), day(10), day(30)).unwrap();
        CacheKey::new(series.instrument(), range)
    }

    fn cache_with_clock(ttl: Duration) -> (SeriesCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = SeriesCache::with_clock(ttl, 16, clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_cache_insert_and_get() {
        let (cache, _) = cache_with_clock(Duration::from_secs(60));
        let series = series_from_closes("600519", &[1.0, 2.0]);
        let key = key_for(&series);

        cache.insert(key.clone(), Arc::new(series.clone())).await;
        assert_eq!(cache.get(&key).await.as_deref(), Some(&series));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_expires_with_clock() {
        let (cache, clock) = cache_with_clock(Duration::from_secs(60));
        let series = series_from_closes("600519", &[1.0]);
        let key = key_for(&series);
        cache.insert(key.clone(), Arc::new(series)).await;

        clock.advance(Duration::from_secs(59));
        assert!(cache.get(&key).await.is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&key).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_get_or_fetch() {
        let (cache, clock) = cache_with_clock(Duration::from_secs(60));
        let series = series_from_closes("600519", &[1.0]);
        let key = key_for(&series);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let fetched = cache
                .get_or_fetch(key.clone(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(series.clone())
                })
                .await
                .unwrap();
            assert_eq!(fetched.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        cache
            .get_or_fetch(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(series.clone())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_not_cached() {
        let (cache, _) = cache_with_clock(Duration::from_secs(60));
        let series = series_from_closes("600519", &[1.0]);
        let key = key_for(&series);

        let result = cache
            .get_or_fetch(key.clone(), || async { Err::<PriceSeries, _>("boom") })
            .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let (cache, _) = cache_with_clock(Duration::from_secs(60));
        let series = series_from_closes("600519", &[1.0]);
        let key = key_for(&series);

        cache.insert(key.clone(), Arc::new(series.clone())).await;
        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());

        cache.insert(key.clone(), Arc::new(series)).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
