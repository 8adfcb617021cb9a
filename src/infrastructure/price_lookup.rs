//! Price lookup implementations: a fixed in-memory table and an LRU/TTL cache
//! in front of any other lookup.

use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::PriceLookupError;
use crate::domain::repositories::price_lookup::{PriceLookup, PriceResult};

/// Prices held in memory, set by the embedding process or by tests
#[derive(Debug, Default)]
pub struct StaticPriceLookup {
    prices: RwLock<HashMap<String, f64>>,
}

impl StaticPriceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let lookup = Self::new();
        for (token, price) in prices {
            lookup.set_price(token, price);
        }
        lookup
    }

    pub fn set_price(&self, instrument_token: impl Into<String>, price: f64) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(instrument_token.into(), price);
    }

    pub fn remove_price(&self, instrument_token: &str) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.remove(instrument_token);
    }
}

#[async_trait]
impl PriceLookup for StaticPriceLookup {
    async fn get_price(&self, instrument_token: &str) -> PriceResult<f64> {
        let price = {
            let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
            prices.get(instrument_token).copied()
        };

        match price {
            Some(price) if price.is_finite() && price > 0.0 => Ok(price),
            Some(price) => Err(PriceLookupError::InvalidPrice {
                token: instrument_token.to_string(),
                price,
            }),
            None => Err(PriceLookupError::Unavailable(instrument_token.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

/// Bounded, time-limited cache over another lookup. Failures are not cached.
pub struct CachedPriceLookup {
    inner: Arc<dyn PriceLookup>,
    cache: Mutex<LruCache<String, CachedPrice>>,
    ttl: Duration,
}

impl CachedPriceLookup {
    pub fn new(inner: Arc<dyn PriceLookup>, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

#[async_trait]
impl PriceLookup for CachedPriceLookup {
    async fn get_price(&self, instrument_token: &str) -> PriceResult<f64> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(instrument_token) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.price);
                }
            }
        }

        // Lock released while the inner lookup runs
        let price = self.inner.get_price(instrument_token).await?;
        debug!("Cached price for {}: {}", instrument_token, price);

        let mut cache = self.cache.lock().await;
        cache.put(
            instrument_token.to_string(),
            CachedPrice {
                price,
                fetched_at: Instant::now(),
            },
        );
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        inner: StaticPriceLookup,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceLookup for CountingLookup {
        async fn get_price(&self, instrument_token: &str) -> PriceResult<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_price(instrument_token).await
        }
    }

    fn counting(prices: &[(&str, f64)]) -> Arc<CountingLookup> {
        Arc::new(CountingLookup {
            inner: StaticPriceLookup::with_prices(prices.iter().map(|(t, p)| (t.to_string(), *p))),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let prices = StaticPriceLookup::with_prices([("INFY", 1500.0), ("BAD", 0.0)]);

        assert_eq!(prices.get_price("INFY").await, Ok(1500.0));
        assert!(matches!(
            prices.get_price("BAD").await,
            Err(PriceLookupError::InvalidPrice { .. })
        ));
        assert_eq!(
            prices.get_price("TCS").await,
            Err(PriceLookupError::Unavailable("TCS".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let inner = counting(&[("INFY", 1500.0)]);
        let cached = CachedPriceLookup::new(inner.clone(), NonZeroUsize::new(8).unwrap(), Duration::from_secs(60));

        assert_eq!(cached.get_price("INFY").await, Ok(1500.0));
        assert_eq!(cached.get_price("INFY").await, Ok(1500.0));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let inner = counting(&[("INFY", 1500.0)]);
        let cached = CachedPriceLookup::new(inner.clone(), NonZeroUsize::new(8).unwrap(), Duration::ZERO);

        cached.get_price("INFY").await.unwrap();
        cached.get_price("INFY").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let inner = counting(&[]);
        let cached = CachedPriceLookup::new(inner.clone(), NonZeroUsize::new(8).unwrap(), Duration::from_secs(60));

        assert!(cached.get_price("TCS").await.is_err());
        assert!(cached.get_price("TCS").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let inner = counting(&[("A", 1.0), ("B", 2.0), ("C", 3.0)]);
        let cached = CachedPriceLookup::new(inner.clone(), NonZeroUsize::new(2).unwrap(), Duration::from_secs(60));

        cached.get_price("A").await.unwrap();
        cached.get_price("B").await.unwrap();
        cached.get_price("C").await.unwrap();
        assert_eq!(cached.len().await, 2);

        // "A" was evicted, so it is fetched again
        cached.get_price("A").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }
}
