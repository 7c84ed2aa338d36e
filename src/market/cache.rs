//! Read-through price cache with a short TTL

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::MarkPrice;

/// Price cache keyed by symbol.
///
/// Entries older than the TTL are treated as missing; there is no
/// invalidation API.
pub struct PriceCache {
    entries: RwLock<HashMap<String, (MarkPrice, Instant)>>,
    ttl: Duration,
}

impl PriceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Fresh cached price, if any
    pub async fn get(&self, symbol: &str) -> Option<MarkPrice> {
        let entries = self.entries.read().await;
        match entries.get(symbol) {
            Some((price, fetched_at)) if fetched_at.elapsed() < self.ttl => {
                debug!("Price cache hit for {}", symbol);
                Some(price.clone())
            }
            _ => None,
        }
    }

    /// Store a freshly fetched price and drop expired entries
    pub async fn put(&self, symbol: &str, price: MarkPrice) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, (_, fetched_at)| fetched_at.elapsed() < ttl);
        entries.insert(symbol.to_string(), (price, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn price(symbol: &str, mark: i64) -> MarkPrice {
        MarkPrice {
            symbol: symbol.to_string(),
            mark_price: Decimal::from(mark),
            index_price: Decimal::from(mark),
            funding_rate: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = PriceCache::new(Duration::from_secs(60));
        cache.put("BTCUSDT", price("BTCUSDT", 65000)).await;

        let cached = cache.get("BTCUSDT").await.unwrap();
        assert_eq!(cached.mark_price, Decimal::from(65000));
        assert!(cache.get("ETHUSDT").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = PriceCache::new(Duration::from_millis(10));
        cache.put("BTCUSDT", price("BTCUSDT", 65000)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("BTCUSDT").await.is_none());
    }
}
