//! Map tile cache. Tiles are plain cache entries: never queued, never
//! synced, safe to evict at any time.

use std::future::Future;

use chrono::{Duration, Utc};

use super::DatabaseService;
use crate::db::SqliteTileRepository;
use crate::models::Tile;
use crate::Result;

#[derive(Clone)]
pub struct TileCache {
    store: DatabaseService,
}

impl TileCache {
    pub const fn new(store: DatabaseService) -> Self {
        Self { store }
    }

    pub async fn get(&self, url: &str) -> Result<Option<Tile>> {
        self.store
            .with_connection(|conn| SqliteTileRepository::new(conn).get(url))
            .await
    }

    pub async fn put(&self, url: &str, data: Vec<u8>) -> Result<Tile> {
        let tile = Tile {
            id: url.to_string(),
            data,
            timestamp: Utc::now(),
        };
        self.store
            .with_connection(|conn| SqliteTileRepository::new(conn).put(&tile))
            .await?;
        Ok(tile)
    }

    /// Cached tile, or the result of `fetch` stored on first use.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> Result<Tile>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        if let Some(tile) = self.get(url).await? {
            return Ok(tile);
        }
        tracing::debug!("Tile cache miss for {url}");
        let data = fetch(url.to_string()).await?;
        self.put(url, data).await
    }

    /// Drop tiles fetched more than `max_age` ago.
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let evicted = self
            .store
            .with_connection(|conn| SqliteTileRepository::new(conn).evict_older_than(cutoff))
            .await?;
        if evicted > 0 {
            tracing::info!("Evicted {evicted} cached tile(s)");
        }
        Ok(evicted)
    }

    pub async fn clear(&self) -> Result<usize> {
        self.store
            .with_connection(|conn| SqliteTileRepository::new(conn).clear())
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store
            .with_connection(|conn| SqliteTileRepository::new(conn).count())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn fetches_once_then_serves_from_cache() {
        let cache = TileCache::new(DatabaseService::open_in_memory().unwrap());
        let fetches = AtomicUsize::new(0);
        let counter = &fetches;
        let url = "https://tiles.example.com/12/2048/1360.png";

        for _ in 0..3 {
            let tile = cache
                .get_or_fetch(url, move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(tile.data, vec![1, 2, 3]);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_fetch_caches_nothing() {
        let cache = TileCache::new(DatabaseService::open_in_memory().unwrap());
        let result = cache
            .get_or_fetch("https://tiles.example.com/0/0/0.png", |_| async {
                Err(crate::Error::InvalidInput("offline".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eviction_keeps_fresh_tiles() {
        let cache = TileCache::new(DatabaseService::open_in_memory().unwrap());
        cache.put("fresh", vec![1]).await.unwrap();

        assert_eq!(cache.evict_older_than(Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(cache.evict_older_than(Duration::seconds(-1)).await.unwrap(), 1);
        assert_eq!(cache.clear().await.unwrap(), 0);
    }
}
