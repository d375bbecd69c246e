//! Redis Cache Adapter
//!
//! Implements the `CacheStore` port on a single Redis instance:
//!
//! | Structure       | Redis type | Key (default)              |
//! |-----------------|------------|----------------------------|
//! | Snapshot region | hash       | `products_list`            |
//! | Ranking         | sorted set | `popular_products`         |
//! | Listing mark    | string+TTL | `products_list:complete`   |
//!
//! Every command runs under `op_timeout`; failures and timeouts surface as
//! [`Error::CacheUnavailable`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::domain::ports::{CacheStore, ProductId};
use crate::error::{Error, Result};

/// Configuration for the Redis cache adapter
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Connection URL (`redis://host:port/db`)
    pub url: String,

    /// Hash holding product snapshots
    pub region_key: String,

    /// Sorted set holding popularity scores
    pub ranking_key: String,

    /// String key whose presence marks the region complete
    pub listing_key: String,

    /// Deadline for a single command, connection included
    pub op_timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            region_key: "products_list".to_string(),
            ranking_key: "popular_products".to_string(),
            listing_key: "products_list:complete".to_string(),
            op_timeout: Duration::from_millis(250),
        }
    }
}

/// Redis-backed cache store.
pub struct RedisCacheStore {
    config: RedisCacheConfig,
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCacheStore {
    /// Create the adapter. No connection is opened until the first command.
    pub fn new(config: RedisCacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Config(format!("invalid redis url {}: {}", config.url, e)))?;

        Ok(Self {
            config,
            client,
            connection: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }

    async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command on a shared connection under the configured deadline.
    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let attempt = async {
            let conn = self.connection().await?;
            command(conn).await
        };

        match timeout(self.config.op_timeout, attempt).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                // Force a reconnect on the next call
                self.connection.lock().await.take();
                Err(Error::CacheUnavailable(format!("{}: {}", operation, e)))
            }
            Err(_) => Err(Error::CacheUnavailable(format!(
                "{}: timed out after {:?}",
                operation, self.config.op_timeout
            ))),
        }
    }
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("url", &self.config.url)
            .field("region_key", &self.config.region_key)
            .finish()
    }
}

/// Order ranking entries by score then id, both descending.
fn sort_ranking(entries: &mut [(ProductId, f64)]) {
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
}

/// Combine the first `k` rows with every member tied at the cutoff score and
/// keep the top `k` in ranking order.
fn merge_cutoff(head: Vec<(i64, f64)>, tied: Vec<(i64, f64)>, k: usize) -> Vec<(ProductId, f64)> {
    let cutoff = tied.first().map(|(_, score)| *score);
    let mut entries: Vec<(ProductId, f64)> = head
        .into_iter()
        .filter(|(_, score)| Some(*score) != cutoff)
        .chain(tied)
        .map(|(id, score)| (ProductId::new(id), score))
        .collect();
    sort_ranking(&mut entries);
    entries.truncate(k);
    entries
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    #[instrument(skip(self), fields(product_id = %id))]
    async fn get(&self, id: ProductId) -> Result<Option<Bytes>> {
        let key = self.config.region_key.clone();
        let raw: Option<Vec<u8>> = self
            .run("hget", move |mut conn| async move {
                conn.hget(key, id.get()).await
            })
            .await?;
        Ok(raw.map(Bytes::from))
    }

    async fn get_all(&self) -> Result<Vec<(ProductId, Bytes)>> {
        let key = self.config.region_key.clone();
        let raw: HashMap<i64, Vec<u8>> = self
            .run("hgetall", move |mut conn| async move { conn.hgetall(key).await })
            .await?;

        let mut entries: Vec<(ProductId, Bytes)> = raw
            .into_iter()
            .map(|(id, bytes)| (ProductId::new(id), Bytes::from(bytes)))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        debug!("Read {} snapshots from region", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self, snapshot), fields(product_id = %id))]
    async fn set(&self, id: ProductId, snapshot: Bytes) -> Result<()> {
        let key = self.config.region_key.clone();
        self.run("hset", move |mut conn| async move {
            conn.hset::<_, _, _, ()>(key, id.get(), snapshot.as_ref()).await
        })
        .await
    }

    async fn delete(&self, id: ProductId) -> Result<bool> {
        let key = self.config.region_key.clone();
        let removed: i64 = self
            .run("hdel", move |mut conn| async move {
                conn.hdel(key, id.get()).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn increment(&self, id: ProductId, delta: f64) -> Result<f64> {
        let key = self.config.ranking_key.clone();
        self.run("zincrby", move |mut conn| async move {
            conn.zincr(key, id.get(), delta).await
        })
        .await
    }

    async fn top_k(&self, k: usize) -> Result<Vec<(ProductId, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let key = self.config.ranking_key.clone();
        let stop = isize::try_from(k - 1).unwrap_or(isize::MAX);
        let head: Vec<(i64, f64)> = self
            .run("zrevrange", move |mut conn| async move {
                conn.zrevrange_withscores(key, 0, stop).await
            })
            .await?;

        // Redis breaks score ties on the member string, so the rows at the
        // cutoff may not be the highest ids sharing that score
        let tied: Vec<(i64, f64)> = match head.last() {
            Some(&(_, cutoff)) if head.len() == k => {
                let key = self.config.ranking_key.clone();
                self.run("zrangebyscore", move |mut conn| async move {
                    conn.zrangebyscore_withscores(key, cutoff, cutoff).await
                })
                .await?
            }
            _ => Vec::new(),
        };

        Ok(merge_cutoff(head, tied, k))
    }

    async fn remove_rank(&self, id: ProductId) -> Result<bool> {
        let key = self.config.ranking_key.clone();
        let removed: i64 = self
            .run("zrem", move |mut conn| async move {
                conn.zrem(key, id.get()).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn mark_listing_complete(&self, ttl: Duration) -> Result<()> {
        let key = self.config.listing_key.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        self.run("set_px", move |mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(1)
                .arg("PX")
                .arg(millis)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn listing_complete(&self) -> Result<bool> {
        let key = self.config.listing_key.clone();
        self.run("exists", move |mut conn| async move { conn.exists(key).await })
            .await
    }

    async fn clear_listing_mark(&self) -> Result<()> {
        let key = self.config.listing_key.clone();
        self.run("del", move |mut conn| async move {
            conn.del::<_, ()>(key).await
        })
        .await
    }

    async fn health_check(&self) -> Result<bool> {
        let pong: String = self
            .run("ping", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_keys() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.region_key, "products_list");
        assert_eq!(config.ranking_key, "popular_products");
        assert_eq!(config.listing_key, "products_list:complete");
    }

    #[test]
    fn test_invalid_url() {
        let result = RedisCacheStore::new(RedisCacheConfig {
            url: "not a url".to_string(),
            ..Default::default()
        });
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_sort_ranking_breaks_ties_by_id() {
        let mut entries = vec![
            (ProductId::new(9), 2.0),
            (ProductId::new(10), 2.0),
            (ProductId::new(3), 5.0),
        ];
        sort_ranking(&mut entries);

        let ids: Vec<i64> = entries.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![3, 10, 9]);
    }

    #[test]
    fn test_merge_cutoff_takes_highest_tied_ids() {
        // ZREVRANGE 0 1 returned 9 ahead of 10 ("9" > "10" as strings)
        let head = vec![(3, 5.0), (9, 2.0)];
        let tied = vec![(10, 2.0), (9, 2.0), (4, 2.0)];

        let merged = merge_cutoff(head, tied, 2);

        let ids: Vec<i64> = merged.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![3, 10]);
    }

    #[test]
    fn test_merge_cutoff_without_ties() {
        let merged = merge_cutoff(vec![(1, 4.0), (2, 1.0)], Vec::new(), 5);

        let ids: Vec<i64> = merged.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let store = RedisCacheStore::new(RedisCacheConfig {
            url: "redis://127.0.0.1:1".to_string(),
            op_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        assert_matches!(
            store.get(ProductId::new(1)).await,
            Err(Error::CacheUnavailable(_))
        );
        assert_matches!(store.health_check().await, Err(Error::CacheUnavailable(_)));
    }
}
