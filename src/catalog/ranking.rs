//! Popularity ranking.
//!
//! Every successful single-product read counts as one vote. Scores live in
//! the cache's ranking region and are advisory: losing them loses nothing
//! authoritative.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::Reporter;
use crate::domain::ports::{CacheStore, ProductId};

/// One row of the ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityEntry {
    pub id: ProductId,
    pub score: f64,
}

/// Derived ranking of products by read count.
#[derive(Clone)]
pub struct PopularityTracker {
    cache: Arc<dyn CacheStore>,
    reporter: Reporter,
}

impl PopularityTracker {
    pub(crate) fn new(cache: Arc<dyn CacheStore>, reporter: Reporter) -> Self {
        Self { cache, reporter }
    }

    /// Count one read of `id`. Returns the new score, or `None` if the
    /// ranking could not be updated.
    pub async fn record_access(&self, id: ProductId) -> Option<f64> {
        match self.cache.increment(id, 1.0).await {
            Ok(score) => {
                self.reporter.metrics.record_vote();
                debug!(product_id = %id, score, "Recorded access");
                Some(score)
            }
            Err(e) => {
                self.reporter.cache_degraded("increment", &e).await;
                None
            }
        }
    }

    /// The `k` highest-scored products, descending.
    pub async fn top(&self, k: usize) -> Vec<PopularityEntry> {
        if k == 0 {
            return Vec::new();
        }
        match self.cache.top_k(k).await {
            Ok(entries) => entries
                .into_iter()
                .take(k)
                .map(|(id, score)| PopularityEntry { id, score })
                .collect(),
            Err(e) => {
                self.reporter.cache_degraded("top_k", &e).await;
                Vec::new()
            }
        }
    }

    /// Drop `id` from the ranking. Returns `true` if an entry was removed.
    pub async fn forget(&self, id: ProductId) -> bool {
        match self.cache.remove_rank(id).await {
            Ok(removed) => removed,
            Err(e) => {
                self.reporter.cache_degraded("remove_rank", &e).await;
                false
            }
        }
    }
}

impl std::fmt::Debug for PopularityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopularityTracker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryCacheStore, InMemoryEventCollector};
    use crate::metrics::CatalogMetrics;

    fn tracker() -> (PopularityTracker, Arc<InMemoryCacheStore>, Arc<InMemoryEventCollector>) {
        let cache = Arc::new(InMemoryCacheStore::new());
        let events = Arc::new(InMemoryEventCollector::new());
        let reporter = Reporter::new(CatalogMetrics::new().unwrap(), events.clone());
        (PopularityTracker::new(cache.clone(), reporter), cache, events)
    }

    #[tokio::test]
    async fn test_record_access_increments_by_one() {
        let (tracker, _, _) = tracker();
        let id = ProductId::new(1);

        assert_eq!(tracker.record_access(id).await, Some(1.0));
        assert_eq!(tracker.record_access(id).await, Some(2.0));
    }

    #[tokio::test]
    async fn test_top_orders_by_score() {
        let (tracker, _, _) = tracker();
        for (id, votes) in [(1, 1), (2, 3), (3, 2)] {
            for _ in 0..votes {
                tracker.record_access(ProductId::new(id)).await;
            }
        }

        let top = tracker.top(2).await;
        assert_eq!(
            top,
            vec![
                PopularityEntry { id: ProductId::new(2), score: 3.0 },
                PopularityEntry { id: ProductId::new(3), score: 2.0 },
            ]
        );
        assert!(tracker.top(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_outage_is_reported_not_raised() {
        let (tracker, cache, events) = tracker();
        cache.set_available(false);

        assert_eq!(tracker.record_access(ProductId::new(1)).await, None);
        assert!(tracker.top(5).await.is_empty());
        assert!(!tracker.forget(ProductId::new(1)).await);
        assert_eq!(events.events_of_type("CacheDegraded").len(), 3);
    }

    #[tokio::test]
    async fn test_forget() {
        let (tracker, cache, _) = tracker();
        let id = ProductId::new(4);
        tracker.record_access(id).await;

        assert!(tracker.forget(id).await);
        assert_eq!(cache.score(id), None);
        assert!(!tracker.forget(id).await);
    }
}
