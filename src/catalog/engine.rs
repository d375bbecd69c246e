//! Catalog Engine - cache-aside reads, write-through writes
//!
//! # Store roles
//!
//! 1. The record store is authoritative; its errors fail the operation
//! 2. The cache is best-effort; its errors become misses or skipped writes
//! 3. The search index is eventually consistent; writes report its outcome
//!    in [`WriteOutcome::index`] but never fail because of it
//!
//! # Listing freshness
//!
//! `get_all` serves the cache region only while the listing mark is live.
//! The mark is written after a full refill from the record store and cleared
//! whenever a write fails to land in the cache, so a region filled by single
//! `get_by_id` misses is never mistaken for the whole catalog.
//!
//! A delete evicts the snapshot twice: once right after the row is gone and
//! again after the purge, clearing the listing mark with it. A refill or miss
//! that read the row before the delete and writes back after the second
//! eviction can still leave the snapshot behind until the next write for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::dispatch::{IndexDispatcher, IndexOp, IndexStatus, ReindexReport};
use super::ranking::PopularityTracker;
use super::snapshot;
use super::Reporter;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    CacheStore, EventPublisher, Product, ProductDraft, ProductId, ProductPatch, RecordStore,
    SearchDocument, SearchField, SearchIndex,
};
use crate::error::{Error, Result};
use crate::metrics::{CacheOutcome, CatalogMetrics};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the catalog engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a full cache refill answers `get_all`
    pub listing_ttl: Duration,

    /// How long a write waits for the search index
    pub index_timeout: Duration,

    /// Also drop the ranking entry and the search document on delete
    pub purge_derived_on_delete: bool,

    /// Result size of `get_popular(None)`
    pub default_popular_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listing_ttl: Duration::from_secs(60),
            index_timeout: Duration::from_secs(2),
            purge_derived_on_delete: true,
            default_popular_count: 5,
        }
    }
}

/// Store handles owned by the host and injected into the engine.
#[derive(Clone)]
pub struct CatalogStores {
    pub records: Arc<dyn RecordStore>,
    pub cache: Arc<dyn CacheStore>,
    pub search: Arc<dyn SearchIndex>,
}

/// Result of a write: the authoritative value plus what happened in the
/// search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome<T> {
    pub value: T,
    pub index: IndexStatus,
}

impl<T> WriteOutcome<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Reachability of the three stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CatalogHealth {
    pub records: bool,
    pub cache: bool,
    pub search: bool,
    pub stale_documents: usize,
}

impl CatalogHealth {
    /// The engine can serve requests as long as the record store is up.
    pub fn is_ready(&self) -> bool {
        self.records
    }

    pub fn is_degraded(&self) -> bool {
        !(self.cache && self.search) || self.stale_documents > 0
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Orchestrates reads and writes across the record store, cache and index.
pub struct CatalogEngine {
    config: EngineConfig,
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    search: Arc<dyn SearchIndex>,
    popularity: PopularityTracker,
    dispatcher: IndexDispatcher,
    reporter: Reporter,
}

impl CatalogEngine {
    /// Create an engine with a fresh metrics registry
    pub fn new(
        config: EngineConfig,
        stores: CatalogStores,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Arc<Self>> {
        let metrics = CatalogMetrics::new()?;
        Ok(Self::with_metrics(config, stores, events, metrics))
    }

    /// Create an engine reporting into an existing metrics registry
    pub fn with_metrics(
        config: EngineConfig,
        stores: CatalogStores,
        events: Arc<dyn EventPublisher>,
        metrics: CatalogMetrics,
    ) -> Arc<Self> {
        let reporter = Reporter::new(metrics, events);
        let popularity = PopularityTracker::new(stores.cache.clone(), reporter.clone());
        let dispatcher =
            IndexDispatcher::new(stores.search.clone(), config.index_timeout, reporter.clone());

        Arc::new(Self {
            config,
            records: stores.records,
            cache: stores.cache,
            search: stores.search,
            popularity,
            dispatcher,
            reporter,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &CatalogMetrics {
        &self.reporter.metrics
    }

    pub fn popularity(&self) -> &PopularityTracker {
        &self.popularity
    }

    pub fn dispatcher(&self) -> &IndexDispatcher {
        &self.dispatcher
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// All products, ordered by id.
    #[instrument(skip(self))]
    pub async fn get_all(&self) -> Result<Vec<Product>> {
        if let Some(products) = self.cached_listing().await {
            self.reporter
                .metrics
                .record_cache_lookup("get_all", CacheOutcome::Hit);
            debug!("Serving {} products from cache", products.len());
            return Ok(products);
        }

        self.repopulate_listing().await
    }

    /// The cached region, if it is known to hold the whole catalog.
    async fn cached_listing(&self) -> Option<Vec<Product>> {
        let metrics = &self.reporter.metrics;

        match self.cache.listing_complete().await {
            Ok(true) => {}
            Ok(false) => {
                metrics.record_cache_lookup("get_all", CacheOutcome::Miss);
                return None;
            }
            Err(e) => {
                self.reporter.cache_degraded("listing_complete", &e).await;
                metrics.record_cache_lookup("get_all", CacheOutcome::Error);
                return None;
            }
        }

        let entries = match self.cache.get_all().await {
            Ok(entries) => entries,
            Err(e) => {
                self.reporter.cache_degraded("get_all", &e).await;
                metrics.record_cache_lookup("get_all", CacheOutcome::Error);
                return None;
            }
        };

        let mut products = Vec::with_capacity(entries.len());
        for (id, raw) in entries {
            match snapshot::decode(&raw) {
                Ok(product) if product.id == id => products.push(product),
                Ok(product) => {
                    warn!(product_id = %id, "Cache entry holds product {}, refilling", product.id);
                    metrics.record_cache_lookup("get_all", CacheOutcome::Error);
                    return None;
                }
                Err(e) => {
                    warn!(product_id = %id, "Undecodable cache entry, refilling: {}", e);
                    metrics.record_cache_lookup("get_all", CacheOutcome::Error);
                    return None;
                }
            }
        }

        products.sort_by_key(|p| p.id);
        Some(products)
    }

    /// Reload the region from the record store and mark it complete if every
    /// entry landed.
    async fn repopulate_listing(&self) -> Result<Vec<Product>> {
        let products = self.records.list().await?;
        self.reporter.metrics.record_record_read();

        let mut complete = true;
        for product in &products {
            complete &= self.cache_put(product).await;
        }

        if complete {
            if let Err(e) = self.cache.mark_listing_complete(self.config.listing_ttl).await {
                self.reporter.cache_degraded("mark_listing", &e).await;
                complete = false;
            }
        }

        self.reporter.metrics.record_listing_refill();
        info!(complete, "Repopulated cache with {} products", products.len());
        self.reporter
            .emit(DomainEvent::listing_repopulated(products.len(), complete))
            .await;

        Ok(products)
    }

    /// One product. Every successful lookup counts as a popularity vote.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn get_by_id(&self, id: ProductId) -> Result<Product> {
        let product = match self.cached_product(id, "get").await {
            Some(product) => product,
            None => {
                let product = self
                    .records
                    .get(id)
                    .await?
                    .ok_or(Error::NotFound { id })?;
                self.reporter.metrics.record_record_read();
                self.cache_put(&product).await;
                product
            }
        };

        self.popularity.record_access(id).await;
        Ok(product)
    }

    /// Look one product up in the cache region only.
    async fn cached_product(&self, id: ProductId, op: &'static str) -> Option<Product> {
        let metrics = &self.reporter.metrics;

        match self.cache.get(id).await {
            Ok(Some(raw)) => match snapshot::decode(&raw) {
                Ok(product) if product.id == id => {
                    metrics.record_cache_lookup(op, CacheOutcome::Hit);
                    debug!(product_id = %id, "Cache hit");
                    Some(product)
                }
                Ok(_) | Err(_) => {
                    warn!(product_id = %id, "Discarding undecodable cache entry");
                    metrics.record_cache_lookup(op, CacheOutcome::Error);
                    None
                }
            },
            Ok(None) => {
                metrics.record_cache_lookup(op, CacheOutcome::Miss);
                debug!(product_id = %id, "Cache miss");
                None
            }
            Err(e) => {
                self.reporter.cache_degraded("get", &e).await;
                metrics.record_cache_lookup(op, CacheOutcome::Error);
                None
            }
        }
    }

    /// The most-read products, highest score first.
    ///
    /// Only products present in the cache are returned; ranked ids that are
    /// not cached are skipped, so the result may be shorter than `count`.
    #[instrument(skip(self))]
    pub async fn get_popular(&self, count: Option<usize>) -> Result<Vec<Product>> {
        let count = count.unwrap_or(self.config.default_popular_count);
        let ranked = self.popularity.top(count).await;

        let mut products = Vec::with_capacity(ranked.len());
        for entry in ranked {
            match self.cached_product(entry.id, "popular").await {
                Some(product) => products.push(product),
                None => debug!(product_id = %entry.id, "Ranked product not cached, skipping"),
            }
        }

        Ok(products)
    }

    /// Free-text search over name, category and description.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchDocument>> {
        self.search
            .search(query, &SearchField::CATALOG)
            .await
            .map_err(|e| match e {
                Error::IndexFailure(_) => e,
                other => Error::IndexFailure(other.to_string()),
            })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert a product and propagate it to the cache and the index.
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create(&self, draft: ProductDraft) -> Result<WriteOutcome<Product>> {
        draft.validate()?;

        let product = self.records.create(draft).await?;
        info!(product_id = %product.id, "Created product");

        if !self.cache_put(&product).await {
            self.invalidate_listing().await;
        }

        let index = self
            .dispatcher
            .submit(IndexOp::Upsert(SearchDocument::from(&product)))
            .await;

        self.reporter
            .emit(DomainEvent::product_created(product.id, &product.name))
            .await;

        Ok(WriteOutcome {
            value: product,
            index,
        })
    }

    /// Merge `patch` into a stored product.
    ///
    /// The merged snapshot overwrites the cache entry and is re-indexed.
    #[instrument(skip(self, patch), fields(product_id = %id))]
    pub async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<WriteOutcome<Product>> {
        let mut product = self
            .records
            .get(id)
            .await?
            .ok_or(Error::NotFound { id })?;
        self.reporter.metrics.record_record_read();

        patch.apply_to(&mut product)?;
        product.updated_at = Utc::now();

        // Deleted between the read and the write
        let product = self
            .records
            .update(&product)
            .await?
            .ok_or(Error::NotFound { id })?;
        info!("Updated product");

        if !self.cache_put(&product).await {
            self.invalidate_listing().await;
        }

        let index = self
            .dispatcher
            .submit(IndexOp::Upsert(SearchDocument::from(&product)))
            .await;

        self.reporter.emit(DomainEvent::product_updated(id)).await;

        Ok(WriteOutcome {
            value: product,
            index,
        })
    }

    /// Delete a product.
    ///
    /// With `purge_derived_on_delete` the ranking entry and the search
    /// document go too; otherwise they outlive the product and the outcome
    /// reports [`IndexStatus::NotRequested`].
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete(&self, id: ProductId) -> Result<WriteOutcome<ProductId>> {
        if !self.records.delete(id).await? {
            return Err(Error::NotFound { id });
        }
        info!("Deleted product");

        if let Err(e) = self.cache.delete(id).await {
            self.reporter.cache_degraded("delete", &e).await;
        }

        let purge = self.config.purge_derived_on_delete;
        let index = if purge {
            self.popularity.forget(id).await;
            self.dispatcher.submit(IndexOp::Remove(id)).await
        } else {
            IndexStatus::NotRequested
        };

        // A refill or miss that read the row before the delete may have put
        // the snapshot back by now
        match self.cache.delete(id).await {
            Ok(true) => debug!("Evicted snapshot written back during delete"),
            Ok(false) => {}
            Err(e) => self.reporter.cache_degraded("delete", &e).await,
        }
        self.invalidate_listing().await;

        self.reporter
            .emit(DomainEvent::product_deleted(id, purge))
            .await;

        Ok(WriteOutcome { value: id, index })
    }

    /// Write a snapshot into the region. Returns `false` if it did not land.
    async fn cache_put(&self, product: &Product) -> bool {
        let raw = match snapshot::encode(product) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(product_id = %product.id, "Failed to encode snapshot: {}", e);
                return false;
            }
        };

        match self.cache.set(product.id, raw).await {
            Ok(()) => true,
            Err(e) => {
                self.reporter.cache_degraded("set", &e).await;
                false
            }
        }
    }

    /// Stop the region from answering `get_all` until the next refill.
    async fn invalidate_listing(&self) {
        if let Err(e) = self.cache.clear_listing_mark().await {
            self.reporter.cache_degraded("clear_listing", &e).await;
        }
    }

    // -------------------------------------------------------------------------
    // Index repair
    // -------------------------------------------------------------------------

    /// Push every product into the search index.
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        self.dispatcher.reindex_all(self.records.as_ref()).await
    }

    /// Repair documents whose last index attempt failed.
    pub async fn reindex_stale(&self) -> Result<ReindexReport> {
        self.dispatcher.reindex_stale(self.records.as_ref()).await
    }

    /// Run `reindex_stale` every `every` until `cancel` fires.
    pub async fn run_index_repair(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        info!("Starting index repair worker every {:?}", every);

        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Index repair worker shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if self.dispatcher.stale_count() == 0 {
                        continue;
                    }

                    match self.reindex_stale().await {
                        Ok(report) => debug!(
                            indexed = report.indexed,
                            removed = report.removed,
                            failed = report.failed,
                            "Index repair pass finished"
                        ),
                        Err(e) => error!("Index repair pass failed: {}", e),
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    /// Probe the three stores.
    pub async fn health(&self) -> CatalogHealth {
        let (records, cache, search) = tokio::join!(
            self.records.health_check(),
            self.cache.health_check(),
            self.search.health_check(),
        );

        CatalogHealth {
            records: records.unwrap_or(false),
            cache: cache.unwrap_or(false),
            search: search.unwrap_or(false),
            stale_documents: self.dispatcher.stale_count(),
        }
    }
}

impl std::fmt::Debug for CatalogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEngine")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        InMemoryCacheStore, InMemoryEventCollector, InMemoryRecordStore, InMemorySearchIndex,
    };
    use assert_matches::assert_matches;
    use bytes::Bytes;

    struct Harness {
        engine: Arc<CatalogEngine>,
        records: Arc<InMemoryRecordStore>,
        cache: Arc<InMemoryCacheStore>,
        search: Arc<InMemorySearchIndex>,
        events: Arc<InMemoryEventCollector>,
    }

    fn harness(config: EngineConfig) -> Harness {
        let records = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(InMemoryCacheStore::new());
        let search = Arc::new(InMemorySearchIndex::new());
        let events = Arc::new(InMemoryEventCollector::new());

        let engine = CatalogEngine::new(
            config,
            CatalogStores {
                records: records.clone(),
                cache: cache.clone(),
                search: search.clone(),
            },
            events.clone(),
        )
        .unwrap();

        Harness {
            engine,
            records,
            cache,
            search,
            events,
        }
    }

    #[tokio::test]
    async fn test_create_writes_all_three_stores() {
        let h = harness(EngineConfig::default());

        let outcome = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap();

        assert_eq!(outcome.value.id, ProductId::new(1));
        assert_eq!(outcome.index, IndexStatus::Indexed);
        assert!(h.cache.contains(outcome.value.id));
        assert!(h.search.document(outcome.value.id).is_some());
        assert_eq!(h.events.events_of_type("ProductCreated").len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft_before_writing() {
        let h = harness(EngineConfig::default());

        let result = h.engine.create(ProductDraft::new("Pen", -1.0, 1)).await;

        assert_matches!(result, Err(Error::InvalidProduct(_)));
        assert!(h.records.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_survives_cache_outage() {
        let h = harness(EngineConfig::default());
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;

        h.cache.set_available(false);
        let product = h.engine.get_by_id(id).await.unwrap();

        assert_eq!(product.name, "Pen");
        assert!(!h.events.events_of_type("CacheDegraded").is_empty());
        assert!(h.engine.metrics().snapshot().cache_degraded >= 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_overwritten() {
        let h = harness(EngineConfig::default());
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;

        h.cache
            .set(id, Bytes::from_static(b"{\"id\":1}"))
            .await
            .unwrap();

        let product = h.engine.get_by_id(id).await.unwrap();
        assert_eq!(product.name, "Pen");

        let raw = h.cache.get(id).await.unwrap().unwrap();
        assert_eq!(snapshot::decode(&raw).unwrap(), product);
    }

    #[tokio::test]
    async fn test_not_found_does_not_vote() {
        let h = harness(EngineConfig::default());
        let missing = ProductId::new(42);

        assert_matches!(
            h.engine.get_by_id(missing).await,
            Err(Error::NotFound { id }) if id == missing
        );
        assert_eq!(h.cache.score(missing), None);
    }

    #[tokio::test]
    async fn test_record_store_errors_are_fatal() {
        let h = harness(EngineConfig::default());
        h.records.set_available(false);

        assert_matches!(h.engine.get_all().await, Err(Error::RecordStore(_)));
        assert_matches!(
            h.engine.create(ProductDraft::new("Pen", 1.0, 1)).await,
            Err(Error::RecordStore(_))
        );
    }

    #[tokio::test]
    async fn test_delete_without_purge_keeps_derived_state() {
        let h = harness(EngineConfig {
            purge_derived_on_delete: false,
            ..Default::default()
        });
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100).with_category("office"))
            .await
            .unwrap()
            .value
            .id;
        h.engine.get_by_id(id).await.unwrap();

        let outcome = h.engine.delete(id).await.unwrap();

        assert_eq!(outcome.index, IndexStatus::NotRequested);
        assert!(!h.cache.contains(id));
        assert_eq!(h.cache.score(id), Some(1.0));
        let hits = h.engine.search("pen").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_purge_clears_derived_state() {
        let h = harness(EngineConfig::default());
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;
        h.engine.get_by_id(id).await.unwrap();

        let outcome = h.engine.delete(id).await.unwrap();

        assert_eq!(outcome.index, IndexStatus::Indexed);
        assert_eq!(h.cache.score(id), None);
        assert!(h.search.document(id).is_none());
        assert!(h.engine.search("pen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let h = harness(EngineConfig::default());
        assert_matches!(
            h.engine.delete(ProductId::new(5)).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_search_failure_is_an_error() {
        let h = harness(EngineConfig::default());
        h.search.set_available(false);

        assert_matches!(h.engine.search("pen").await, Err(Error::IndexFailure(_)));
    }

    #[tokio::test]
    async fn test_get_popular_skips_uncached_products() {
        let h = harness(EngineConfig::default());
        let mut ids = Vec::new();
        for name in ["Pen", "Ink", "Pad"] {
            ids.push(
                h.engine
                    .create(ProductDraft::new(name, 1.0, 1))
                    .await
                    .unwrap()
                    .value
                    .id,
            );
        }
        for (votes, id) in [3, 2, 1].into_iter().zip(&ids) {
            for _ in 0..votes {
                h.engine.get_by_id(*id).await.unwrap();
            }
        }

        h.cache.delete(ids[1]).await.unwrap();

        let popular = h.engine.get_popular(Some(3)).await.unwrap();
        let names: Vec<&str> = popular.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Pen", "Pad"]);

        assert!(h.engine.get_popular(Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_popular_with_cache_down_is_empty() {
        let h = harness(EngineConfig::default());
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;
        h.engine.get_by_id(id).await.unwrap();

        h.cache.set_available(false);
        assert!(h.engine.get_popular(None).await.unwrap().is_empty());
    }

    /// Cache whose region writes can be switched off on their own, and whose
    /// next delete can be followed by a stale write-back.
    #[derive(Default)]
    struct ScriptedCache {
        inner: InMemoryCacheStore,
        fail_sets: std::sync::atomic::AtomicBool,
        write_back_next_delete: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl CacheStore for ScriptedCache {
        async fn get(&self, id: ProductId) -> Result<Option<Bytes>> {
            self.inner.get(id).await
        }
        async fn get_all(&self) -> Result<Vec<(ProductId, Bytes)>> {
            self.inner.get_all().await
        }
        async fn set(&self, id: ProductId, snapshot: Bytes) -> Result<()> {
            if self.fail_sets.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::CacheUnavailable("write refused".into()));
            }
            self.inner.set(id, snapshot).await
        }
        async fn delete(&self, id: ProductId) -> Result<bool> {
            let snapshot = self.inner.get(id).await?;
            let deleted = self.inner.delete(id).await?;
            let write_back = self
                .write_back_next_delete
                .swap(false, std::sync::atomic::Ordering::SeqCst);
            if let (true, Some(raw)) = (write_back, snapshot) {
                // A concurrent refill that read the row before it was deleted
                self.inner.set(id, raw).await?;
                self.inner
                    .mark_listing_complete(Duration::from_secs(60))
                    .await?;
            }
            Ok(deleted)
        }
        async fn increment(&self, id: ProductId, delta: f64) -> Result<f64> {
            self.inner.increment(id, delta).await
        }
        async fn top_k(&self, k: usize) -> Result<Vec<(ProductId, f64)>> {
            self.inner.top_k(k).await
        }
        async fn remove_rank(&self, id: ProductId) -> Result<bool> {
            self.inner.remove_rank(id).await
        }
        async fn mark_listing_complete(&self, ttl: Duration) -> Result<()> {
            self.inner.mark_listing_complete(ttl).await
        }
        async fn listing_complete(&self) -> Result<bool> {
            self.inner.listing_complete().await
        }
        async fn clear_listing_mark(&self) -> Result<()> {
            self.inner.clear_listing_mark().await
        }
        async fn health_check(&self) -> Result<bool> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn test_failed_cache_write_clears_listing_mark() {
        let cache = Arc::new(ScriptedCache::default());
        let engine = CatalogEngine::new(
            EngineConfig::default(),
            CatalogStores {
                records: Arc::new(InMemoryRecordStore::new()),
                cache: cache.clone(),
                search: Arc::new(InMemorySearchIndex::new()),
            },
            Arc::new(InMemoryEventCollector::new()),
        )
        .unwrap();

        engine.create(ProductDraft::new("Pen", 1.5, 100)).await.unwrap();
        engine.get_all().await.unwrap();
        assert!(cache.listing_complete().await.unwrap());

        cache
            .fail_sets
            .store(true, std::sync::atomic::Ordering::SeqCst);
        engine.create(ProductDraft::new("Ink", 2.0, 5)).await.unwrap();

        // The region lacks Ink, so it must not answer the listing
        assert!(!cache.listing_complete().await.unwrap());
        let listing = engine.get_all().await.unwrap();
        assert_eq!(listing.len(), 2);

        // Refill could not write Ink either, so the mark stays off
        assert!(!cache.listing_complete().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_evicts_snapshot_written_back_by_racing_refill() {
        let cache = Arc::new(ScriptedCache::default());
        let engine = CatalogEngine::new(
            EngineConfig::default(),
            CatalogStores {
                records: Arc::new(InMemoryRecordStore::new()),
                cache: cache.clone(),
                search: Arc::new(InMemorySearchIndex::new()),
            },
            Arc::new(InMemoryEventCollector::new()),
        )
        .unwrap();

        let id = engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;
        cache
            .write_back_next_delete
            .store(true, std::sync::atomic::Ordering::SeqCst);

        engine.delete(id).await.unwrap();

        assert!(cache.get(id).await.unwrap().is_none());
        assert!(!cache.listing_complete().await.unwrap());
        assert_matches!(engine.get_by_id(id).await, Err(Error::NotFound { .. }));
        assert!(engine.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(EngineConfig::default());

        let health = h.engine.health().await;
        assert!(health.is_ready());
        assert!(!health.is_degraded());

        h.search.set_available(false);
        let health = h.engine.health().await;
        assert!(health.is_ready());
        assert!(health.is_degraded());
    }

    #[tokio::test]
    async fn test_repair_worker_stops_on_cancel() {
        let h = harness(EngineConfig::default());
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(
            h.engine
                .clone()
                .run_index_repair(Duration::from_millis(10), cancel.clone()),
        );

        h.search.set_available(false);
        let id = h
            .engine
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap()
            .value
            .id;
        assert!(h.engine.dispatcher().is_stale(id));

        h.search.set_available(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!h.engine.dispatcher().is_stale(id));
        assert!(h.search.document(id).is_some());

        cancel.cancel();
        worker.await.unwrap();
    }
}
