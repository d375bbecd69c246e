//! In-Memory Store Adapters
//!
//! Process-local implementations of the three store ports. They back the
//! test suite and the binary's `memory` backends.
//!
//! Each adapter has an availability switch so that outages can be simulated:
//! while unavailable every call fails with the error variant the real backend
//! would produce.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::domain::ports::{
    CacheStore, Product, ProductDraft, ProductId, RecordStore, SearchDocument, SearchField,
    SearchIndex,
};
use crate::error::{Error, Result};

// =============================================================================
// Record Store
// =============================================================================

/// In-memory record store.
/// Ids are assigned from a sequence starting at 1, like a serial column.
pub struct InMemoryRecordStore {
    rows: DashMap<ProductId, Product>,
    next_id: AtomicI64,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl InMemoryRecordStore {
    /// Create an empty record store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored products
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read operations served so far (`get` and `list`)
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Write operations served so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::RecordStore("in-memory record store is offline".into()))
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        self.ensure_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.rows.get(&id).map(|row| row.clone()))
    }

    async fn list(&self) -> Result<Vec<Product>> {
        self.ensure_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut products: Vec<Product> = self.rows.iter().map(|row| row.clone()).collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn create(&self, draft: ProductDraft) -> Result<Product> {
        self.ensure_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        let id = ProductId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let product = Product::from_draft(id, draft, Utc::now());
        self.rows.insert(id, product.clone());
        Ok(product)
    }

    async fn update(&self, product: &Product) -> Result<Option<Product>> {
        self.ensure_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        match self.rows.get_mut(&product.id) {
            Some(mut row) => {
                *row = product.clone();
                Ok(Some(product.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: ProductId) -> Result<bool> {
        self.ensure_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(self.rows.remove(&id).is_some())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Cache Store
// =============================================================================

/// In-memory cache store with a hash region and a ranking region.
pub struct InMemoryCacheStore {
    region: DashMap<ProductId, Bytes>,
    ranking: Mutex<HashMap<ProductId, f64>>,
    /// Expiry of the listing completeness mark
    listing_mark: Mutex<Option<Instant>>,
    available: AtomicBool,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self {
            region: DashMap::new(),
            ranking: Mutex::new(HashMap::new()),
            listing_mark: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryCacheStore {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a snapshot for `id` is cached
    pub fn contains(&self, id: ProductId) -> bool {
        self.region.contains_key(&id)
    }

    /// Number of cached snapshots
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Current ranking score of `id`
    pub fn score(&self, id: ProductId) -> Option<f64> {
        self.ranking.lock().get(&id).copied()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::CacheUnavailable("in-memory cache is offline".into()))
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, id: ProductId) -> Result<Option<Bytes>> {
        self.ensure_available()?;
        Ok(self.region.get(&id).map(|entry| entry.clone()))
    }

    async fn get_all(&self) -> Result<Vec<(ProductId, Bytes)>> {
        self.ensure_available()?;
        Ok(self
            .region
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect())
    }

    async fn set(&self, id: ProductId, snapshot: Bytes) -> Result<()> {
        self.ensure_available()?;
        self.region.insert(id, snapshot);
        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.region.remove(&id).is_some())
    }

    async fn increment(&self, id: ProductId, delta: f64) -> Result<f64> {
        self.ensure_available()?;
        let mut ranking = self.ranking.lock();
        let score = ranking.entry(id).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn top_k(&self, k: usize) -> Result<Vec<(ProductId, f64)>> {
        self.ensure_available()?;
        let mut entries: Vec<(ProductId, f64)> =
            self.ranking.lock().iter().map(|(id, s)| (*id, *s)).collect();

        // Descending score, ties by descending id (same as ZREVRANGE)
        entries.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.cmp(&a.0))
        });
        entries.truncate(k);
        Ok(entries)
    }

    async fn remove_rank(&self, id: ProductId) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.ranking.lock().remove(&id).is_some())
    }

    async fn mark_listing_complete(&self, ttl: Duration) -> Result<()> {
        self.ensure_available()?;
        *self.listing_mark.lock() = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn listing_complete(&self) -> Result<bool> {
        self.ensure_available()?;
        let mut mark = self.listing_mark.lock();
        let expiry = *mark;
        match expiry {
            Some(expires_at) if Instant::now() < expires_at => Ok(true),
            Some(_) => {
                *mark = None;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn clear_listing_mark(&self) -> Result<()> {
        self.ensure_available()?;
        *self.listing_mark.lock() = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Search Index
// =============================================================================

/// In-memory search index.
///
/// A document matches when any query token equals a token of any requested
/// field (OR semantics). Hits are ranked by the number of distinct matching
/// query tokens, then by id.
pub struct InMemorySearchIndex {
    documents: RwLock<BTreeMap<ProductId, SearchDocument>>,
    available: AtomicBool,
    /// Artificial delay applied to writes
    latency: Mutex<Duration>,
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
        }
    }
}

impl InMemorySearchIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every index/remove call by `latency`
    pub fn set_write_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Indexed document for `id`
    pub fn document(&self, id: ProductId) -> Option<SearchDocument> {
        self.documents.read().get(&id).cloned()
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::IndexFailure("in-memory search index is offline".into()))
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, document: &SearchDocument) -> Result<()> {
        self.simulate_latency().await;
        self.ensure_available()?;
        self.documents.write().insert(document.id, document.clone());
        Ok(())
    }

    async fn remove(&self, id: ProductId) -> Result<bool> {
        self.simulate_latency().await;
        self.ensure_available()?;
        Ok(self.documents.write().remove(&id).is_some())
    }

    async fn search(&self, query: &str, fields: &[SearchField]) -> Result<Vec<SearchDocument>> {
        self.ensure_available()?;
        let terms: HashSet<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read();
        let mut hits: Vec<(usize, &SearchDocument)> = documents
            .values()
            .filter_map(|doc| {
                let tokens: HashSet<String> = fields
                    .iter()
                    .flat_map(|field| tokenize(doc.field(*field)))
                    .collect();
                let matched = terms.iter().filter(|t| tokens.contains(*t)).count();
                (matched > 0).then_some((matched, doc))
            })
            .collect();

        hits.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
        Ok(hits.into_iter().map(|(_, doc)| doc.clone()).collect())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }
}
