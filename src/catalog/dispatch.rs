//! Search index dispatch.
//!
//! Writes reach the search index through [`IndexDispatcher::submit`], which
//! runs the index call on its own task and waits for it at most
//! `index_timeout`. A slow index therefore never holds a write past that
//! deadline, and an unreachable one never fails it.
//!
//! Documents whose last attempt failed are remembered in a stale set and
//! brought back in line by [`IndexDispatcher::reindex_stale`]. A full
//! corrective pass is [`IndexDispatcher::reindex_all`].
//!
//! Every submission for a product takes a new generation. An attempt that
//! finishes after a newer one was submitted no longer speaks for the
//! document: if it wrote anything it may have undone the newer change, so
//! the product is marked stale and repaired from the record store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::Reporter;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{ProductId, RecordStore, SearchDocument, SearchIndex};
use crate::error::Result;

/// A change to push into the search index.
#[derive(Debug, Clone)]
pub enum IndexOp {
    Upsert(SearchDocument),
    Remove(ProductId),
}

impl IndexOp {
    pub fn id(&self) -> ProductId {
        match self {
            IndexOp::Upsert(doc) => doc.id,
            IndexOp::Remove(id) => *id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            IndexOp::Upsert(_) => "upsert",
            IndexOp::Remove(_) => "remove",
        }
    }
}

/// What happened to the index side of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    /// The index acknowledged the change.
    Indexed,
    /// The index rejected the change or could not be reached.
    Failed { reason: String },
    /// The change is still in flight after the deadline; it will finish on
    /// its own and be repaired if it fails.
    Pending,
    /// No index change was attempted.
    NotRequested,
}

impl IndexStatus {
    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexStatus::Indexed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, IndexStatus::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Indexed => "indexed",
            IndexStatus::Failed { .. } => "failed",
            IndexStatus::Pending => "pending",
            IndexStatus::NotRequested => "not_requested",
        }
    }
}

/// A document awaiting repair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleEntry {
    pub id: ProductId,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Result of a corrective re-index run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    /// Documents upserted
    pub indexed: usize,
    /// Documents removed because their product is gone
    pub removed: usize,
    /// Documents that are still stale
    pub failed: usize,
    pub duration: Duration,
}

impl ReindexReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Time-boxed submission of index changes, plus the stale set they leave
/// behind.
#[derive(Clone)]
pub struct IndexDispatcher {
    index: Arc<dyn SearchIndex>,
    index_timeout: Duration,
    stale: Arc<DashMap<ProductId, StaleEntry>>,
    /// Latest submission per product
    generations: Arc<DashMap<ProductId, u64>>,
    reporter: Reporter,
}

impl IndexDispatcher {
    pub(crate) fn new(index: Arc<dyn SearchIndex>, index_timeout: Duration, reporter: Reporter) -> Self {
        Self {
            index,
            index_timeout,
            stale: Arc::new(DashMap::new()),
            generations: Arc::new(DashMap::new()),
            reporter,
        }
    }

    /// Submit one change and wait for it at most `index_timeout`.
    pub async fn submit(&self, op: IndexOp) -> IndexStatus {
        let id = op.id();
        let label = op.label();

        let generation = self.next_generation(id);
        let worker = self.clone();
        let mut task = tokio::spawn(async move { worker.apply(op, generation).await });

        let status = match timeout(self.index_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => IndexStatus::Indexed,
            Ok(Ok(Err(reason))) => IndexStatus::Failed { reason },
            Ok(Err(join_error)) => {
                // The task died before it could record its own outcome
                let reason = format!("index task aborted: {}", join_error);
                self.mark_stale(id, &reason).await;
                IndexStatus::Failed { reason }
            }
            Err(_) => {
                debug!(product_id = %id, "Index call still running after {:?}", self.index_timeout);
                IndexStatus::Pending
            }
        };

        self.reporter
            .metrics
            .record_index_submission(label, status.as_str());
        status
    }

    /// Run one change to completion and record the outcome in the stale set.
    async fn apply(&self, op: IndexOp, generation: u64) -> std::result::Result<(), String> {
        let id = op.id();
        let result = match &op {
            IndexOp::Upsert(doc) => self.index.index(doc).await,
            IndexOp::Remove(id) => self.index.remove(*id).await.map(|_| ()),
        };

        match result {
            Ok(()) if self.is_current(id, generation) => {
                self.clear_stale(id);
                Ok(())
            }
            Ok(()) => {
                // Landed after a newer change; the document may be behind
                debug!(product_id = %id, op = op.label(), "Index call overtaken by a newer write");
                self.mark_stale(id, "overtaken by a newer write").await;
                Ok(())
            }
            Err(e) if self.is_current(id, generation) => {
                let reason = e.to_string();
                warn!(product_id = %id, op = op.label(), "Index call failed: {}", reason);
                self.mark_stale(id, &reason).await;
                Err(reason)
            }
            Err(e) => {
                // Nothing written; the newer change decides the document
                debug!(product_id = %id, op = op.label(), "Superseded index call failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    fn next_generation(&self, id: ProductId) -> u64 {
        let mut generation = self.generations.entry(id).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current(&self, id: ProductId, generation: u64) -> bool {
        self.generations
            .get(&id)
            .map_or(false, |current| *current == generation)
    }

    async fn mark_stale(&self, id: ProductId, reason: &str) {
        self.stale.insert(
            id,
            StaleEntry {
                id,
                reason: reason.to_string(),
                since: Utc::now(),
            },
        );
        self.reporter.metrics.set_stale_documents(self.stale.len());
        self.reporter
            .emit(DomainEvent::index_failed(id, reason))
            .await;
    }

    fn clear_stale(&self, id: ProductId) -> bool {
        let removed = self.stale.remove(&id).is_some();
        if removed {
            self.reporter.metrics.set_stale_documents(self.stale.len());
        }
        removed
    }

    /// Documents awaiting repair, ordered by id.
    pub fn stale(&self) -> Vec<StaleEntry> {
        let mut entries: Vec<StaleEntry> = self.stale.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    pub fn is_stale(&self, id: ProductId) -> bool {
        self.stale.contains_key(&id)
    }

    /// Repair every stale document from the record store.
    ///
    /// Products still present are upserted, vanished ones removed. Record
    /// store errors abort the run; index errors leave the entry stale.
    pub async fn reindex_stale(&self, records: &dyn RecordStore) -> Result<ReindexReport> {
        let started = Instant::now();
        let mut report = ReindexReport::default();

        let ids: Vec<ProductId> = self.stale.iter().map(|e| *e.key()).collect();
        if ids.is_empty() {
            return Ok(report);
        }

        for id in ids {
            let generation = self.next_generation(id);
            let (result, removal) = match records.get(id).await? {
                Some(product) => (self.index.index(&SearchDocument::from(&product)).await, false),
                None => (self.index.remove(id).await.map(|_| ()), true),
            };

            match result {
                Ok(()) if !self.is_current(id, generation) => {
                    debug!(product_id = %id, "Repair overtaken by a newer write");
                    self.mark_stale(id, "overtaken by a newer write").await;
                    report.failed += 1;
                }
                Ok(()) => {
                    self.clear_stale(id);
                    if removal {
                        report.removed += 1;
                    } else {
                        report.indexed += 1;
                    }
                    self.reporter.emit(DomainEvent::index_repaired(id)).await;
                }
                Err(e) => {
                    debug!(product_id = %id, "Repair attempt failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.duration = started.elapsed();
        self.finish(&report).await;
        Ok(report)
    }

    /// Push every product in the record store into the index.
    ///
    /// Stale entries for products that no longer exist are resolved by
    /// removing their documents.
    pub async fn reindex_all(&self, records: &dyn RecordStore) -> Result<ReindexReport> {
        let started = Instant::now();
        let mut report = ReindexReport::default();

        let products = records.list().await?;
        let live: HashSet<ProductId> = products.iter().map(|p| p.id).collect();

        for product in &products {
            let generation = self.next_generation(product.id);
            match self.index.index(&SearchDocument::from(product)).await {
                Ok(()) if self.is_current(product.id, generation) => {
                    self.clear_stale(product.id);
                    report.indexed += 1;
                }
                Ok(()) => {
                    self.mark_stale(product.id, "overtaken by a newer write").await;
                    report.failed += 1;
                }
                Err(e) => {
                    self.mark_stale(product.id, &e.to_string()).await;
                    report.failed += 1;
                }
            }
        }

        let orphans: Vec<ProductId> = self
            .stale
            .iter()
            .map(|e| *e.key())
            .filter(|id| !live.contains(id))
            .collect();
        for id in orphans {
            let generation = self.next_generation(id);
            match self.index.remove(id).await {
                Ok(_) if self.is_current(id, generation) => {
                    self.clear_stale(id);
                    report.removed += 1;
                }
                Ok(_) | Err(_) => report.failed += 1,
            }
        }

        report.duration = started.elapsed();
        self.finish(&report).await;
        Ok(report)
    }

    async fn finish(&self, report: &ReindexReport) {
        info!(
            indexed = report.indexed,
            removed = report.removed,
            failed = report.failed,
            "Re-index finished in {:?}",
            report.duration
        );
        self.reporter
            .emit(DomainEvent::reindex_completed(
                report.indexed,
                report.removed,
                report.failed,
                report.duration,
            ))
            .await;
    }
}

impl std::fmt::Debug for IndexDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDispatcher")
            .field("index_timeout", &self.index_timeout)
            .field("stale", &self.stale.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryRecordStore, InMemorySearchIndex};
    use crate::domain::ports::ProductDraft;
    use crate::metrics::CatalogMetrics;
    use assert_matches::assert_matches;

    struct Fixture {
        dispatcher: IndexDispatcher,
        index: Arc<InMemorySearchIndex>,
        records: InMemoryRecordStore,
        events: Arc<InMemoryEventCollector>,
    }

    fn fixture(index_timeout: Duration) -> Fixture {
        let index = Arc::new(InMemorySearchIndex::new());
        let events = Arc::new(InMemoryEventCollector::new());
        let reporter = Reporter::new(CatalogMetrics::new().unwrap(), events.clone());
        Fixture {
            dispatcher: IndexDispatcher::new(index.clone(), index_timeout, reporter),
            index,
            records: InMemoryRecordStore::new(),
            events,
        }
    }

    fn doc(id: i64, name: &str) -> SearchDocument {
        SearchDocument {
            id: ProductId::new(id),
            name: name.to_string(),
            description: String::new(),
            category: String::new(),
            price: 1.0,
            stock: 1,
        }
    }

    #[tokio::test]
    async fn test_submit_indexed() {
        let f = fixture(Duration::from_secs(1));

        let status = f.dispatcher.submit(IndexOp::Upsert(doc(1, "Pen"))).await;

        assert_eq!(status, IndexStatus::Indexed);
        assert!(f.index.document(ProductId::new(1)).is_some());
        assert_eq!(f.dispatcher.stale_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_failed_marks_stale() {
        let f = fixture(Duration::from_secs(1));
        f.index.set_available(false);

        let status = f.dispatcher.submit(IndexOp::Upsert(doc(1, "Pen"))).await;

        assert_matches!(status, IndexStatus::Failed { .. });
        assert!(f.dispatcher.is_stale(ProductId::new(1)));
        assert_eq!(f.events.events_of_type("IndexFailed").len(), 1);
    }

    #[tokio::test]
    async fn test_submit_pending_completes_in_background() {
        let f = fixture(Duration::from_millis(10));
        f.index.set_write_latency(Duration::from_millis(100));

        let status = f.dispatcher.submit(IndexOp::Upsert(doc(1, "Pen"))).await;
        assert_eq!(status, IndexStatus::Pending);
        assert!(f.index.document(ProductId::new(1)).is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(f.index.document(ProductId::new(1)).is_some());
        assert_eq!(f.dispatcher.stale_count(), 0);
    }

    #[tokio::test]
    async fn test_late_upsert_behind_newer_upsert_is_repaired() {
        let f = fixture(Duration::from_millis(10));
        let product = f
            .records
            .create(ProductDraft::new("Gadget", 1.0, 1))
            .await
            .unwrap();

        f.index.set_write_latency(Duration::from_millis(200));
        let first = f.dispatcher.submit(IndexOp::Upsert(doc(1, "Pen"))).await;
        assert_eq!(first, IndexStatus::Pending);

        f.index.set_write_latency(Duration::ZERO);
        let second = f
            .dispatcher
            .submit(IndexOp::Upsert(SearchDocument::from(&product)))
            .await;
        assert_eq!(second, IndexStatus::Indexed);

        // The slow write lands last and rolls the document back
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.index.document(product.id).unwrap().name, "Pen");
        assert!(f.dispatcher.is_stale(product.id));

        let report = f.dispatcher.reindex_stale(&f.records).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(f.index.document(product.id).unwrap().name, "Gadget");
        assert_eq!(f.dispatcher.stale_count(), 0);
    }

    #[tokio::test]
    async fn test_late_upsert_behind_remove_is_repaired() {
        let f = fixture(Duration::from_millis(10));
        let id = ProductId::new(1);

        f.index.set_write_latency(Duration::from_millis(200));
        let first = f.dispatcher.submit(IndexOp::Upsert(doc(1, "Pen"))).await;
        assert_eq!(first, IndexStatus::Pending);

        f.index.set_write_latency(Duration::ZERO);
        assert_eq!(f.dispatcher.submit(IndexOp::Remove(id)).await, IndexStatus::Indexed);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(f.index.document(id).is_some());
        assert!(f.dispatcher.is_stale(id));

        // The record store has no such product, so repair removes it
        let report = f.dispatcher.reindex_stale(&f.records).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(f.index.document(id).is_none());
        assert_eq!(f.dispatcher.stale_count(), 0);
    }

    #[tokio::test]
    async fn test_reindex_stale_upserts_and_removes() {
        let f = fixture(Duration::from_secs(1));
        let kept = f
            .records
            .create(ProductDraft::new("Pen", 1.5, 100))
            .await
            .unwrap();

        f.index.set_available(false);
        f.dispatcher
            .submit(IndexOp::Upsert(SearchDocument::from(&kept)))
            .await;
        f.dispatcher.submit(IndexOp::Remove(ProductId::new(99))).await;
        assert_eq!(f.dispatcher.stale_count(), 2);

        // Still down: nothing repaired
        let report = f.dispatcher.reindex_stale(&f.records).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(f.dispatcher.stale_count(), 2);

        f.index.set_available(true);
        let report = f.dispatcher.reindex_stale(&f.records).await.unwrap();
        assert_eq!((report.indexed, report.removed, report.failed), (1, 1, 0));
        assert!(report.is_clean());
        assert_eq!(f.dispatcher.stale_count(), 0);
        assert!(f.index.document(kept.id).is_some());
        assert_eq!(f.events.events_of_type("IndexRepaired").len(), 2);
    }

    #[tokio::test]
    async fn test_reindex_all() {
        let f = fixture(Duration::from_secs(1));
        for name in ["Pen", "Ink", "Pad"] {
            f.records
                .create(ProductDraft::new(name, 1.0, 1))
                .await
                .unwrap();
        }

        let report = f.dispatcher.reindex_all(&f.records).await.unwrap();

        assert_eq!(report.indexed, 3);
        assert_eq!(f.index.len(), 3);
        assert_eq!(f.events.events_of_type("ReindexCompleted").len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_propagates_record_store_errors() {
        let f = fixture(Duration::from_secs(1));
        f.records.set_available(false);

        assert!(f.dispatcher.reindex_all(&f.records).await.is_err());
    }
}
