//! Catalog Engine
//!
//! Keeps the record store, the cache and the search index coherent.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────┐
//!   reads/writes ──►│  CatalogEngine   │
//!                   └──┬─────┬──────┬──┘
//!                      │     │      │
//!          authoritative   best-effort   detachable
//!                      │     │      │
//!                      ▼     ▼      ▼
//!              RecordStore CacheStore IndexDispatcher ──► SearchIndex
//!                            ▲
//!                   PopularityTracker
//! ```
//!
//! - [`engine`] - cache-aside reads, write-through writes, delete purge
//! - [`ranking`] - read-as-vote popularity scores
//! - [`dispatch`] - time-boxed index submission and stale-document repair
//! - [`snapshot`] - cache entry encoding

pub mod dispatch;
pub mod engine;
pub mod ranking;
pub mod snapshot;

pub use dispatch::{IndexDispatcher, IndexOp, IndexStatus, ReindexReport, StaleEntry};
pub use engine::{CatalogEngine, CatalogHealth, CatalogStores, EngineConfig, WriteOutcome};
pub use ranking::{PopularityEntry, PopularityTracker};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Error;
use crate::metrics::CatalogMetrics;

/// Shared sink for metrics and events used by every engine component.
#[derive(Clone)]
pub(crate) struct Reporter {
    pub(crate) metrics: CatalogMetrics,
    events: Arc<dyn EventPublisher>,
}

impl Reporter {
    pub(crate) fn new(metrics: CatalogMetrics, events: Arc<dyn EventPublisher>) -> Self {
        Self { metrics, events }
    }

    /// Publish an event. Publication failures are logged and dropped.
    pub(crate) async fn emit(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            debug!("Dropped {} event: {}", event_type, e);
        }
    }

    /// Record a skipped cache operation.
    pub(crate) async fn cache_degraded(&self, op: &'static str, error: &Error) {
        warn!(op, "Cache degraded, continuing without it: {}", error);
        self.metrics.record_cache_degraded(op);
        self.emit(DomainEvent::cache_degraded(op, error.to_string()))
            .await;
    }
}
