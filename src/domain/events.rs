//! Domain Events
//!
//! Immutable records of things the catalog engine did or had to tolerate.
//!
//! # Usage
//!
//! Domain events are used for:
//! - Audit logging of catalog writes
//! - Surfacing degraded cache and index operations
//! - Tracking repair of stale search documents
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::product_created(ProductId::new(1), "Pen");
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ports::ProductId;

/// Domain event representing a significant occurrence in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Product Events
    // =========================================================================
    /// A product was written to the record store for the first time.
    ProductCreated {
        product_id: ProductId,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A product was merged with a patch and persisted.
    ProductUpdated {
        product_id: ProductId,
        timestamp: DateTime<Utc>,
    },

    /// A product was removed from the record store.
    ProductDeleted {
        product_id: ProductId,
        purged_derived: bool,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Cache Events
    // =========================================================================
    /// The cache region was refilled from the record store.
    ListingRepopulated {
        product_count: usize,
        complete: bool,
        timestamp: DateTime<Utc>,
    },

    /// A cache operation failed and the engine carried on without it.
    CacheDegraded {
        operation: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Search Index Events
    // =========================================================================
    /// A document could not be written to or removed from the index.
    IndexFailed {
        product_id: ProductId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A previously failed document was brought back in line.
    IndexRepaired {
        product_id: ProductId,
        timestamp: DateTime<Utc>,
    },

    /// A corrective re-index run finished.
    ReindexCompleted {
        indexed: usize,
        removed: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::ProductCreated { timestamp, .. } => *timestamp,
            DomainEvent::ProductUpdated { timestamp, .. } => *timestamp,
            DomainEvent::ProductDeleted { timestamp, .. } => *timestamp,
            DomainEvent::ListingRepopulated { timestamp, .. } => *timestamp,
            DomainEvent::CacheDegraded { timestamp, .. } => *timestamp,
            DomainEvent::IndexFailed { timestamp, .. } => *timestamp,
            DomainEvent::IndexRepaired { timestamp, .. } => *timestamp,
            DomainEvent::ReindexCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ProductCreated { .. } => "ProductCreated",
            DomainEvent::ProductUpdated { .. } => "ProductUpdated",
            DomainEvent::ProductDeleted { .. } => "ProductDeleted",
            DomainEvent::ListingRepopulated { .. } => "ListingRepopulated",
            DomainEvent::CacheDegraded { .. } => "CacheDegraded",
            DomainEvent::IndexFailed { .. } => "IndexFailed",
            DomainEvent::IndexRepaired { .. } => "IndexRepaired",
            DomainEvent::ReindexCompleted { .. } => "ReindexCompleted",
        }
    }

    /// Get the product ID if applicable.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            DomainEvent::ProductCreated { product_id, .. } => Some(*product_id),
            DomainEvent::ProductUpdated { product_id, .. } => Some(*product_id),
            DomainEvent::ProductDeleted { product_id, .. } => Some(*product_id),
            DomainEvent::IndexFailed { product_id, .. } => Some(*product_id),
            DomainEvent::IndexRepaired { product_id, .. } => Some(*product_id),
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create a ProductCreated event.
    pub fn product_created(product_id: ProductId, name: impl Into<String>) -> Self {
        DomainEvent::ProductCreated {
            product_id,
            name: name.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a ProductUpdated event.
    pub fn product_updated(product_id: ProductId) -> Self {
        DomainEvent::ProductUpdated {
            product_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a ProductDeleted event.
    pub fn product_deleted(product_id: ProductId, purged_derived: bool) -> Self {
        DomainEvent::ProductDeleted {
            product_id,
            purged_derived,
            timestamp: Utc::now(),
        }
    }

    /// Create a ListingRepopulated event.
    pub fn listing_repopulated(product_count: usize, complete: bool) -> Self {
        DomainEvent::ListingRepopulated {
            product_count,
            complete,
            timestamp: Utc::now(),
        }
    }

    /// Create a CacheDegraded event.
    pub fn cache_degraded(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainEvent::CacheDegraded {
            operation: operation.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an IndexFailed event.
    pub fn index_failed(product_id: ProductId, reason: impl Into<String>) -> Self {
        DomainEvent::IndexFailed {
            product_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an IndexRepaired event.
    pub fn index_repaired(product_id: ProductId) -> Self {
        DomainEvent::IndexRepaired {
            product_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a ReindexCompleted event.
    pub fn reindex_completed(
        indexed: usize,
        removed: usize,
        failed: usize,
        duration: Duration,
    ) -> Self {
        DomainEvent::ReindexCompleted {
            indexed,
            removed,
            failed,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
