//! catalogd - Product Catalog Cache-Aside Engine
//!
//! Keeps three independent stores coherent for a product catalog: a
//! relational system of record, a key/value cache that serves reads without
//! touching the database, and a full-text search index.
//!
//! # Architecture
//!
//! ```text
//! Record Store (truth) ← CatalogEngine → Cache (speed) + Ranking
//!                              ↓
//!                     IndexDispatcher → Search Index (discovery)
//! ```
//!
//! - Reads are cache-aside: hit the cache, fall back to the record store and
//!   repopulate on a miss
//! - Writes go to the record store first, then write through to the cache
//! - Index updates are time-boxed and never fail a write; failures are
//!   tracked and repaired in the background
//! - Every successful single-product read is a popularity vote
//!
//! # Modules
//!
//! - [`adapters`] - Store implementations (in-memory, Redis, PostgreSQL, Elasticsearch)
//! - [`catalog`] - The engine, popularity tracker and index dispatcher
//! - [`domain`] - Product model, ports and events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics

pub mod adapters;
pub mod catalog;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use catalog::{
    CatalogEngine, CatalogHealth, CatalogStores, EngineConfig, IndexStatus, PopularityEntry,
    ReindexReport, WriteOutcome,
};
pub use domain::{Product, ProductDraft, ProductId, ProductPatch, SearchDocument};
pub use error::{Error, Result};
pub use metrics::CatalogMetrics;
