//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  RecordStore │ CacheStore │ SearchIndex │ EventPublisher   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ InMemory{RecordStore,CacheStore,SearchIndex}               │ │
//! │  │ PostgresRecordStore* │ RedisCacheStore* │ ElasticsearchIndex│ │
//! │  │ Logging / Broadcast / Composite event publishers           │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!
//!   * behind the `postgres` / `redis` cargo features
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use catalogd::adapters::{ElasticsearchConfig, ElasticsearchIndex};
//! use catalogd::domain::ports::{SearchField, SearchIndex};
//!
//! let index = ElasticsearchIndex::new(ElasticsearchConfig::default())?;
//! let hits = index.search("pen", &SearchField::CATALOG).await?;
//! ```

mod elasticsearch;
mod event_publisher;
mod memory;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
pub use event_publisher::{
    BroadcastEventPublisher, CompositeEventPublisher, InMemoryEventCollector,
    LoggingEventPublisher,
};
pub use memory::{InMemoryCacheStore, InMemoryRecordStore, InMemorySearchIndex};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresRecordStore};
#[cfg(feature = "redis")]
pub use self::redis::{RedisCacheConfig, RedisCacheStore};
