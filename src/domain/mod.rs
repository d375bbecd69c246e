//! Domain Layer
//!
//! Product model, ports and events of the catalog.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Value objects and trait abstractions for the three stores
//! - **Events** (`events.rs`) - Domain events for audit and degradation reporting
//!
//! # Usage
//!
//! ```ignore
//! use catalogd::domain::ports::{CacheStore, RecordStore};
//!
//! async fn warm<R, C>(records: &R, cache: &C) -> Result<()>
//! where
//!     R: RecordStore,
//!     C: CacheStore,
//! {
//!     for product in records.list().await? {
//!         // ...
//!     }
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::DomainEvent;
pub use ports::{
    // Port traits
    CacheStore,
    EventPublisher,
    // Value objects
    Product,
    ProductDraft,
    ProductId,
    ProductPatch,
    RecordStore,
    SearchDocument,
    SearchField,
    SearchIndex,
};
