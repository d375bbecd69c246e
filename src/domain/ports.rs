//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the core abstractions (ports) that the catalog engine
//! depends on. Infrastructure adapters implement these traits to provide
//! concrete implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │    RecordStore │ CacheStore │ SearchIndex           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  Postgres / InMemory │ Redis / InMemory │ Elastic    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// Product identifier (value object), assigned by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for ProductId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| Error::InvalidProduct(format!("not a product id: {s:?}")))
    }
}

/// A catalog item as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub stock: u32,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Build a product from a draft once the record store has assigned an id.
    pub fn from_draft(id: ProductId, draft: ProductDraft, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            description: draft.description,
            category: draft.category,
            stock: draft.stock,
            price: draft.price,
            updated_at,
        }
    }

    /// Check entity invariants.
    pub fn validate(&self) -> Result<()> {
        validate_price(self.price)
    }
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidProduct(format!(
            "price must be a non-negative number, got {price}"
        )));
    }
    Ok(())
}

/// All-fields product payload.
///
/// Used to create products, to seed the catalog from a file, and as the
/// input of a sparse (legacy) patch. Every field defaults, so a payload that
/// only carries `stock` is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub category: String,
    pub stock: u32,
    pub price: f64,
}

impl ProductDraft {
    pub fn new(name: impl Into<String>, price: f64, stock: u32) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Check entity invariants before anything is written.
    pub fn validate(&self) -> Result<()> {
        validate_price(self.price)
    }
}

/// A partial update.
///
/// `Some` overwrites the stored value, `None` leaves it untouched. Unlike the
/// sparse payload rule, an explicit `Some(0)` or `Some("")` does reset the
/// field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub stock: Option<u32>,
    pub price: Option<f64>,
}

impl ProductPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from an all-fields payload using the sparse presence rule:
    /// text is present when non-empty, numbers when non-zero.
    pub fn sparse(payload: &ProductDraft) -> Self {
        let text = |s: &String| (!s.is_empty()).then(|| s.clone());
        Self {
            name: text(&payload.name),
            description: text(&payload.description),
            category: text(&payload.category),
            stock: (payload.stock != 0).then_some(payload.stock),
            price: (payload.price != 0.0).then_some(payload.price),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn stock(mut self, stock: u32) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// True when applying the patch would change nothing but the timestamp.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.stock.is_none()
            && self.price.is_none()
    }

    /// Merge the supplied fields into `product`.
    ///
    /// Validation happens first, so a rejected patch leaves `product` intact.
    pub fn apply_to(&self, product: &mut Product) -> Result<()> {
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(category) = &self.category {
            product.category = category.clone();
        }
        if let Some(stock) = self.stock {
            product.stock = stock;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        Ok(())
    }
}

/// Text fields a search may match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Name,
    Category,
    Description,
}

impl SearchField {
    /// The field set every catalog search runs over.
    pub const CATALOG: [SearchField; 3] = [
        SearchField::Name,
        SearchField::Category,
        SearchField::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::Category => "category",
            SearchField::Description => "description",
        }
    }
}

impl std::fmt::Display for SearchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized projection of a product held by the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: u32,
}

impl SearchDocument {
    /// Text of one searchable field.
    pub fn field(&self, field: SearchField) -> &str {
        match field {
            SearchField::Name => &self.name,
            SearchField::Category => &self.category,
            SearchField::Description => &self.description,
        }
    }
}

impl From<&Product> for SearchDocument {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            category: product.category.clone(),
            price: product.price,
            stock: product.stock,
        }
    }
}

// =============================================================================
// Record Store Port
// =============================================================================

/// Port for the authoritative system of record.
///
/// Every call is awaited by the engine and any error is fatal to the
/// surrounding operation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a product by id.
    async fn get(&self, id: ProductId) -> Result<Option<Product>>;

    /// List all products, ordered by id.
    async fn list(&self) -> Result<Vec<Product>>;

    /// Insert a product, assigning its id and timestamp.
    async fn create(&self, draft: ProductDraft) -> Result<Product>;

    /// Replace a stored product. Returns `None` if it no longer exists.
    async fn update(&self, product: &Product) -> Result<Option<Product>>;

    /// Delete a product. Returns `false` if it did not exist.
    async fn delete(&self, id: ProductId) -> Result<bool>;

    /// Check if the record store is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Cache Store Port
// =============================================================================

/// Port for the fast key/value cache.
///
/// Two structures live behind it: a hash region of serialized product
/// snapshots and a ranking region of scores. Adapters report outages as
/// [`Error::CacheUnavailable`]; the engine treats those as misses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get one snapshot from the region.
    async fn get(&self, id: ProductId) -> Result<Option<Bytes>>;

    /// Get every snapshot in the region.
    async fn get_all(&self) -> Result<Vec<(ProductId, Bytes)>>;

    /// Insert or overwrite a snapshot.
    async fn set(&self, id: ProductId, snapshot: Bytes) -> Result<()>;

    /// Remove a snapshot. Returns `false` if it was not cached.
    async fn delete(&self, id: ProductId) -> Result<bool>;

    /// Add `delta` to a ranking score, returning the new score.
    async fn increment(&self, id: ProductId, delta: f64) -> Result<f64>;

    /// Highest `k` scores, descending.
    async fn top_k(&self, k: usize) -> Result<Vec<(ProductId, f64)>>;

    /// Drop a ranking entry. Returns `false` if it was not ranked.
    async fn remove_rank(&self, id: ProductId) -> Result<bool>;

    /// Record that the region holds the complete catalog, for `ttl`.
    async fn mark_listing_complete(&self, ttl: Duration) -> Result<()>;

    /// Whether a live completeness mark exists.
    async fn listing_complete(&self) -> Result<bool>;

    /// Drop the completeness mark.
    async fn clear_listing_mark(&self) -> Result<()>;

    /// Check if the cache is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Search Index Port
// =============================================================================

/// Port for the full-text search engine.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Upsert a document by id.
    async fn index(&self, document: &SearchDocument) -> Result<()>;

    /// Remove a document. Returns `false` if it was not indexed.
    async fn remove(&self, id: ProductId) -> Result<bool>;

    /// Multi-field match of `query` over `fields`.
    async fn search(&self, query: &str, fields: &[SearchField]) -> Result<Vec<SearchDocument>>;

    /// Check if the search engine is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

use super::events::DomainEvent;

/// Port for publishing domain events.
///
/// This trait abstracts event publishing, allowing different backends
/// (in-memory, logging, etc.) to be used.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn widget() -> Product {
        Product::from_draft(
            ProductId::new(1),
            ProductDraft::new("Widget", 9.99, 10).with_description("A widget"),
            Utc::now(),
        )
    }

    #[test]
    fn test_product_id() {
        let id = ProductId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<ProductId>().unwrap(), id);
        assert!("forty-two".parse::<ProductId>().is_err());
    }

    #[test]
    fn test_sparse_patch_ignores_empty_and_zero() {
        let payload = ProductDraft {
            name: String::new(),
            price: 0.0,
            ..Default::default()
        };
        let patch = ProductPatch::sparse(&payload);
        assert!(patch.is_empty());

        let mut product = widget();
        patch.apply_to(&mut product).unwrap();
        assert_eq!(product.name, "Widget");
        assert_eq!(product.price, 9.99);
    }

    #[test]
    fn test_sparse_patch_changes_only_present_fields() {
        let payload = ProductDraft {
            name: "Gadget".to_string(),
            price: 0.0,
            ..Default::default()
        };
        let mut product = widget();
        ProductPatch::sparse(&payload).apply_to(&mut product).unwrap();

        assert_eq!(product.name, "Gadget");
        assert_eq!(product.price, 9.99);
        assert_eq!(product.stock, 10);
        assert_eq!(product.description, "A widget");
    }

    #[test]
    fn test_explicit_patch_can_reset_fields() {
        let mut product = widget();
        ProductPatch::new()
            .price(0.0)
            .description("")
            .apply_to(&mut product)
            .unwrap();

        assert_eq!(product.price, 0.0);
        assert_eq!(product.description, "");
        assert_eq!(product.name, "Widget");
    }

    #[test]
    fn test_patch_rejects_negative_price_without_mutating() {
        let mut product = widget();
        let result = ProductPatch::new().name("Broken").price(-1.0).apply_to(&mut product);

        assert_matches!(result, Err(Error::InvalidProduct(_)));
        assert_eq!(product.name, "Widget");
    }

    #[test]
    fn test_draft_validation() {
        assert!(ProductDraft::new("Pen", 1.5, 100).validate().is_ok());
        assert!(ProductDraft::new("Pen", f64::NAN, 100).validate().is_err());
        assert!(ProductDraft::new("Pen", -0.5, 100).validate().is_err());
    }

    #[test]
    fn test_draft_deserializes_partial_payload() {
        let draft: ProductDraft = serde_json::from_str(r#"{"stock": 50}"#).unwrap();
        assert_eq!(draft.stock, 50);
        assert_eq!(draft.name, "");
        assert_eq!(draft.price, 0.0);
    }

    #[test]
    fn test_search_document_projection() {
        let product = widget();
        let doc = SearchDocument::from(&product);

        assert_eq!(doc.id, product.id);
        assert_eq!(doc.field(SearchField::Name), "Widget");
        assert_eq!(doc.field(SearchField::Description), "A widget");
        assert_eq!(doc.field(SearchField::Category), "");
    }

    #[test]
    fn test_search_field_names() {
        let names: Vec<_> = SearchField::CATALOG.iter().map(|f| f.as_str()).collect();
        assert_eq!(names, vec!["name", "category", "description"]);
    }
}
