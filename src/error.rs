//! Error types for the catalog engine

use thiserror::Error;

use crate::domain::ports::ProductId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the catalog engine
#[derive(Error, Debug)]
pub enum Error {
    /// The record store has no product with this identifier
    #[error("Product not found: {id}")]
    NotFound { id: ProductId },

    /// The product violates an entity invariant
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Record store operation failed (fatal to the surrounding operation)
    #[error("Record store failure: {0}")]
    RecordStore(String),

    /// Cache store could not be reached or rejected the command
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Search index could not be reached or rejected the request
    #[error("Search index failure: {0}")]
    IndexFailure(String),

    // =========================================================================
    // Supporting Errors
    // =========================================================================
    /// Snapshot or document (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error means "no such product".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for errors the engine never absorbs.
    ///
    /// Cache and index failures degrade; everything else ends the operation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::CacheUnavailable(_) | Error::IndexFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = Error::NotFound { id: ProductId::new(7) };
        assert!(not_found.is_not_found());
        assert!(not_found.is_fatal());
        assert_eq!(not_found.to_string(), "Product not found: 7");

        assert!(!Error::CacheUnavailable("down".into()).is_fatal());
        assert!(!Error::IndexFailure("down".into()).is_fatal());
        assert!(Error::RecordStore("down".into()).is_fatal());
    }
}
