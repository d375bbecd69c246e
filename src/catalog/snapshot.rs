//! Cache entry encoding.
//!
//! A cache entry is the complete JSON snapshot of one product. Anything that
//! does not decode into a full `Product` is not a usable entry.

use bytes::Bytes;

use crate::domain::ports::Product;
use crate::error::Result;

pub fn encode(product: &Product) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(product)?))
}

pub fn decode(raw: &[u8]) -> Result<Product> {
    let product: Product = serde_json::from_slice(raw)?;
    product.validate()?;
    Ok(product)
}
