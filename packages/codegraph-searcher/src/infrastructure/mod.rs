//! Engine adapters implementing the domain ports.

pub mod tantivy;

pub use self::tantivy::{search_top_docs, FederatedHit, TantivyOpener, TantivySource};
