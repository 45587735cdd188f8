//! Domain layer: index identity and the engine ports the cache is built on.

mod handle;
mod ports;

pub use handle::IndexHandle;
pub use ports::{IndexOpener, IndexSource};
