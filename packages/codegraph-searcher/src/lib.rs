//! codegraph-searcher - Concurrent Searcher Cache
//!
//! Keeps one open searcher manager per on-disk index and hands out
//! reference-counted, read-only views over them, singly or federated.
//!
//! ## Core Principles
//!
//! 1. **One manager per handle**: concurrent first fetches open the index once
//! 2. **Paired release**: every acquired view goes back exactly once, through its session
//! 3. **All or nothing**: a federated fetch that fails half way releases what it took
//! 4. **Explicit teardown**: `destroy()` closes everything; dropping without it is a bug
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codegraph_searcher::{SearcherCache, SearcherCacheConfig, IndexHandle, TantivyOpener};
//!
//! let cache = SearcherCache::new(SearcherCacheConfig::default(), TantivyOpener)?;
//!
//! // 1. One index
//! let mut session = cache.fetch_single(&IndexHandle::new("/data/index/proj-a"))?;
//! let hits = search_top_docs(session.view()?, &query, 10)?;
//! session.close()?;
//!
//! // 2. Several indexes as one
//! let handles = [IndexHandle::new("/data/index/a"), IndexHandle::new("/data/index/b")];
//! let mut session = cache.fetch_federated(&handles)?;
//! let hits = search_top_docs(session.view()?, &query, 10)?;
//! session.close()?;
//!
//! // 3. Teardown
//! cache.destroy()?;
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod infrastructure;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod session;

pub use cache::{LifecycleState, SearcherCache, Session};
pub use config::{ConfigError, SearcherCacheConfig};
pub use domain::{IndexHandle, IndexOpener, IndexSource};
pub use error::{
    EngineError, ErrorKind, ProtocolViolation, Result, SearcherError, ShutdownFailure,
};
pub use execution::{CancellationToken, ExecutionError, ExecutionPool, TaskHandle, ThreadPoolSize};
pub use infrastructure::{search_top_docs, FederatedHit, TantivyOpener, TantivySource};
pub use manager::{SearcherManager, SearcherView};
pub use metrics::SearcherCacheMetrics;
pub use session::{SearcherSession, SessionView};
