//! Index engine ports
//!
//! The cache never touches an index format directly. A backend provides:
//! - [`IndexOpener`]: turns a handle into an open [`IndexSource`]
//! - [`IndexSource`]: one open index; yields snapshots and reloads on new commits
//!
//! One implementation per backing engine (see `infrastructure::tantivy`).

use crate::domain::IndexHandle;
use crate::error::EngineError;

/// Opens indexes for the cache. Called at most once per handle while the cache is alive.
pub trait IndexOpener: Send + Sync + 'static {
    type Source: IndexSource;

    fn open(&self, handle: &IndexHandle) -> Result<Self::Source, EngineError>;
}

/// One open index.
pub trait IndexSource: Send + Sync + 'static {
    /// Read-only point-in-time view of the index
    type Snapshot: Clone + Send + Sync + 'static;

    /// Snapshot of the latest state this source has loaded
    fn snapshot(&self) -> Result<Self::Snapshot, EngineError>;

    /// Pick up newly committed content.
    ///
    /// Returns `true` if the next `snapshot()` differs from the previous one.
    fn reload(&self) -> Result<bool, EngineError>;

    /// Engine-level reference taken for every view handed out.
    fn retain(&self, _snapshot: &Self::Snapshot) -> Result<(), EngineError> {
        Ok(())
    }

    /// Counterpart of [`IndexSource::retain`]; called exactly once per retained view.
    fn release(&self, _snapshot: &Self::Snapshot) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
