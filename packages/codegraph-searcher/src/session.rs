//! Searcher sessions
//!
//! A session owns the views acquired for one request and gives every one of
//! them back exactly once, on `close()` or, failing that, on drop.
//!
//! Federated fetches build sessions through an [`AcquisitionGuard`]: views are
//! pushed as they are acquired, and if the fetch bails out half way the guard's
//! `Drop` releases whatever it holds. Only a complete set is moved into the
//! session.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::{IndexHandle, IndexSource};
use crate::error::{ProtocolViolation, Result, SearcherError, ShutdownFailure};
use crate::execution::ExecutionPool;
use crate::manager::{SearcherManager, SearcherView};
use crate::metrics::SearcherCacheMetrics;

struct Lease<S: IndexSource> {
    manager: Arc<SearcherManager<S>>,
    view: SearcherView<S::Snapshot>,
}

impl<S: IndexSource> Lease<S> {
    fn release(self) -> std::result::Result<(), ShutdownFailure> {
        let Lease { manager, view } = self;
        manager.release(view).map_err(|error| ShutdownFailure {
            handle: manager.handle().clone(),
            error: error.into_engine_error(),
        })
    }
}

/// Counts open sessions for the owning cache.
#[derive(Clone)]
pub(crate) struct SessionTracker {
    open: Arc<AtomicUsize>,
    metrics: Arc<SearcherCacheMetrics>,
}

impl SessionTracker {
    pub(crate) fn new(metrics: Arc<SearcherCacheMetrics>) -> Self {
        Self {
            open: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    pub(crate) fn open_sessions(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    fn opened(&self) {
        self.open.fetch_add(1, Ordering::AcqRel);
        self.metrics.open_sessions.inc();
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.metrics.open_sessions.dec();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Rollback guard
// ═══════════════════════════════════════════════════════════════════════════

pub(crate) struct AcquisitionGuard<S: IndexSource> {
    leases: Vec<Lease<S>>,
}

impl<S: IndexSource> AcquisitionGuard<S> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            leases: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, manager: Arc<SearcherManager<S>>, view: SearcherView<S::Snapshot>) {
        self.leases.push(Lease { manager, view });
    }

    pub(crate) fn len(&self) -> usize {
        self.leases.len()
    }

    /// Disarm the guard and hand the complete set to a new session.
    pub(crate) fn into_session(
        mut self,
        executor: Arc<ExecutionPool>,
        tracker: SessionTracker,
    ) -> SearcherSession<S> {
        let leases = std::mem::take(&mut self.leases);
        SearcherSession::new(leases, executor, tracker)
    }
}

impl<S: IndexSource> Drop for AcquisitionGuard<S> {
    fn drop(&mut self) {
        if self.leases.is_empty() {
            return;
        }

        let count = self.leases.len();
        for lease in self.leases.drain(..) {
            if let Err(failure) = lease.release() {
                tracing::warn!("rollback release failed for {}", failure);
            }
        }
        tracing::debug!("rolled back {} partial acquisition(s)", count);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Views
// ═══════════════════════════════════════════════════════════════════════════

/// What a session exposes to the query side: one snapshot, or several composed
/// into one logical index.
pub struct SessionView<T> {
    handles: Vec<IndexHandle>,
    snapshots: Vec<T>,
    generations: Vec<u64>,
    executor: Arc<ExecutionPool>,
}

impl<T> SessionView<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn is_federated(&self) -> bool {
        self.snapshots.len() > 1
    }

    /// The snapshot of a single-index session
    pub fn single(&self) -> Option<&T> {
        match self.snapshots.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Snapshots in fetch order
    pub fn snapshots(&self) -> &[T] {
        &self.snapshots
    }

    pub fn handles(&self) -> &[IndexHandle] {
        &self.handles
    }

    /// Generation each snapshot was taken at, in fetch order
    pub fn generations(&self) -> &[u64] {
        &self.generations
    }

    /// Pool shared by every view of the owning cache
    pub fn executor(&self) -> &Arc<ExecutionPool> {
        &self.executor
    }

    /// Run `f` against every snapshot; federated views fan out over the pool.
    /// Results come back in fetch order.
    pub fn map_each<F, R>(&self, f: F) -> Result<Vec<R>>
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        if !self.is_federated() {
            return Ok(self.snapshots.iter().map(f).collect());
        }

        let results = self
            .executor
            .map_ordered(self.snapshots.clone(), move |snapshot| f(&snapshot))?;
        Ok(results)
    }
}

impl<T> fmt::Debug for SessionView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionView")
            .field("handles", &self.handles)
            .field("generations", &self.generations)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════

/// Views acquired for one request.
pub struct SearcherSession<S: IndexSource> {
    leases: Vec<Lease<S>>,
    view: SessionView<S::Snapshot>,
    closed: bool,
    tracker: SessionTracker,
}

impl<S: IndexSource> SearcherSession<S> {
    fn new(leases: Vec<Lease<S>>, executor: Arc<ExecutionPool>, tracker: SessionTracker) -> Self {
        let view = SessionView {
            handles: leases.iter().map(|l| l.manager.handle().clone()).collect(),
            snapshots: leases.iter().map(|l| l.view.snapshot().clone()).collect(),
            generations: leases.iter().map(|l| l.view.generation()).collect(),
            executor,
        };
        tracker.opened();

        Self {
            leases,
            view,
            closed: false,
            tracker,
        }
    }

    /// The (possibly federated) view; fails once the session is closed.
    pub fn view(&self) -> Result<&SessionView<S::Snapshot>> {
        if self.closed {
            return Err(ProtocolViolation::SessionClosed.into());
        }
        Ok(&self.view)
    }

    /// Release every view. All releases are attempted even if some fail; the
    /// failures come back together as [`SearcherError::Shutdown`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ProtocolViolation::SessionClosed.into());
        }

        let failures = self.release_all();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SearcherError::Shutdown { failures })
        }
    }

    fn release_all(&mut self) -> Vec<ShutdownFailure> {
        self.closed = true;
        // composed snapshots go first, then the views behind them
        self.view.snapshots.clear();

        let mut failures = Vec::new();
        for lease in self.leases.drain(..) {
            if let Err(failure) = lease.release() {
                tracing::warn!("failed to release index searcher: {}", failure);
                self.tracker.metrics.release_failures.inc();
                failures.push(failure);
            }
        }

        self.tracker.closed();
        failures
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_federated(&self) -> bool {
        self.view.handles.len() > 1
    }

    /// Number of indexes this session was fetched for
    pub fn len(&self) -> usize {
        self.view.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.handles.is_empty()
    }

    pub fn handles(&self) -> &[IndexHandle] {
        &self.view.handles
    }

    /// Identity of the manager behind each view, in fetch order
    pub fn manager_ids(&self) -> Vec<u64> {
        self.leases.iter().map(|l| l.manager.id()).collect()
    }
}

impl<S: IndexSource> Drop for SearcherSession<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(
            "session over {:?} dropped without close(), releasing its views",
            self.view.handles
        );
        self.release_all();
    }
}

impl<S: IndexSource> fmt::Debug for SearcherSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearcherSession")
            .field("view", &self.view)
            .field("closed", &self.closed)
            .finish()
    }
}
