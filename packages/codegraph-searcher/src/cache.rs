//! Searcher cache: the top-level pool
//!
//! ```text
//! fetch_single(h) ─┐
//!                  ├─► registry: handle → SearcherManager (opened once)
//! fetch_federated ─┘         │
//!                            ▼
//!                  acquire() per handle ──► AcquisitionGuard ──► SearcherSession
//!                                                                     │
//!                                                close() ◄────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Created → Active → ShuttingDown → Destroyed`
//!
//! - `shutdown()` / `await_termination()`: soft pool shutdown, fetches rejected
//! - `destroy()`: hard pool shutdown, every manager closed, registry cleared.
//!   Single-shot, and refused while sessions are still open.
//!
//! There is no implicit teardown: dropping a cache that was never destroyed is
//! logged as an error (and asserts in debug builds).

use parking_lot::RwLock;
use prometheus::Registry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearcherCacheConfig;
use crate::domain::{IndexHandle, IndexOpener};
use crate::error::{ProtocolViolation, Result, SearcherError, ShutdownFailure};
use crate::execution::ExecutionPool;
use crate::manager::SearcherManager;
use crate::metrics::SearcherCacheMetrics;
use crate::registry::ManagerRegistry;
use crate::session::{AcquisitionGuard, SearcherSession, SessionTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Active,
    ShuttingDown,
    Destroyed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Active => "active",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session type handed out by a cache over opener `O`
pub type Session<O> = SearcherSession<<O as IndexOpener>::Source>;

/// Caches one searcher manager per index and serves sessions over them.
pub struct SearcherCache<O: IndexOpener> {
    opener: O,
    config: SearcherCacheConfig,
    registry: ManagerRegistry<O::Source>,
    executor: Arc<ExecutionPool>,
    state: RwLock<LifecycleState>,
    sessions: SessionTracker,
    metrics: Arc<SearcherCacheMetrics>,
}

impl<O: IndexOpener> SearcherCache<O> {
    /// Create a cache with its own private metrics registry.
    pub fn new(config: SearcherCacheConfig, opener: O) -> Result<Self> {
        Self::with_registry(config, opener, &Registry::new())
    }

    /// Create a cache whose metrics are registered on `registry`.
    pub fn with_registry(
        config: SearcherCacheConfig,
        opener: O,
        registry: &Registry,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(SearcherCacheMetrics::new(registry)?);
        let executor = Arc::new(ExecutionPool::new(
            config.pool_size(),
            &config.thread_group,
        )?);

        let cache = Self {
            opener,
            registry: ManagerRegistry::new(),
            executor,
            state: RwLock::new(LifecycleState::Created),
            sessions: SessionTracker::new(Arc::clone(&metrics)),
            metrics,
            config,
        };
        *cache.state.write() = LifecycleState::Active;

        tracing::info!(
            "searcher cache active ({} search thread(s), refresh_on_fetch={})",
            cache.executor.worker_count(),
            cache.config.refresh_on_fetch
        );
        Ok(cache)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Fetch
    // ═══════════════════════════════════════════════════════════════════════

    /// Session over one index.
    pub fn fetch_single(&self, handle: &IndexHandle) -> Result<Session<O>> {
        self.fetch(std::slice::from_ref(handle))
    }

    /// Session over several indexes searched as one.
    ///
    /// If any handle fails to open or acquire, the views already taken for the
    /// earlier handles are released before the error is returned.
    pub fn fetch_federated(&self, handles: &[IndexHandle]) -> Result<Session<O>> {
        self.fetch(handles)
    }

    fn fetch(&self, handles: &[IndexHandle]) -> Result<Session<O>> {
        self.metrics.fetches.inc();
        let result = self.try_fetch(handles);
        if let Err(e) = &result {
            self.metrics.fetch_failures.inc();
            tracing::debug!("fetch of {} index(es) failed: {}", handles.len(), e);
        }
        result
    }

    fn try_fetch(&self, handles: &[IndexHandle]) -> Result<Session<O>> {
        // held shared for the whole fetch so destroy() cannot drain underneath it
        let state = self.state.read();
        if *state != LifecycleState::Active {
            return Err(ProtocolViolation::NotActive(*state).into());
        }
        if handles.is_empty() {
            return Err(ProtocolViolation::EmptyFederation.into());
        }

        let mut guard = AcquisitionGuard::with_capacity(handles.len());
        for handle in handles {
            let manager = self.resolve(handle)?;
            let view = manager
                .acquire()
                .map_err(|source| SearcherError::Acquisition {
                    handle: handle.clone(),
                    source,
                })?;
            guard.push(manager, view);
        }
        tracing::debug!("acquired {} view(s)", guard.len());

        Ok(guard.into_session(Arc::clone(&self.executor), self.sessions.clone()))
    }

    fn resolve(&self, handle: &IndexHandle) -> Result<Arc<SearcherManager<O::Source>>> {
        if let Some(manager) = self.registry.get(handle) {
            if self.config.refresh_on_fetch {
                self.refresh_manager(&manager, false)?;
            }
            return Ok(manager);
        }

        let (manager, created) = self
            .registry
            .get_or_open(handle, || SearcherManager::open(&self.opener, handle))?;
        if created {
            self.metrics.managers_opened.inc();
            self.metrics.managers.inc();
            tracing::info!("opened searcher manager for {}", handle);
        }
        Ok(manager)
    }

    fn refresh_manager(
        &self,
        manager: &SearcherManager<O::Source>,
        blocking: bool,
    ) -> Result<bool> {
        let refreshed = if blocking {
            manager.refresh()
        } else {
            manager.maybe_refresh()
        }
        .map_err(|source| SearcherError::Refresh {
            handle: manager.handle().clone(),
            source,
        })?;

        if refreshed {
            self.metrics.refreshes.inc();
        }
        Ok(refreshed)
    }

    /// Refresh every open index, waiting for refreshes already in progress.
    ///
    /// Every manager is tried; the first failure is returned afterwards.
    /// Returns how many managers moved to a new generation.
    pub fn refresh_all(&self) -> Result<usize> {
        let state = self.state.read();
        if *state == LifecycleState::Destroyed {
            return Err(ProtocolViolation::AlreadyDestroyed.into());
        }

        let mut refreshed = 0;
        let mut first_error = None;
        for manager in self.registry.managers() {
            match self.refresh_manager(&manager, true) {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(refreshed),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Take the cache out of service: stop new fetches, let queued search work
    /// drain. Returns `false` if it was already shutting down.
    pub fn shutdown(&self) -> Result<bool> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Active => {
                *state = LifecycleState::ShuttingDown;
                self.executor.shutdown();
                tracing::info!("searcher cache shutting down");
                Ok(true)
            }
            LifecycleState::ShuttingDown => Ok(false),
            LifecycleState::Destroyed => Err(ProtocolViolation::AlreadyDestroyed.into()),
            LifecycleState::Created => Err(ProtocolViolation::NotActive(*state).into()),
        }
    }

    /// Soft-shutdown the search pool (if not already) and wait for it to drain.
    /// After `destroy()` this only waits for the stopped pool's workers.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
        if let Err(e) = self.shutdown() {
            if e.protocol() != Some(&ProtocolViolation::AlreadyDestroyed) {
                return Err(e);
            }
        }
        Ok(self.executor.await_termination(timeout))
    }

    /// Tear the cache down: stop the pool, close every manager, clear the
    /// registry. Close failures are collected; they never stop the loop.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.write();
        if *state == LifecycleState::Destroyed {
            return Err(ProtocolViolation::AlreadyDestroyed.into());
        }

        let open = self.sessions.open_sessions();
        if open > 0 {
            return Err(ProtocolViolation::SessionsOutstanding(open).into());
        }
        *state = LifecycleState::Destroyed;

        let discarded = self.executor.shutdown_now();

        let managers = self.registry.drain();
        let mut failures = Vec::new();
        for manager in &managers {
            if let Err(error) = manager.close() {
                tracing::warn!("failed to close searcher manager for {}: {}", manager.handle(), error);
                failures.push(ShutdownFailure {
                    handle: manager.handle().clone(),
                    error,
                });
            }
        }
        self.metrics.managers.set(0);

        tracing::info!(
            "searcher cache destroyed: {} manager(s) closed, {} queued task(s) discarded, {} failure(s)",
            managers.len(),
            discarded,
            failures.len()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SearcherError::Shutdown { failures })
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn config(&self) -> &SearcherCacheConfig {
        &self.config
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn executor(&self) -> &Arc<ExecutionPool> {
        &self.executor
    }

    pub fn metrics(&self) -> &SearcherCacheMetrics {
        &self.metrics
    }

    /// Manager registered for `handle`, if it has been opened
    pub fn manager(&self, handle: &IndexHandle) -> Option<Arc<SearcherManager<O::Source>>> {
        self.registry.get(handle)
    }

    pub fn manager_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registered_handles(&self) -> Vec<IndexHandle> {
        self.registry.handles()
    }

    pub fn outstanding_sessions(&self) -> usize {
        self.sessions.open_sessions()
    }
}

impl<O: IndexOpener> Drop for SearcherCache<O> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state == LifecycleState::Destroyed {
            return;
        }

        tracing::error!(
            "searcher cache dropped in state '{}' without destroy(); {} index manager(s) never closed",
            state,
            self.registry.len()
        );
        if !std::thread::panicking() {
            debug_assert!(false, "SearcherCache dropped without destroy()");
        }
    }
}

impl<O: IndexOpener> fmt::Debug for SearcherCache<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearcherCache")
            .field("state", &self.state())
            .field("managers", &self.registry.len())
            .field("executor", &self.executor)
            .finish()
    }
}
