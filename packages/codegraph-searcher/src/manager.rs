//! Per-index searcher manager
//!
//! Owns one open [`IndexSource`] and the generation currently served from it.
//!
//! ```text
//! acquire() ──► Arc<Generation N> (refs += 1) ──► SearcherView
//! refresh() ──► reload source ──► swap current to Generation N+1
//! release(view) ──► refs -= 1 ──► last ref of a superseded generation drops it
//! ```
//!
//! Views hold their generation by `Arc`, so a refresh never invalidates a view
//! that is already out.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::{IndexHandle, IndexOpener, IndexSource};
use crate::error::{EngineError, SearcherError};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// One loaded state of an index
struct Generation<T> {
    id: u64,
    snapshot: T,
    refs: AtomicUsize,
}

/// Read-only view of one generation, held by a session.
///
/// Not `Clone`: every view goes back through exactly one `release()`.
pub struct SearcherView<T> {
    manager_id: u64,
    generation: Arc<Generation<T>>,
}

impl<T> SearcherView<T> {
    pub fn snapshot(&self) -> &T {
        &self.generation.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation.id
    }

    pub fn manager_id(&self) -> u64 {
        self.manager_id
    }
}

/// Why [`SearcherManager::release`] failed.
#[derive(Debug)]
pub(crate) enum ReleaseError<T> {
    /// The view was issued by another manager. Nothing was counted; the view
    /// comes back so it can still go to its owner.
    Foreign { expected: u64, view: SearcherView<T> },
    /// The engine's release hook failed after the bookkeeping was done.
    Engine(EngineError),
}

impl<T> ReleaseError<T> {
    pub(crate) fn into_engine_error(self) -> EngineError {
        match self {
            ReleaseError::Foreign { expected, view } => EngineError::ForeignView {
                expected,
                found: view.manager_id,
            },
            ReleaseError::Engine(error) => error,
        }
    }
}

impl<T> fmt::Debug for SearcherView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearcherView")
            .field("manager_id", &self.manager_id)
            .field("generation", &self.generation.id)
            .finish()
    }
}

/// Lifecycle owner of one opened index.
pub struct SearcherManager<S: IndexSource> {
    id: u64,
    handle: IndexHandle,
    source: S,
    current: RwLock<Arc<Generation<S::Snapshot>>>,
    refresh_lock: Mutex<()>,
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

impl<S: IndexSource> SearcherManager<S> {
    /// Open the index behind `handle`. Only the cache creates managers.
    pub(crate) fn open<O>(opener: &O, handle: &IndexHandle) -> Result<Self, SearcherError>
    where
        O: IndexOpener<Source = S>,
    {
        let open_failed = |source| SearcherError::Open {
            handle: handle.clone(),
            source,
        };

        let source = opener.open(handle).map_err(open_failed)?;
        let snapshot = match source.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Err(close_err) = source.close() {
                    tracing::warn!("closing half-opened index {} failed: {}", handle, close_err);
                }
                return Err(open_failed(e));
            }
        };

        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("opened index {} (manager {})", handle, id);

        Ok(Self {
            id,
            handle: handle.clone(),
            source,
            current: RwLock::new(Arc::new(Generation {
                id: 1,
                snapshot,
                refs: AtomicUsize::new(0),
            })),
            refresh_lock: Mutex::new(()),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// View of the current generation. Sessions pair this with [`release`].
    ///
    /// [`release`]: SearcherManager::release
    pub(crate) fn acquire(&self) -> Result<SearcherView<S::Snapshot>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }

        // count the reader before the read lock drops so a refresh sees it
        let generation = {
            let current = self.current.read();
            current.refs.fetch_add(1, Ordering::AcqRel);
            Arc::clone(&current)
        };
        if let Err(e) = self.source.retain(&generation.snapshot) {
            generation.refs.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        Ok(SearcherView {
            manager_id: self.id,
            generation,
        })
    }

    /// Hand a view back. For a view of this manager the bookkeeping always
    /// happens; the error, if any, comes from the engine's release hook.
    pub(crate) fn release(
        &self,
        view: SearcherView<S::Snapshot>,
    ) -> Result<(), ReleaseError<S::Snapshot>> {
        if view.manager_id != self.id {
            return Err(ReleaseError::Foreign {
                expected: self.id,
                view,
            });
        }

        let SearcherView { generation, .. } = view;
        let remaining = generation.refs.fetch_sub(1, Ordering::AcqRel) - 1;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        if remaining == 0 && generation.id != self.generation() {
            tracing::debug!(
                "generation {} of {} has no readers left, reclaiming",
                generation.id,
                self.handle
            );
        }

        self.source
            .release(&generation.snapshot)
            .map_err(ReleaseError::Engine)
    }

    /// Best-effort refresh: returns `Ok(false)` straight away when another
    /// thread is already refreshing this index.
    pub fn maybe_refresh(&self) -> Result<bool, EngineError> {
        match self.refresh_lock.try_lock() {
            Some(_guard) => self.refresh_locked(),
            None => Ok(false),
        }
    }

    /// Blocking refresh: waits for a concurrent refresh, then checks again.
    pub fn refresh(&self) -> Result<bool, EngineError> {
        let _guard = self.refresh_lock.lock();
        self.refresh_locked()
    }

    fn refresh_locked(&self) -> Result<bool, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if !self.source.reload()? {
            return Ok(false);
        }

        let snapshot = self.source.snapshot()?;
        let previous = {
            let mut current = self.current.write();
            let next = Arc::new(Generation {
                id: current.id + 1,
                snapshot,
                refs: AtomicUsize::new(0),
            });
            std::mem::replace(&mut *current, next)
        };

        tracing::debug!(
            "refreshed {} to generation {} ({} reader(s) left on generation {})",
            self.handle,
            previous.id + 1,
            previous.refs.load(Ordering::Acquire),
            previous.id
        );
        Ok(true)
    }

    /// Close the underlying source. Outstanding views are logged, not fatal.
    pub(crate) fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let outstanding = self.outstanding();
        if outstanding > 0 {
            tracing::warn!(
                "closing index {} with {} view(s) still outstanding",
                self.handle,
                outstanding
            );
        }

        let _guard = self.refresh_lock.lock();
        self.source.close()?;
        tracing::debug!("closed index {} (manager {})", self.handle, self.id);
        Ok(())
    }

    /// Process-unique identity of this manager
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> &IndexHandle {
        &self.handle
    }

    /// Current generation (starts at 1)
    pub fn generation(&self) -> u64 {
        self.current.read().id
    }

    /// Views acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: IndexSource> fmt::Debug for SearcherManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearcherManager")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("generation", &self.generation())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}
