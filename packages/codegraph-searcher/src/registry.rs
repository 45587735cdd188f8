//! Handle → manager registry
//!
//! Each handle gets a slot, inserted with an atomic insert-if-absent. The slot is
//! a `OnceCell`, so when several threads race on an unseen handle exactly one
//! of them runs the opener and the others wait for its manager. A failed open
//! removes its slot again: nothing is registered and the next fetch retries.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::domain::{IndexHandle, IndexSource};
use crate::error::SearcherError;
use crate::manager::SearcherManager;

type Slot<S> = Arc<OnceCell<Arc<SearcherManager<S>>>>;

pub struct ManagerRegistry<S: IndexSource> {
    slots: DashMap<IndexHandle, Slot<S>>,
}

impl<S: IndexSource> Default for ManagerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: IndexSource> ManagerRegistry<S> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Registered manager for `handle`, if it finished opening.
    pub fn get(&self, handle: &IndexHandle) -> Option<Arc<SearcherManager<S>>> {
        self.slots
            .get(handle)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    /// Resolve the manager for `handle`, running `open` if nobody has yet.
    ///
    /// Returns the manager and whether this call created it.
    pub fn get_or_open<F>(
        &self,
        handle: &IndexHandle,
        open: F,
    ) -> Result<(Arc<SearcherManager<S>>, bool), SearcherError>
    where
        F: FnOnce() -> Result<SearcherManager<S>, SearcherError>,
    {
        // clone the slot out so no shard lock is held while opening
        let slot = self.slot(handle);

        let mut created = false;
        let opened = slot.get_or_try_init(|| {
            created = true;
            open().map(Arc::new)
        });

        match opened {
            Ok(manager) => Ok((Arc::clone(manager), created)),
            Err(e) => {
                // the last holder of a still-empty slot removes it; a waiter
                // that is about to retry the open keeps it alive
                let ptr = Arc::as_ptr(&slot);
                drop(slot);
                self.slots.remove_if(handle, |_, s| {
                    Arc::as_ptr(s) == ptr && Arc::strong_count(s) == 1 && s.get().is_none()
                });
                Err(e)
            }
        }
    }

    fn slot(&self, handle: &IndexHandle) -> Slot<S> {
        if let Some(slot) = self.slots.get(handle) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .slots
            .entry(handle.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()));
        Arc::clone(slot.value())
    }

    /// Remove every slot; returns the opened managers ordered by handle.
    pub fn drain(&self) -> Vec<Arc<SearcherManager<S>>> {
        let mut handles: Vec<IndexHandle> = self.slots.iter().map(|e| e.key().clone()).collect();
        handles.sort();

        handles
            .iter()
            .filter_map(|handle| self.slots.remove(handle))
            .filter_map(|(_, slot)| slot.get().map(Arc::clone))
            .collect()
    }

    /// Handles with an opened manager, sorted
    pub fn handles(&self) -> Vec<IndexHandle> {
        let mut handles: Vec<IndexHandle> = self
            .slots
            .iter()
            .filter(|e| e.value().get().is_some())
            .map(|e| e.key().clone())
            .collect();
        handles.sort();
        handles
    }

    /// Opened managers (empty slots of failed opens are not counted)
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|e| e.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all opened managers
    pub fn managers(&self) -> Vec<Arc<SearcherManager<S>>> {
        self.slots
            .iter()
            .filter_map(|e| e.value().get().map(Arc::clone))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndexOpener;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct StaticSource;

    impl IndexSource for StaticSource {
        type Snapshot = ();

        fn snapshot(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn reload(&self) -> Result<bool, EngineError> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct SlowOpener {
        opens: AtomicUsize,
        fail: AtomicBool,
        fail_once: AtomicBool,
    }

    impl IndexOpener for SlowOpener {
        type Source = StaticSource;

        fn open(&self, _handle: &IndexHandle) -> Result<StaticSource, EngineError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            if self.fail.load(Ordering::SeqCst) || self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Corrupted("segments file truncated".into()));
            }
            Ok(StaticSource)
        }
    }

    #[test]
    fn test_racing_opens_construct_one_manager() {
        let registry = Arc::new(ManagerRegistry::<StaticSource>::new());
        let opener = Arc::new(SlowOpener::default());
        let barrier = Arc::new(Barrier::new(8));
        let handle = IndexHandle::new("/idx/racy");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let opener = Arc::clone(&opener);
                let barrier = Arc::clone(&barrier);
                let handle = handle.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let (manager, created) = registry
                        .get_or_open(&handle, || SearcherManager::open(opener.as_ref(), &handle))
                        .unwrap();
                    (manager.id(), created)
                })
            })
            .collect();

        let results: Vec<(u64, bool)> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        assert!(results.iter().all(|(id, _)| *id == results[0].0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_open_registers_nothing() {
        let registry = ManagerRegistry::<StaticSource>::new();
        let opener = SlowOpener::default();
        opener.fail.store(true, Ordering::SeqCst);
        let handle = IndexHandle::new("/idx/broken");

        let err = registry
            .get_or_open(&handle, || SearcherManager::open(&opener, &handle))
            .unwrap_err();
        assert_eq!(err.handle(), Some(&handle));
        assert!(registry.get(&handle).is_none());
        assert!(registry.is_empty());
        assert!(registry.handles().is_empty());

        // repaired index opens on the next attempt
        opener.fail.store(false, Ordering::SeqCst);
        let (_, created) = registry
            .get_or_open(&handle, || SearcherManager::open(&opener, &handle))
            .unwrap();
        assert!(created);
        assert_eq!(registry.handles(), vec![handle]);
    }

    #[test]
    fn test_failed_opens_leave_no_slots_behind() {
        let registry = ManagerRegistry::<StaticSource>::new();
        let opener = SlowOpener::default();
        opener.fail.store(true, Ordering::SeqCst);

        for i in 0..5 {
            let handle = IndexHandle::new(format!("/idx/missing-{}", i));
            assert!(registry
                .get_or_open(&handle, || SearcherManager::open(&opener, &handle))
                .is_err());
        }
        assert_eq!(registry.slots.len(), 0);

        opener.fail.store(false, Ordering::SeqCst);
        let handle = IndexHandle::new("/idx/missing-0");
        registry
            .get_or_open(&handle, || SearcherManager::open(&opener, &handle))
            .unwrap();
        assert_eq!(registry.slots.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_waiter_that_opens_after_failure_stays_registered() {
        let registry = Arc::new(ManagerRegistry::<StaticSource>::new());
        let opener = Arc::new(SlowOpener::default());
        opener.fail_once.store(true, Ordering::SeqCst);
        let barrier = Arc::new(Barrier::new(2));
        let handle = IndexHandle::new("/idx/flaky");

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let opener = Arc::clone(&opener);
                let barrier = Arc::clone(&barrier);
                let handle = handle.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_open(&handle, || SearcherManager::open(opener.as_ref(), &handle))
                        .map(|(manager, _)| manager.id())
                        .ok()
                })
            })
            .collect();

        let ids: Vec<u64> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();

        // whoever opened after the failure is the registered manager
        let registered = registry.get(&handle).map(|m| m.id());
        assert!(!ids.is_empty());
        assert!(ids.iter().all(|id| Some(*id) == registered));
        assert_eq!(registry.slots.len(), 1);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ManagerRegistry::<StaticSource>::new();
        let opener = SlowOpener::default();
        for name in ["/idx/b", "/idx/a"] {
            let handle = IndexHandle::new(name);
            registry
                .get_or_open(&handle, || SearcherManager::open(&opener, &handle))
                .unwrap();
        }

        let drained = registry.drain();
        let names: Vec<String> = drained.iter().map(|m| m.handle().to_string()).collect();
        assert_eq!(names, vec!["/idx/a", "/idx/b"]);
        assert!(registry.is_empty());
        assert!(registry.managers().is_empty());
    }
}
