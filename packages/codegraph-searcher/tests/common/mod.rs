//! Common test utilities for codegraph-searcher
//!
//! `FakeOpener` is an in-memory engine: every index is a version number that a
//! test bumps with `commit()`. Each engine call is counted, and each step can be
//! told to fail per handle.

#![allow(dead_code)]

use codegraph_searcher::{
    EngineError, IndexHandle, IndexOpener, IndexSource, SearcherCache, SearcherCacheConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const THREAD_GROUP: &str = "test-search";

/// Engine calls across every index of one opener
#[derive(Debug, Default)]
pub struct EngineStats {
    pub opens: AtomicUsize,
    pub retains: AtomicUsize,
    pub releases: AtomicUsize,
    pub closes: AtomicUsize,
}

impl EngineStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn retains(&self) -> usize {
        self.retains.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Committed version and failure switches of one fake index
#[derive(Debug, Default)]
pub struct FakeIndex {
    pub version: AtomicU64,
    pub fail_open: AtomicBool,
    pub fail_retain: AtomicBool,
    pub fail_release: AtomicBool,
    pub fail_close: AtomicBool,
    pub open_delay_ms: AtomicU64,
}

#[derive(Default)]
pub struct FakeOpener {
    pub stats: Arc<EngineStats>,
    indexes: Mutex<HashMap<IndexHandle, Arc<FakeIndex>>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, handle: &IndexHandle) -> Arc<FakeIndex> {
        Arc::clone(
            self.indexes
                .lock()
                .entry(handle.clone())
                .or_insert_with(|| Arc::new(FakeIndex::default())),
        )
    }

    /// Simulate a writer committing new content
    pub fn commit(&self, handle: &IndexHandle) -> u64 {
        self.index(handle).version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl IndexOpener for FakeOpener {
    type Source = FakeSource;

    fn open(&self, handle: &IndexHandle) -> Result<FakeSource, EngineError> {
        let index = self.index(handle);
        self.stats.opens.fetch_add(1, Ordering::SeqCst);

        let delay = index.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if index.fail_open.load(Ordering::SeqCst) {
            return Err(EngineError::Corrupted(format!("{} has no segments file", handle)));
        }

        let loaded = index.version.load(Ordering::SeqCst);
        Ok(FakeSource {
            handle: handle.clone(),
            index,
            stats: Arc::clone(&self.stats),
            loaded: AtomicU64::new(loaded),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSnapshot {
    pub handle: IndexHandle,
    pub version: u64,
}

pub struct FakeSource {
    handle: IndexHandle,
    index: Arc<FakeIndex>,
    stats: Arc<EngineStats>,
    loaded: AtomicU64,
}

impl IndexSource for FakeSource {
    type Snapshot = FakeSnapshot;

    fn snapshot(&self) -> Result<FakeSnapshot, EngineError> {
        Ok(FakeSnapshot {
            handle: self.handle.clone(),
            version: self.loaded.load(Ordering::SeqCst),
        })
    }

    fn reload(&self) -> Result<bool, EngineError> {
        let committed = self.index.version.load(Ordering::SeqCst);
        Ok(self.loaded.swap(committed, Ordering::SeqCst) != committed)
    }

    fn retain(&self, _snapshot: &FakeSnapshot) -> Result<(), EngineError> {
        if self.index.fail_retain.load(Ordering::SeqCst) {
            return Err(EngineError::other(format!("{} refused a new reader", self.handle)));
        }
        self.stats.retains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, _snapshot: &FakeSnapshot) -> Result<(), EngineError> {
        // counted as attempted even when it fails
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
        if self.index.fail_release.load(Ordering::SeqCst) {
            return Err(EngineError::other(format!("{} reader already gone", self.handle)));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.index.fail_close.load(Ordering::SeqCst) {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "lock file busy",
            )));
        }
        Ok(())
    }
}

pub fn config(num_search_threads: i32) -> SearcherCacheConfig {
    SearcherCacheConfig::default()
        .num_search_threads(num_search_threads)
        .thread_group(THREAD_GROUP)
}

pub fn cache(num_search_threads: i32) -> SearcherCache<FakeOpener> {
    SearcherCache::new(config(num_search_threads), FakeOpener::new()).unwrap()
}

pub fn handles(names: &[&str]) -> Vec<IndexHandle> {
    names
        .iter()
        .map(|name| IndexHandle::new(format!("/data/index/{}", name)))
        .collect()
}

pub fn handle(name: &str) -> IndexHandle {
    IndexHandle::new(format!("/data/index/{}", name))
}
