//! Tantivy backend
//!
//! Readers use `ReloadPolicy::Manual`: a new generation is only loaded when the
//! cache refreshes, and only if the committed opstamp moved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tantivy::collector::{Collector, SegmentCollector, TopDocs};
use tantivy::query::{EnableScoring, Query, QueryClone, Weight};
use tantivy::{DocAddress, Index, IndexReader, ReloadPolicy, Score, Searcher};

use crate::domain::{IndexHandle, IndexOpener, IndexSource};
use crate::error::{EngineError, Result};
use crate::execution::{CancellationToken, ExecutionError};
use crate::session::SessionView;

/// Opens on-disk tantivy indexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TantivyOpener;

impl IndexOpener for TantivyOpener {
    type Source = TantivySource;

    fn open(&self, handle: &IndexHandle) -> std::result::Result<TantivySource, EngineError> {
        let path = handle.path();
        if !path.is_dir() {
            return Err(EngineError::NotFound(path.to_path_buf()));
        }

        let index = Index::open_in_dir(path)?;
        // metas first: a commit landing in between is picked up by the next reload
        let opstamp = index.load_metas()?.opstamp;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        tracing::debug!("tantivy index {} opened at opstamp {}", handle, opstamp);
        Ok(TantivySource {
            index,
            reader,
            loaded_opstamp: AtomicU64::new(opstamp),
        })
    }
}

/// One open tantivy index and its manually reloaded reader.
pub struct TantivySource {
    index: Index,
    reader: IndexReader,
    loaded_opstamp: AtomicU64,
}

impl TantivySource {
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Opstamp of the commit the reader currently serves
    pub fn loaded_opstamp(&self) -> u64 {
        self.loaded_opstamp.load(Ordering::Acquire)
    }
}

impl IndexSource for TantivySource {
    type Snapshot = Searcher;

    fn snapshot(&self) -> std::result::Result<Searcher, EngineError> {
        Ok(self.reader.searcher())
    }

    fn reload(&self) -> std::result::Result<bool, EngineError> {
        let committed = self.index.load_metas()?.opstamp;
        if committed == self.loaded_opstamp() {
            return Ok(false);
        }

        self.reader.reload()?;
        self.loaded_opstamp.store(committed, Ordering::Release);
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════════

/// One hit of a (possibly federated) search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FederatedHit {
    pub score: Score,
    /// Position of the hit's index in the session's fetch order
    pub index_ord: usize,
    pub doc: DocAddress,
}

/// Top `limit` hits for `query` over a session view.
///
/// A single index is searched segment by segment on the session's pool. A
/// federated view searches each index on the pool and merges by score.
pub fn search_top_docs(
    view: &SessionView<Searcher>,
    query: &dyn Query,
    limit: usize,
) -> Result<Vec<FederatedHit>> {
    if limit == 0 || view.is_empty() {
        return Ok(Vec::new());
    }

    match view.single() {
        Some(searcher) => search_segments(view, searcher, query, limit),
        None => search_federated(view, query, limit),
    }
}

fn search_segments(
    view: &SessionView<Searcher>,
    searcher: &Searcher,
    query: &dyn Query,
    limit: usize,
) -> Result<Vec<FederatedHit>> {
    let collector = Arc::new(TopDocs::with_limit(limit));
    let weight: Arc<dyn Weight> = Arc::from(
        query
            .weight(EnableScoring::enabled_from_searcher(searcher))
            .map_err(EngineError::from)?,
    );

    let segments = searcher.segment_readers().len();
    let task_searcher = searcher.clone();
    let task_collector = Arc::clone(&collector);
    let cancellation = view.executor().cancellation();
    let results = view.executor().map_ordered(0..segments, move |ord| {
        collect_segment(
            &cancellation,
            task_collector.as_ref(),
            weight.as_ref(),
            &task_searcher,
            ord as u32,
        )
    })?;

    let mut fruits = Vec::with_capacity(segments);
    for result in results {
        fruits.push(result?.map_err(EngineError::from)?);
    }
    let top = collector.merge_fruits(fruits).map_err(EngineError::from)?;

    Ok(top
        .into_iter()
        .map(|(score, doc)| FederatedHit {
            score,
            index_ord: 0,
            doc,
        })
        .collect())
}

/// Collect one segment, unless the pool was hard-stopped before the task ran.
fn collect_segment<C: Collector>(
    cancellation: &CancellationToken,
    collector: &C,
    weight: &dyn Weight,
    searcher: &Searcher,
    ord: u32,
) -> std::result::Result<tantivy::Result<<C::Child as SegmentCollector>::Fruit>, ExecutionError> {
    cancellation.check()?;
    Ok(collector.collect_segment(weight, ord, searcher.segment_reader(ord)))
}

fn search_federated(
    view: &SessionView<Searcher>,
    query: &dyn Query,
    limit: usize,
) -> Result<Vec<FederatedHit>> {
    let query: Arc<dyn Query> = Arc::from(query.box_clone());
    let cancellation = view.executor().cancellation();
    let per_index = view.map_each(
        move |searcher: &Searcher| -> std::result::Result<_, ExecutionError> {
            cancellation.check()?;
            Ok(searcher.search(query.as_ref(), &TopDocs::with_limit(limit)))
        },
    )?;

    let mut hits = Vec::new();
    for (index_ord, top) in per_index.into_iter().enumerate() {
        let top = top?.map_err(EngineError::from)?;
        hits.extend(top.into_iter().map(|(score, doc)| FederatedHit {
            score,
            index_ord,
            doc,
        }));
    }

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.index_ord.cmp(&b.index_ord))
            .then_with(|| a.doc.cmp(&b.doc))
    });
    hits.truncate(limit);
    Ok(hits)
}
