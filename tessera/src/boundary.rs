//! Status-code boundary for hosts that cannot consume `Result`.
//!
//! Every function here catches both errors and panics: `create`/`open`
//! return `None` instead of a handle, `add`/`delete` return
//! [`STATUS_OK`] or [`STATUS_FAILURE`], and `search` returns `None` on
//! failure. The detailed error is logged under the `tessera.boundary`
//! target before it is collapsed: rejected arguments at `warn`, everything
//! else at `error`.
//!
//! [`IndexHandle`] cannot be cloned; [`close`] consumes it, so a closed
//! handle cannot be used again. [`SearchResults`] owns its buffers and is
//! released by [`free_results`] or when it goes out of scope.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use tessera_core::tracing_config::targets;
use tessera_core::{IndexError, IndexResult, Precision};
use tessera_index::VectorIndexManager;
use tracing::{Level, error, warn};

/// Returned by `add`/`delete` on success.
pub const STATUS_OK: i32 = 0;
/// Returned by `add`/`delete` on any failure.
pub const STATUS_FAILURE: i32 = -1;

/// Exclusive handle to an open index.
#[derive(Debug)]
pub struct IndexHandle {
    index: VectorIndexManager,
}

impl IndexHandle {
    /// The underlying manager, for callers that want `Result`s back.
    #[must_use]
    pub const fn manager(&self) -> &VectorIndexManager {
        &self.index
    }
}

/// One search hit as returned across the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub identifier: String,
    pub similarity: f32,
}

/// Owned, ordered search results (most similar first).
#[derive(Debug, Default, PartialEq)]
pub struct SearchResults {
    hits: Vec<SearchResult>,
}

impl SearchResults {
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SearchResult> {
        self.hits.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.hits.iter()
    }

    /// Take ownership of the hits.
    #[must_use]
    pub fn into_vec(self) -> Vec<SearchResult> {
        self.hits
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a SearchResult;
    type IntoIter = std::slice::Iter<'a, SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

/// Create an index. `precision` is the wire tag: 0 full, 1 half, 2 quant8.
#[must_use]
pub fn create(path: &str, dimension: i32, capacity: i32, precision: i32) -> Option<IndexHandle> {
    guard("create", None, || {
        let precision = precision_from_tag(precision)?;
        let dimension = positive("dimension", dimension)?;
        let capacity = positive("capacity", capacity)?;
        let index = VectorIndexManager::create(path, dimension, capacity, precision)?;
        Ok(Some(IndexHandle { index }))
    })
}

/// Open an existing index; its precision comes from the mapping file.
#[must_use]
pub fn open(path: &str, dimension: i32) -> Option<IndexHandle> {
    guard("open", None, || {
        let dimension = positive("dimension", dimension)?;
        let index = VectorIndexManager::open(path, dimension)?;
        Ok(Some(IndexHandle { index }))
    })
}

/// Open the index under `path`, creating it with `precision` if absent.
#[must_use]
pub fn open_or_create(path: &str, dimension: i32, precision: i32) -> Option<IndexHandle> {
    guard("open_or_create", None, || {
        let precision = precision_from_tag(precision)?;
        let dimension = positive("dimension", dimension)?;
        let index = crate::open_or_create(Path::new(path), dimension, precision)?;
        Ok(Some(IndexHandle { index }))
    })
}

/// Insert or replace a vector. Returns [`STATUS_OK`] or [`STATUS_FAILURE`].
#[must_use]
pub fn add(handle: &IndexHandle, identifier: &str, vector: &[f32]) -> i32 {
    guard("add", STATUS_FAILURE, || {
        handle.index.add(identifier, vector)?;
        Ok(STATUS_OK)
    })
}

/// Delete an identifier. Unknown identifiers succeed.
#[must_use]
pub fn delete(handle: &IndexHandle, identifier: &str) -> i32 {
    guard("delete", STATUS_FAILURE, || {
        handle.index.delete(identifier)?;
        Ok(STATUS_OK)
    })
}

/// Top-`k` search. An empty result set is a success (`Some`).
#[must_use]
pub fn search(handle: &IndexHandle, query: &[f32], k: i32) -> Option<SearchResults> {
    guard("search", None, || {
        let k = positive("k", k)?;
        let hits = handle
            .index
            .search(query, k)?
            .into_iter()
            .map(|hit| SearchResult {
                identifier: hit.identifier,
                similarity: hit.similarity,
            })
            .collect();
        Ok(Some(SearchResults { hits }))
    })
}

/// Release a result set returned by [`search`].
pub fn free_results(results: SearchResults) {
    drop(results);
}

/// Persist pending changes (best effort) and release the index.
pub fn close(handle: IndexHandle) {
    guard("close", (), || handle.index.close());
}

fn guard<T>(operation: &'static str, fallback: T, call: impl FnOnce() -> IndexResult<T>) -> T {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            report(operation, &err);
            fallback
        }
        Err(_) => {
            error!(target: targets::BOUNDARY, operation, "operation panicked");
            fallback
        }
    }
}

/// Log a collapsed error; returns the level it was logged at.
fn report(operation: &'static str, err: &IndexError) -> Level {
    if err.is_invalid_argument() {
        warn!(target: targets::BOUNDARY, operation, error = %err, "argument rejected");
        Level::WARN
    } else {
        error!(target: targets::BOUNDARY, operation, error = %err, "operation failed");
        Level::ERROR
    }
}

fn positive(field: &str, value: i32) -> IndexResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|&value| value > 0)
        .ok_or_else(|| IndexError::invalid_argument(field, value, format!("{field} must be > 0")))
}

fn precision_from_tag(tag: i32) -> IndexResult<Precision> {
    Precision::from_wire(tag).ok_or_else(|| {
        IndexError::invalid_argument("precision", tag, "expected 0 (full), 1 (half) or 2 (quant8)")
    })
}
