//! Identifier-mapped, precision-aware vector index over an ANN graph.
//!
//! One [`VectorIndexManager`] owns one storage directory. All operations,
//! reads included, go through a single mutex; instances over different
//! directories are independent.
//!
//! ```text
//!   create ──┐
//!            ├──▶ Open ──close()──▶ Closed
//!   open ────┘     │ ▲
//!                  └─┘ add / delete / search / flush
//! ```
//!
//! Vectors are normalized to unit length before they reach the graph, so
//! the graph's inner-product distance is cosine distance and
//! `similarity = 1 - distance`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tessera_core::tracing_config::targets;
use tessera_core::{IndexConfig, IndexError, IndexResult, Precision, VectorHit};
use tracing::{debug, trace, warn};

use crate::graph::{AnnGraph, GraphParams, HnswGraph};
use crate::persist::{
    CompressedVectors, graph_path, mapping_path, read_mapping, vector_path, write_mapping,
    write_vectors,
};
use crate::registry::{IdentifierRegistry, Label};

/// State shared by every operation while the index is open.
#[derive(Debug)]
struct OpenIndex {
    graph: Box<dyn AnnGraph>,
    registry: IdentifierRegistry,
    dirty: bool,
}

#[derive(Debug)]
enum State {
    Open(OpenIndex),
    Closed,
}

/// A vector index bound to one storage directory.
///
/// Dimension and precision are fixed when the index is created and are
/// persisted alongside it. Dropping an open manager closes it (persisting
/// pending changes on a best-effort basis).
#[derive(Debug)]
pub struct VectorIndexManager {
    path: PathBuf,
    dimension: usize,
    precision: Precision,
    config: IndexConfig,
    state: Mutex<State>,
}

impl VectorIndexManager {
    /// Create a new, empty index with default graph parameters.
    ///
    /// # Errors
    ///
    /// See [`create_with_config`](Self::create_with_config).
    pub fn create(
        path: impl AsRef<Path>,
        dimension: usize,
        capacity: usize,
        precision: Precision,
    ) -> IndexResult<Self> {
        Self::create_with_config(path, dimension, capacity, precision, IndexConfig::default())
    }

    /// Create a new, empty index under `path`, creating the directory.
    ///
    /// Nothing is written until the first mutation is flushed or the index
    /// is closed.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty path, zero dimension or capacity, or
    ///   an invalid config
    /// - `Io` if the directory cannot be created
    pub fn create_with_config(
        path: impl AsRef<Path>,
        dimension: usize,
        capacity: usize,
        precision: Precision,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let path = path.as_ref();
        validate_path(path)?;
        validate_dimension(dimension)?;
        if capacity == 0 {
            return Err(IndexError::invalid_argument(
                "capacity",
                capacity,
                "capacity must be greater than zero",
            ));
        }
        config.validate()?;

        std::fs::create_dir_all(path)?;
        let graph = HnswGraph::new(dimension, capacity, GraphParams::from(&config))?;

        debug!(
            target: targets::INDEX,
            path = %path.display(),
            dimension,
            capacity,
            precision = %precision,
            "vector index created"
        );
        Ok(Self::from_parts(
            path.to_path_buf(),
            dimension,
            precision,
            config,
            Box::new(graph),
            IdentifierRegistry::new(),
        ))
    }

    /// Open an existing index with default graph parameters.
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> IndexResult<Self> {
        Self::open_inner(path.as_ref(), dimension, None, IndexConfig::default())
    }

    /// Open an existing index, taking its precision from the mapping file.
    ///
    /// Full-precision indexes reload the native graph file. Compressed
    /// indexes rebuild a fresh graph of capacity
    /// `max(slot_count, config.rebuild_capacity_floor)` from the compressed
    /// vector file, skipping tombstoned slots.
    ///
    /// # Errors
    ///
    /// - `IndexNotFound` if there is no mapping file under `path`
    /// - `DimensionMismatch` if the stored dimension differs from `dimension`
    /// - `IndexCorrupted` for malformed or inconsistent files
    pub fn open_with_config(
        path: impl AsRef<Path>,
        dimension: usize,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        Self::open_inner(path.as_ref(), dimension, None, config)
    }

    /// Open an existing index that must have been created with `precision`.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus `PrecisionMismatch` when the persisted
    /// precision differs.
    pub fn open_with_precision(
        path: impl AsRef<Path>,
        dimension: usize,
        precision: Precision,
    ) -> IndexResult<Self> {
        Self::open_inner(
            path.as_ref(),
            dimension,
            Some(precision),
            IndexConfig::default(),
        )
    }

    fn open_inner(
        path: &Path,
        dimension: usize,
        expected_precision: Option<Precision>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        validate_path(path)?;
        validate_dimension(dimension)?;
        config.validate()?;

        let (precision, registry) = read_mapping(&mapping_path(path))?;
        if let Some(expected) = expected_precision
            && expected != precision
        {
            return Err(IndexError::PrecisionMismatch {
                expected,
                found: precision,
            });
        }

        let graph = if precision.is_compressed() {
            rebuild_graph(path, dimension, precision, &registry, &config)?
        } else {
            load_graph(path, dimension, &registry)?
        };

        debug!(
            target: targets::INDEX,
            path = %path.display(),
            dimension,
            precision = %precision,
            capacity = graph.capacity(),
            slot_count = registry.slot_count(),
            live_count = registry.live_count(),
            "vector index opened"
        );
        Ok(Self::from_parts(
            path.to_path_buf(),
            dimension,
            precision,
            config,
            graph,
            registry,
        ))
    }

    pub(crate) fn from_parts(
        path: PathBuf,
        dimension: usize,
        precision: Precision,
        config: IndexConfig,
        graph: Box<dyn AnnGraph>,
        registry: IdentifierRegistry,
    ) -> Self {
        Self {
            path,
            dimension,
            precision,
            config,
            state: Mutex::new(State::Open(OpenIndex {
                graph,
                registry,
                dirty: false,
            })),
        }
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Insert or replace the vector stored under `identifier`.
    ///
    /// Replacing tombstones the identifier's current label and stores the new
    /// vector under a fresh label. Capacity doubles when the new label would
    /// not fit.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty identifier or non-finite components
    /// - `DimensionMismatch` for a wrong-length vector
    /// - `Graph` if the graph faults (the old label, if any, stays tombstoned)
    /// - `Closed` / `LockPoisoned`
    pub fn add(&self, identifier: &str, vector: &[f32]) -> IndexResult<()> {
        if identifier.is_empty() {
            return Err(IndexError::invalid_argument(
                "identifier",
                "",
                "identifier must be non-empty",
            ));
        }
        self.validate_vector("vector", vector)?;
        let normalized = normalize(vector);

        self.with_open(|open| {
            if let Some(old) = open.registry.lookup_label(identifier) {
                open.graph.mark_deleted(graph_label(old)?)?;
                open.registry.tombstone(old);
                open.dirty = true;
                trace!(
                    target: targets::INDEX,
                    identifier,
                    label = old,
                    "superseded label tombstoned"
                );
            }

            let label = open.registry.next_label();
            let graph_id = graph_label(label)?;
            let capacity = open.graph.capacity();
            if graph_id >= capacity {
                let mut grown = capacity.max(1);
                while graph_id >= grown {
                    grown = grown.saturating_mul(2);
                }
                open.graph.resize(grown)?;
                debug!(
                    target: targets::INDEX,
                    path = %self.path.display(),
                    from = capacity,
                    capacity = grown,
                    "index capacity doubled"
                );
            }

            if let Err(error) = open.graph.insert(graph_id, &normalized) {
                if open.graph.vector(graph_id).is_some() {
                    open.registry.retire_next_label();
                    open.dirty = true;
                    warn!(
                        target: targets::INDEX,
                        identifier,
                        label,
                        error = %error,
                        "graph fault consumed a label; slot tombstoned"
                    );
                }
                return Err(error);
            }
            let assigned = open.registry.assign_label(identifier)?;
            debug_assert_eq!(assigned, label);
            open.dirty = true;
            trace!(target: targets::INDEX, identifier, label, "vector added");
            Ok(())
        })
    }

    /// Remove `identifier`. Unknown identifiers are a successful no-op.
    ///
    /// # Errors
    ///
    /// `Graph` if the graph faults; `Closed` / `LockPoisoned`.
    pub fn delete(&self, identifier: &str) -> IndexResult<()> {
        self.with_open(|open| {
            let Some(label) = open.registry.lookup_label(identifier) else {
                trace!(target: targets::INDEX, identifier, "delete of unknown identifier");
                return Ok(());
            };
            open.graph.mark_deleted(graph_label(label)?)?;
            open.registry.tombstone(label);
            open.dirty = true;
            trace!(target: targets::INDEX, identifier, label, "vector deleted");
            Ok(())
        })
    }

    /// Up to `k` live identifiers closest to `query`, most similar first.
    ///
    /// An empty query returns no hits. A query that normalizes to the zero
    /// vector is valid; every candidate then ties at similarity 0.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for `k == 0` or non-finite components
    /// - `DimensionMismatch` for a wrong-length, non-empty query
    /// - `Graph` if the graph faults; `Closed` / `LockPoisoned`
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<VectorHit>> {
        if k == 0 {
            return Err(IndexError::invalid_argument(
                "k",
                k,
                "k must be greater than zero",
            ));
        }
        if query.is_empty() {
            return self.with_open(|_| Ok(Vec::new()));
        }
        self.validate_vector("query", query)?;
        let normalized = normalize(query);

        self.with_open(|open| {
            let neighbours = open.graph.search(&normalized, k)?;
            let mut hits: Vec<VectorHit> = neighbours
                .into_iter()
                .filter_map(|(graph_id, distance)| {
                    let label = graph_id as Label;
                    open.registry.identifier(label).map(|identifier| VectorHit {
                        identifier: identifier.to_owned(),
                        similarity: (1.0 - distance).clamp(0.0, 1.0),
                        label,
                    })
                })
                .collect();
            hits.sort_by(|left, right| {
                left.cmp_by_similarity(right)
                    .then_with(|| left.label.cmp(&right.label))
            });
            hits.truncate(k);
            trace!(target: targets::INDEX, k, returned = hits.len(), "search completed");
            Ok(hits)
        })
    }

    /// Persist pending changes and keep the index open.
    ///
    /// # Errors
    ///
    /// `Io` / `InvalidArgument` from the writers; `Closed` / `LockPoisoned`.
    pub fn flush(&self) -> IndexResult<()> {
        self.with_open(|open| {
            if open.dirty {
                self.persist(open)?;
                open.dirty = false;
            }
            Ok(())
        })
    }

    /// Persist pending changes and release the graph.
    ///
    /// The index is closed even when persisting fails; the error is still
    /// returned. Closing a closed index is a no-op.
    ///
    /// # Errors
    ///
    /// The first persistence error, or `LockPoisoned`.
    pub fn close(&self) -> IndexResult<()> {
        let mut guard = self.lock()?;
        let State::Open(open) = std::mem::replace(&mut *guard, State::Closed) else {
            return Ok(());
        };
        let result = if open.dirty {
            self.persist(&open)
        } else {
            Ok(())
        };
        if let Err(error) = &result {
            warn!(
                target: targets::INDEX,
                path = %self.path.display(),
                error = %error,
                "failed to persist index on close; resources released anyway"
            );
        }
        drop(open);
        debug!(target: targets::INDEX, path = %self.path.display(), "vector index closed");
        result
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Vector dimensionality.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// On-disk precision.
    #[must_use]
    pub const fn precision(&self) -> Precision {
        self.precision
    }

    /// Config the index was created or opened with.
    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock()
            .map(|guard| matches!(*guard, State::Closed))
            .unwrap_or(true)
    }

    /// Current graph capacity.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn capacity(&self) -> IndexResult<usize> {
        self.with_open(|open| Ok(open.graph.capacity()))
    }

    /// Number of live identifiers.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn live_count(&self) -> IndexResult<usize> {
        self.with_open(|open| Ok(open.registry.live_count()))
    }

    /// Number of labels ever allocated, tombstones included.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn slot_count(&self) -> IndexResult<usize> {
        self.with_open(|open| Ok(open.registry.slot_count()))
    }

    /// Whether there are changes not yet persisted.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn is_dirty(&self) -> IndexResult<bool> {
        self.with_open(|open| Ok(open.dirty))
    }

    /// Whether `identifier` has a live label.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn contains(&self, identifier: &str) -> IndexResult<bool> {
        self.label_of(identifier).map(|label| label.is_some())
    }

    /// Live label of `identifier`.
    ///
    /// # Errors
    ///
    /// `Closed` / `LockPoisoned`.
    pub fn label_of(&self, identifier: &str) -> IndexResult<Option<Label>> {
        self.with_open(|open| Ok(open.registry.lookup_label(identifier)))
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn lock(&self) -> IndexResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| IndexError::LockPoisoned)
    }

    fn with_open<T>(&self, op: impl FnOnce(&mut OpenIndex) -> IndexResult<T>) -> IndexResult<T> {
        let mut guard = self.lock()?;
        match &mut *guard {
            State::Open(open) => op(open),
            State::Closed => Err(IndexError::Closed),
        }
    }

    fn validate_vector(&self, field: &str, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }
        if let Some(position) = vector.iter().position(|value| !value.is_finite()) {
            return Err(IndexError::invalid_argument(
                field,
                vector[position],
                format!("component {position} is not finite"),
            ));
        }
        Ok(())
    }

    /// Write the mapping file, then the graph file (full) or the compressed
    /// vector file. Both writes are attempted; the first error is returned.
    fn persist(&self, open: &OpenIndex) -> IndexResult<()> {
        let mapping = write_mapping(&mapping_path(&self.path), self.precision, &open.registry);

        let vectors = match vector_path(&self.path, self.precision) {
            None => open.graph.save(&graph_path(&self.path)),
            Some(file) => write_vectors(
                &file,
                self.precision,
                self.dimension,
                open.registry.slot_count(),
                |label| {
                    if !open.registry.is_live(label) {
                        return None;
                    }
                    let vector = usize::try_from(label)
                        .ok()
                        .and_then(|id| open.graph.vector(id))
                        .map(<[f32]>::to_vec);
                    if vector.is_none() {
                        warn!(
                            target: targets::PERSIST,
                            label,
                            "live label has no vector in the graph; writing zeros"
                        );
                    }
                    vector
                },
            ),
        };

        debug!(
            target: targets::INDEX,
            path = %self.path.display(),
            precision = %self.precision,
            slot_count = open.registry.slot_count(),
            live_count = open.registry.live_count(),
            ok = mapping.is_ok() && vectors.is_ok(),
            "vector index persisted"
        );
        mapping.and(vectors)
    }
}

impl Drop for VectorIndexManager {
    fn drop(&mut self) {
        let still_open = matches!(
            self.state.get_mut().map(|state| &*state),
            Ok(State::Open(_))
        );
        if still_open && let Err(error) = self.close() {
            warn!(
                target: targets::INDEX,
                path = %self.path.display(),
                error = %error,
                "index dropped while open; persisting failed"
            );
        }
    }
}

fn load_graph(
    path: &Path,
    dimension: usize,
    registry: &IdentifierRegistry,
) -> IndexResult<Box<dyn AnnGraph>> {
    let file = graph_path(path);
    let graph = HnswGraph::load(&file).map_err(|error| match error {
        IndexError::IndexNotFound { .. } => {
            IndexError::corrupted(&file, "mapping file present but graph file missing")
        }
        other => other,
    })?;
    if graph.dimension() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            found: graph.dimension(),
        });
    }
    for (label, identifier) in registry.live() {
        let present = usize::try_from(label)
            .ok()
            .is_some_and(|id| graph.vector(id).is_some() && !graph.is_deleted(id));
        if !present {
            return Err(IndexError::corrupted(
                &file,
                format!("live identifier {identifier:?} at label {label} is missing from the graph"),
            ));
        }
    }
    Ok(Box::new(graph))
}

fn rebuild_graph(
    path: &Path,
    dimension: usize,
    precision: Precision,
    registry: &IdentifierRegistry,
    config: &IndexConfig,
) -> IndexResult<Box<dyn AnnGraph>> {
    let capacity = registry.slot_count().max(config.rebuild_capacity_floor);
    let mut graph = HnswGraph::new(dimension, capacity, GraphParams::from(config))?;

    let Some(file) = vector_path(path, precision) else {
        return Ok(Box::new(graph));
    };
    if registry.slot_count() == 0 && !file.exists() {
        return Ok(Box::new(graph));
    }
    let vectors = CompressedVectors::open(&file, precision, dimension)?;
    if vectors.len() < registry.slot_count() {
        return Err(IndexError::corrupted(
            &file,
            format!(
                "{} records for {} mapped slots",
                vectors.len(),
                registry.slot_count()
            ),
        ));
    }

    let mut restored = 0_usize;
    for (label, _) in registry.live() {
        // Decoded vectors are only approximately unit length.
        let vector = normalize(&vectors.decode(label)?);
        graph.insert(graph_label(label)?, &vector)?;
        restored += 1;
    }
    debug!(
        target: targets::INDEX,
        path = %file.display(),
        precision = %precision,
        capacity,
        restored,
        skipped = registry.slot_count() - restored,
        "graph rebuilt from compressed vectors"
    );
    Ok(Box::new(graph))
}

fn validate_path(path: &Path) -> IndexResult<()> {
    if path.as_os_str().is_empty() {
        return Err(IndexError::invalid_argument(
            "path",
            "",
            "storage path must be non-empty",
        ));
    }
    Ok(())
}

fn validate_dimension(dimension: usize) -> IndexResult<()> {
    if dimension == 0 {
        return Err(IndexError::invalid_argument(
            "dimension",
            dimension,
            "dimension must be greater than zero",
        ));
    }
    Ok(())
}

fn graph_label(label: Label) -> IndexResult<usize> {
    usize::try_from(label).map_err(|_| IndexError::Graph {
        operation: "label",
        detail: format!("label {label} does not fit in usize"),
    })
}

/// Scale to unit L2 norm. The zero vector is returned unchanged.
fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        vector.iter().map(|value| value / norm).collect()
    } else {
        vector.to_vec()
    }
}
