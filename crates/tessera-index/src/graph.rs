//! Approximate nearest-neighbor graph seam and its `hnsw_rs` implementation.
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │          AnnGraph trait          │  labels: usize, inner-product distance
//! └──────────┬───────────────────────┘
//!            │
//!    ┌───────┴────────┐
//!    │   HnswGraph    │  (hnsw_rs wrapper + native TGRF save/load)
//!    └────────────────┘
//! ```
//!
//! `hnsw_rs` has no point removal, no resize and no stable save format we
//! control, so [`HnswGraph`] layers those on top: deleted labels live in a
//! side set that filters the graph walk, capacity is a logical bound, and
//! the full-precision vectors it keeps for `vector()` are also what the
//! `TGRF` file stores. Every call into `hnsw_rs` runs under `catch_unwind`.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::fs;
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use crc32fast::Hasher as Crc32Hasher;
use hnsw_rs::prelude::{Distance, FilterT, Hnsw};
use tessera_core::tracing_config::targets;
use tessera_core::{IndexConfig, IndexError, IndexResult};
use tracing::debug;

use crate::wire::{
    read_exact_or_corrupted, read_f32, read_len, read_u8, read_u16, read_u32, write_atomically,
    write_u32,
};

/// Magic bytes of the native graph file.
pub const GRAPH_MAGIC: [u8; 4] = *b"TGRF";
/// Supported native graph file version.
pub const GRAPH_VERSION: u16 = 1;

/// Inner-product distance `1 - <a, b>`, floored at zero.
///
/// Unit vectors can produce a dot product a few ULPs above one once the
/// rounding of long sums accumulates; `hnsw_rs` requires non-negative
/// distances, so the excess is clamped away.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampedDot;

impl Distance<f32> for ClampedDot {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        let dot: f32 = va.iter().zip(vb).map(|(a, b)| a * b).sum();
        (1.0 - dot).max(0.0)
    }
}

/// Operations the index manager needs from an ANN graph.
///
/// Labels are dense `usize` ids chosen by the caller. Distances are
/// inner-product distances (`1 - <q, v>`) over the vectors as inserted.
pub trait AnnGraph: Send + Debug {
    /// Vector dimensionality.
    fn dimension(&self) -> usize;

    /// Maximum number of points before [`resize`](Self::resize) is required.
    fn capacity(&self) -> usize;

    /// Points inserted so far, deleted ones included.
    fn point_count(&self) -> usize;

    /// Insert a vector under a label that has not been used before.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when full; `Graph` for a rejected label or a fault.
    fn insert(&mut self, label: usize, vector: &[f32]) -> IndexResult<()>;

    /// Soft-delete: the point stays in the graph but is never returned.
    ///
    /// # Errors
    ///
    /// `Graph` if the label was never inserted.
    fn mark_deleted(&mut self, label: usize) -> IndexResult<()>;

    /// Whether a label has been soft-deleted.
    fn is_deleted(&self, label: usize) -> bool;

    /// Grow the capacity. Shrinking is rejected.
    ///
    /// # Errors
    ///
    /// `Graph` if `new_capacity` is below the current capacity.
    fn resize(&mut self, new_capacity: usize) -> IndexResult<()>;

    /// Up to `k` non-deleted `(label, distance)` pairs, closest first.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` for a wrong-length query; `Graph` on a fault.
    fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<(usize, f32)>>;

    /// The vector stored under a label, as it was inserted.
    fn vector(&self, label: usize) -> Option<&[f32]>;

    /// Persist the graph in its native format.
    ///
    /// # Errors
    ///
    /// `Io` on write failures.
    fn save(&self, path: &Path) -> IndexResult<()>;
}

/// HNSW construction and query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_layer: usize,
}

impl From<&IndexConfig> for GraphParams {
    fn from(config: &IndexConfig) -> Self {
        Self {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
            max_layer: config.hnsw_max_layer,
        }
    }
}

/// [`AnnGraph`] over `hnsw_rs` with [`ClampedDot`].
pub struct HnswGraph {
    hnsw: Hnsw<'static, f32, ClampedDot>,
    vectors: BTreeMap<usize, Vec<f32>>,
    deleted: BTreeSet<usize>,
    dimension: usize,
    capacity: usize,
    params: GraphParams,
}

impl Debug for HnswGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswGraph")
            .field("points", &self.vectors.len())
            .field("deleted", &self.deleted.len())
            .field("dimension", &self.dimension)
            .field("capacity", &self.capacity)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl HnswGraph {
    /// Empty graph sized for `capacity` points.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero dimension, zero capacity or zero
    /// parameters; `Graph` if `hnsw_rs` fails to allocate.
    pub fn new(dimension: usize, capacity: usize, params: GraphParams) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::invalid_argument(
                "dimension",
                dimension,
                "dimension must be greater than zero",
            ));
        }
        if capacity == 0 {
            return Err(IndexError::invalid_argument(
                "capacity",
                capacity,
                "capacity must be greater than zero",
            ));
        }
        validate_params(params)?;

        let hnsw = guarded("construct", || {
            Hnsw::new(
                params.m,
                capacity,
                params.max_layer,
                params.ef_construction,
                ClampedDot,
            )
        })?;
        Ok(Self {
            hnsw,
            vectors: BTreeMap::new(),
            deleted: BTreeSet::new(),
            dimension,
            capacity,
            params,
        })
    }

    /// Rebuild a graph from a `TGRF` file written by [`AnnGraph::save`].
    ///
    /// Graph parameters, capacity and the soft-delete set come from the file.
    ///
    /// # Errors
    ///
    /// - `IndexNotFound` if the file is missing
    /// - `IndexCorrupted` for bad magic, version, CRC or truncation
    pub fn load(path: &Path) -> IndexResult<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::IndexNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(error) => return Err(error.into()),
        };
        if data.len() < 4 {
            return Err(IndexError::corrupted(path, "file shorter than its CRC trailer"));
        }
        let (body, trailer) = data.split_at(data.len() - 4);
        let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed_crc = crc32_of(body);
        if stored_crc != computed_crc {
            return Err(IndexError::corrupted(
                path,
                format!("CRC mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
            ));
        }

        let mut reader = Cursor::new(body);
        let mut magic = [0_u8; 4];
        read_exact_or_corrupted(&mut reader, &mut magic, path, "magic")?;
        if magic != GRAPH_MAGIC {
            return Err(IndexError::corrupted(
                path,
                format!("invalid magic bytes: expected {GRAPH_MAGIC:?}, found {magic:?}"),
            ));
        }
        let version = read_u16(&mut reader, path, "version")?;
        if version != GRAPH_VERSION {
            return Err(IndexError::corrupted(
                path,
                format!("unsupported TGRF version: {version}"),
            ));
        }

        let dimension = read_u32(&mut reader, path, "dimension")? as usize;
        let capacity = read_len(&mut reader, path, "capacity")?;
        let params = GraphParams {
            m: read_u32(&mut reader, path, "m")? as usize,
            ef_construction: read_u32(&mut reader, path, "ef_construction")? as usize,
            ef_search: read_u32(&mut reader, path, "ef_search")? as usize,
            max_layer: read_u32(&mut reader, path, "max_layer")? as usize,
        };
        let point_count = read_len(&mut reader, path, "point_count")?;
        let record_bytes = 8 + 1 + dimension * 4;
        if point_count.saturating_mul(record_bytes) > body.len() {
            return Err(IndexError::corrupted(
                path,
                format!("point_count {point_count} exceeds file size"),
            ));
        }

        let mut graph = Self::new(dimension, capacity.max(point_count).max(1), params)
            .map_err(|error| IndexError::corrupted(path, format!("invalid header: {error}")))?;
        let mut deleted = Vec::new();
        for _ in 0..point_count {
            let label = read_len(&mut reader, path, "label")?;
            let is_deleted = read_u8(&mut reader, path, "deleted")? != 0;
            let mut vector = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                vector.push(read_f32(&mut reader, path, "vector_value")?);
            }
            graph.insert(label, &vector).map_err(|error| {
                IndexError::corrupted(path, format!("cannot restore label {label}: {error}"))
            })?;
            if is_deleted {
                deleted.push(label);
            }
        }
        graph.deleted.extend(deleted);
        if reader.position() as usize != body.len() {
            return Err(IndexError::corrupted(path, "trailing bytes after last point"));
        }

        debug!(
            target: targets::GRAPH,
            path = %path.display(),
            dimension,
            capacity = graph.capacity,
            points = graph.vectors.len(),
            deleted = graph.deleted.len(),
            "graph loaded"
        );
        Ok(graph)
    }

    /// Parameters the graph was built with.
    #[must_use]
    pub const fn params(&self) -> GraphParams {
        self.params
    }

    fn encode(&self) -> IndexResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(40 + self.vectors.len() * (9 + self.dimension * 4));
        buf.extend_from_slice(&GRAPH_MAGIC);
        buf.extend_from_slice(&GRAPH_VERSION.to_le_bytes());
        write_u32(&mut buf, self.dimension, "dimension")?;
        buf.extend_from_slice(&(self.capacity as u64).to_le_bytes());
        write_u32(&mut buf, self.params.m, "m")?;
        write_u32(&mut buf, self.params.ef_construction, "ef_construction")?;
        write_u32(&mut buf, self.params.ef_search, "ef_search")?;
        write_u32(&mut buf, self.params.max_layer, "max_layer")?;
        buf.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for (&label, vector) in &self.vectors {
            buf.extend_from_slice(&(label as u64).to_le_bytes());
            buf.push(u8::from(self.deleted.contains(&label)));
            for value in vector {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        let crc = crc32_of(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

impl AnnGraph for HnswGraph {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn point_count(&self) -> usize {
        self.vectors.len()
    }

    fn insert(&mut self, label: usize, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }
        if self.vectors.contains_key(&label) {
            return Err(IndexError::Graph {
                operation: "insert",
                detail: format!("label {label} is already present"),
            });
        }
        if self.vectors.len() >= self.capacity || label >= self.capacity {
            return Err(IndexError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let hnsw = &self.hnsw;
        let outcome = guarded("insert", || hnsw.insert_slice((vector, label)));
        self.vectors.insert(label, vector.to_vec());
        if outcome.is_err() {
            // hnsw_rs may hold a partial point under this id; retire the label.
            self.deleted.insert(label);
        }
        outcome
    }

    fn mark_deleted(&mut self, label: usize) -> IndexResult<()> {
        if !self.vectors.contains_key(&label) {
            return Err(IndexError::Graph {
                operation: "mark_deleted",
                detail: format!("label {label} was never inserted"),
            });
        }
        self.deleted.insert(label);
        Ok(())
    }

    fn is_deleted(&self, label: usize) -> bool {
        self.deleted.contains(&label)
    }

    fn resize(&mut self, new_capacity: usize) -> IndexResult<()> {
        if new_capacity < self.capacity {
            return Err(IndexError::Graph {
                operation: "resize",
                detail: format!(
                    "cannot shrink capacity from {} to {new_capacity}",
                    self.capacity
                ),
            });
        }
        debug!(
            target: targets::GRAPH,
            from = self.capacity,
            to = new_capacity,
            "graph capacity grown"
        );
        self.capacity = new_capacity;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        let live = self.vectors.len() - self.deleted.len();
        if k == 0 || live == 0 {
            return Ok(Vec::new());
        }

        let hnsw = &self.hnsw;
        let neighbours = if self.deleted.is_empty() {
            let ef = self.params.ef_search.max(k);
            guarded("search", || hnsw.search(query, k, ef))?
        } else {
            // The layer entry point escapes the filter; ask for one extra.
            let fetch = k.saturating_add(1);
            let ef = self.params.ef_search.max(fetch);
            let keep: &dyn FilterT = &|id: &usize| !self.deleted.contains(id);
            guarded("search", || hnsw.search_filter(query, fetch, ef, Some(keep)))?
        };

        let mut hits: Vec<(usize, f32)> = neighbours
            .into_iter()
            .filter(|neighbour| !self.deleted.contains(&neighbour.d_id))
            .map(|neighbour| (neighbour.d_id, neighbour.distance))
            .collect();
        hits.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));
        hits.truncate(k);
        Ok(hits)
    }

    fn vector(&self, label: usize) -> Option<&[f32]> {
        self.vectors.get(&label).map(Vec::as_slice)
    }

    fn save(&self, path: &Path) -> IndexResult<()> {
        let bytes = self.encode()?;
        write_atomically(path, |writer| Ok(std::io::Write::write_all(writer, &bytes)?))?;
        debug!(
            target: targets::GRAPH,
            path = %path.display(),
            points = self.vectors.len(),
            deleted = self.deleted.len(),
            bytes = bytes.len(),
            "graph saved"
        );
        Ok(())
    }
}

fn validate_params(params: GraphParams) -> IndexResult<()> {
    let checks = [
        ("hnsw_m", params.m),
        ("hnsw_ef_construction", params.ef_construction),
        ("hnsw_ef_search", params.ef_search),
        ("hnsw_max_layer", params.max_layer),
    ];
    for (field, value) in checks {
        if value == 0 {
            return Err(IndexError::invalid_argument(
                field,
                value,
                format!("{field} must be greater than zero"),
            ));
        }
    }
    if params.m > 256 {
        return Err(IndexError::invalid_argument(
            "hnsw_m",
            params.m,
            "hnsw_m must be <= 256",
        ));
    }
    Ok(())
}

/// Run a call into `hnsw_rs`, turning a panic into `IndexError::Graph`.
fn guarded<T>(operation: &'static str, call: impl FnOnce() -> T) -> IndexResult<T> {
    catch_unwind(AssertUnwindSafe(call)).map_err(|payload| IndexError::Graph {
        operation,
        detail: panic_detail(&*payload),
    })
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_owned())
}

fn crc32_of(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
