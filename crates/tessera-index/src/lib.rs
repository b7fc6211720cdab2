//! Identifier-mapped, precision-aware vector index for tessera.
//!
//! Callers address vectors by arbitrary string identifiers; the index maps
//! them to the dense integer labels an HNSW graph needs, persists that
//! mapping, and stores vectors at one of three precisions.
//!
//! # Storage Directory Layout
//!
//! ```text
//! <path>/
//! ├── id_mapping.bin    identifier registry + precision tag (always)
//! ├── index.bin         TGRF graph file              (full precision)
//! ├── vectors.f16       half-precision records       (half precision)
//! └── vectors.i8        scale + int8 records         (quant8 precision)
//! ```
//!
//! Compressed indexes never persist the graph itself: on open it is rebuilt
//! from the decoded vectors of every live label.
//!
//! # Modules
//!
//! - [`precision`]: binary16 and symmetric int8 codecs
//! - [`registry`]: identifier ↔ label bookkeeping with tombstones
//! - [`persist`]: mapping and compressed vector file formats
//! - [`graph`]: the ANN graph seam and its `hnsw_rs` implementation
//! - [`manager`]: [`VectorIndexManager`], the lifecycle and locking layer

pub mod graph;
pub mod manager;
pub mod persist;
pub mod precision;
pub mod registry;
mod wire;

pub use graph::{AnnGraph, GraphParams, HnswGraph};
pub use manager::VectorIndexManager;
pub use persist::{GRAPH_FILE, HALF_VECTOR_FILE, MAPPING_FILE, QUANT8_VECTOR_FILE};
pub use registry::{IdentifierRegistry, Label};
pub use tessera_core::{IndexConfig, IndexError, IndexResult, Precision, VectorHit};
