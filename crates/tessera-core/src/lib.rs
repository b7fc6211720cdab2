//! Shared error type, configuration and result types for tessera.
//!
//! Every other crate in the workspace depends on this one. It carries no
//! storage or graph logic of its own.

pub mod config;
pub mod error;
pub mod tracing_config;
pub mod types;

pub use config::{
    DEFAULT_CAPACITY, DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH, DEFAULT_HNSW_M,
    DEFAULT_HNSW_MAX_LAYER, IndexConfig,
};
pub use error::{IndexError, IndexResult};
pub use types::{Precision, VectorHit};
