//! # tessera
//!
//! Durable, precision-tunable vector storage with nearest-neighbor search
//! over string-identified embeddings.
//!
//! ```rust,ignore
//! use tessera::{Precision, open_or_create};
//!
//! let index = open_or_create("./vectors", 384, Precision::Half)?;
//! index.add("chunk-1", &embedding)?;
//! for hit in index.search(&query, 10)? {
//!     println!("{}: {:.4}", hit.identifier, hit.similarity);
//! }
//! index.close()?;
//! ```
//!
//! # Architecture
//!
//! ```text
//!  identifier + vector
//!         │
//!         ▼
//!  VectorIndexManager ──► IdentifierRegistry   (identifier ↔ label)
//!         │
//!         ├──► HnswGraph                        (full-precision vectors, labels)
//!         │
//!         └──► persist + precision codecs       (id_mapping.bin, index.bin,
//!                                                vectors.f16 / vectors.i8)
//! ```
//!
//! ## Crate Layout
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`tessera-core`](core) | Errors, config, precision and hit types, tracing conventions |
//! | [`tessera-index`](index) | Codecs, registry, file formats, HNSW graph, index manager |
//!
//! Hosts that need C-style status codes instead of `Result`s use
//! [`boundary`]; hosts without their own subscriber can call
//! [`tracing_setup::init_subscriber`].

use std::path::Path;

use tessera_core::tracing_config::targets;

/// Errors, configuration and shared types.
pub use tessera_core as core;
/// Codecs, registry, persistence formats, graph and index manager.
pub use tessera_index as index;

pub use tessera_core::{IndexConfig, IndexError, IndexResult, Precision, VectorHit};
pub use tessera_index::{AnnGraph, HnswGraph, IdentifierRegistry, Label, VectorIndexManager};

pub mod boundary;
pub mod tracing_setup;

/// Open the index under `path`, creating it if it has no mapping file yet.
///
/// A new index gets [`IndexConfig::default_capacity`] and `precision`; an
/// existing one keeps the precision it was created with.
///
/// # Errors
///
/// Any error from [`VectorIndexManager::open`] other than `IndexNotFound`,
/// or from [`VectorIndexManager::create`].
pub fn open_or_create(
    path: impl AsRef<Path>,
    dimension: usize,
    precision: Precision,
) -> IndexResult<VectorIndexManager> {
    open_or_create_with_config(path, dimension, Some(precision), IndexConfig::default())
}

/// [`open_or_create`] with explicit graph parameters and sizing.
///
/// A new index uses `precision`, or [`IndexConfig::default_precision`] when
/// it is `None`.
///
/// # Errors
///
/// As [`open_or_create`].
pub fn open_or_create_with_config(
    path: impl AsRef<Path>,
    dimension: usize,
    precision: Option<Precision>,
    config: IndexConfig,
) -> IndexResult<VectorIndexManager> {
    let path = path.as_ref();
    match VectorIndexManager::open_with_config(path, dimension, config.clone()) {
        Err(IndexError::IndexNotFound { .. }) => {
            tracing::debug!(
                target: targets::INDEX,
                path = %path.display(),
                "no index found; creating"
            );
            let capacity = config.default_capacity;
            let precision = precision.unwrap_or(config.default_precision);
            VectorIndexManager::create_with_config(path, dimension, capacity, precision, config)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_or_create_creates_then_reopens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = IndexConfig {
            default_capacity: 4,
            ..IndexConfig::default()
        };

        let index = open_or_create_with_config(dir.path(), 2, Some(Precision::Quant8), config.clone())
            .expect("create");
        assert_eq!(index.capacity().expect("capacity"), 4);
        index.add("a", &[1.0, 0.0]).expect("add");
        index.close().expect("close");

        let reopened =
            open_or_create_with_config(dir.path(), 2, Some(Precision::Full), config)
                .expect("reopen");
        assert_eq!(reopened.precision(), Precision::Quant8, "persisted precision wins");
        assert!(reopened.contains("a").expect("contains"));
    }

    #[test]
    fn configured_precision_applies_when_none_is_given() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = IndexConfig {
            default_capacity: 4,
            default_precision: Precision::Half,
            ..IndexConfig::default()
        };
        let index = open_or_create_with_config(dir.path(), 2, None, config).expect("create");
        assert_eq!(index.precision(), Precision::Half);
    }

    #[test]
    fn open_or_create_propagates_other_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = open_or_create(dir.path(), 3, Precision::Half).expect("create");
        index.add("a", &[1.0, 0.0, 0.0]).expect("add");
        index.close().expect("close");

        assert!(matches!(
            open_or_create(dir.path(), 5, Precision::Half),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }
}
