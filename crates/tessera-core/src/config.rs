//! Configuration for tessera vector indexes.
//!
//! [`IndexConfig`] holds the ANN graph parameters and the sizing defaults used
//! when an index is created or rebuilt from compressed vectors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::tracing_config::targets;
use crate::types::Precision;

/// Default HNSW `M` (max connections per node).
pub const DEFAULT_HNSW_M: usize = 16;
/// Default HNSW `ef_construction` (build-time beam width).
pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;
/// Default HNSW `ef_search` (query-time beam width).
pub const DEFAULT_HNSW_EF_SEARCH: usize = 50;
/// Default HNSW max layer depth.
pub const DEFAULT_HNSW_MAX_LAYER: usize = 16;
/// Capacity used when an index is created without an explicit one.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Tuning knobs for a vector index instance.
///
/// All fields have sensible defaults. Override selectively via struct update
/// syntax, a TOML file, or environment variables.
///
/// # Environment Variable Overrides
///
/// | Variable                       | Field                  | Default   |
/// |--------------------------------|------------------------|-----------|
/// | `TESSERA_HNSW_M`               | `hnsw_m`               | `16`      |
/// | `TESSERA_HNSW_EF_CONSTRUCTION` | `hnsw_ef_construction` | `200`     |
/// | `TESSERA_HNSW_EF_SEARCH`       | `hnsw_ef_search`       | `50`      |
/// | `TESSERA_DEFAULT_CAPACITY`     | `default_capacity`     | `100000`  |
/// | `TESSERA_PRECISION`            | `default_precision`    | `full`    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// HNSW M parameter (max connections per node).
    pub hnsw_m: usize,

    /// HNSW `ef_construction` parameter.
    pub hnsw_ef_construction: usize,

    /// HNSW `ef_search` parameter. Raised to `k` for larger queries.
    pub hnsw_ef_search: usize,

    /// Maximum HNSW layer depth.
    pub hnsw_max_layer: usize,

    /// Capacity used by open-or-create when a new index has to be created.
    pub default_capacity: usize,

    /// Minimum graph capacity when a compressed index is rebuilt on open.
    pub rebuild_capacity_floor: usize,

    /// Precision used by open-or-create when a new index has to be created.
    pub default_precision: Precision,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construction: DEFAULT_HNSW_EF_CONSTRUCTION,
            hnsw_ef_search: DEFAULT_HNSW_EF_SEARCH,
            hnsw_max_layer: DEFAULT_HNSW_MAX_LAYER,
            default_capacity: DEFAULT_CAPACITY,
            rebuild_capacity_floor: DEFAULT_CAPACITY,
            default_precision: Precision::Full,
        }
    }
}

impl IndexConfig {
    /// Load a TOML file with flat keys matching the field names.
    ///
    /// Falls back to `Default::default()` if the file is missing or malformed.
    #[must_use]
    pub fn from_toml_file(path: &Path) -> Self {
        std::fs::read_to_string(path).map_or_else(
            |_| Self::default(),
            |contents| match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        target: targets::CONFIG,
                        path = %path.display(),
                        error = %e,
                        "failed to parse index config, using defaults"
                    );
                    Self::default()
                }
            },
        )
    }

    /// Load overrides from environment variables.
    ///
    /// Only overrides fields for which environment variables are set.
    /// Invalid values are ignored (defaults are kept).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(m) = positive_env("TESSERA_HNSW_M") {
            self.hnsw_m = m;
        }
        if let Some(ef) = positive_env("TESSERA_HNSW_EF_CONSTRUCTION") {
            self.hnsw_ef_construction = ef;
        }
        if let Some(ef) = positive_env("TESSERA_HNSW_EF_SEARCH") {
            self.hnsw_ef_search = ef;
        }
        if let Some(capacity) = positive_env("TESSERA_DEFAULT_CAPACITY") {
            self.default_capacity = capacity;
        }
        if let Ok(val) = std::env::var("TESSERA_PRECISION")
            && let Ok(precision) = val.parse::<Precision>()
        {
            self.default_precision = precision;
        }
        self
    }

    /// Reject parameter combinations the graph cannot be built with.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::InvalidArgument` naming the first offending field.
    pub fn validate(&self) -> IndexResult<()> {
        let checks = [
            ("hnsw_m", self.hnsw_m),
            ("hnsw_ef_construction", self.hnsw_ef_construction),
            ("hnsw_ef_search", self.hnsw_ef_search),
            ("hnsw_max_layer", self.hnsw_max_layer),
            ("default_capacity", self.default_capacity),
            ("rebuild_capacity_floor", self.rebuild_capacity_floor),
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
        if self.hnsw_m > 256 {
            return Err(IndexError::invalid_argument(
                "hnsw_m",
                self.hnsw_m,
                "hnsw_m must be <= 256",
            ));
        }
        Ok(())
    }
}

fn positive_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .filter(|&value| value > 0)
}
