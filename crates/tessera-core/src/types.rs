//! Result and storage types shared across tessera crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// On-disk numeric encoding of stored vectors.
///
/// Runtime search always works on full-precision `f32` vectors; precision only
/// decides how vectors are written to disk. It is fixed when an index is
/// created and recorded in the mapping file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Precision {
    /// 4 bytes per dimension. Vectors live in the native graph file.
    #[default]
    Full = 0,
    /// 2 bytes per dimension (IEEE 754 binary16).
    Half = 1,
    /// 1 byte per dimension plus one `f32` scale per vector.
    Quant8 = 2,
}

impl Precision {
    /// Decode the `int32` precision tag stored in the mapping file.
    #[must_use]
    pub const fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Full),
            1 => Some(Self::Half),
            2 => Some(Self::Quant8),
            _ => None,
        }
    }

    /// The `int32` tag written to the mapping file.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        self as i32
    }

    /// Whether vectors are persisted in a separate compressed vector file.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        !matches!(self, Self::Full)
    }

    /// Size in bytes of one persisted vector record at this precision.
    ///
    /// FULL precision has no compressed record; its size is reported as the
    /// raw `f32` payload for comparison purposes.
    #[must_use]
    pub const fn record_bytes(self, dimension: usize) -> usize {
        match self {
            Self::Full => dimension * 4,
            Self::Half => dimension * 2,
            Self::Quant8 => 4 + dimension,
        }
    }

    /// Lowercase name used in logs and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Half => "half",
            Self::Quant8 => "quant8",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "f32" | "float32" => Ok(Self::Full),
            "half" | "f16" | "float16" => Ok(Self::Half),
            "quant8" | "int8" | "i8" => Ok(Self::Quant8),
            other => Err(format!(
                "unknown precision {other:?}; expected full, half or quant8"
            )),
        }
    }
}

/// A single nearest-neighbor result resolved back to its string identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    /// Caller-supplied identifier of the matched vector.
    pub identifier: String,
    /// Cosine similarity in `[0, 1]`.
    pub similarity: f32,
    /// Label the vector occupies inside the ANN graph.
    pub label: u64,
}

impl VectorHit {
    /// Ordering by similarity descending with NaN-safe semantics.
    /// NaN sorts below all real values.
    #[must_use]
    pub fn cmp_by_similarity(&self, other: &Self) -> std::cmp::Ordering {
        let a = if self.similarity.is_nan() {
            f32::NEG_INFINITY
        } else {
            self.similarity
        };
        let b = if other.similarity.is_nan() {
            f32::NEG_INFINITY
        } else {
            other.similarity
        };
        b.total_cmp(&a)
    }
}
