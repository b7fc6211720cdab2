use std::path::PathBuf;

use crate::types::Precision;

/// Unified error type covering every failure mode of a tessera index.
///
/// Each variant carries an actionable message. Inside the Rust API errors are
/// propagated with `?`; only the status-code boundary in the `tessera` facade
/// collapses them into `0 / -1` codes or `None` handles.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    // === Argument errors ===
    /// A caller-supplied argument is invalid (empty identifier, zero size, non-finite value).
    #[error("Invalid argument: {field} = \"{value}\" ({reason})")]
    InvalidArgument {
        /// Which argument.
        field: String,
        /// The rejected value, rendered for display.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Vector dimension does not match the index dimension.
    #[error(
        "Dimension mismatch: index has {expected}-dim vectors, got {found}-dim. Use the dimension the index was created with."
    )]
    DimensionMismatch {
        /// Dimension the index was created with.
        expected: usize,
        /// Dimension that was supplied or found on disk.
        found: usize,
    },

    /// The persisted precision differs from the one requested at open time.
    #[error(
        "Precision mismatch: requested {expected}, index was created with {found}. Precision is fixed at creation."
    )]
    PrecisionMismatch {
        /// Precision the caller asked for.
        expected: Precision,
        /// Precision recorded in the mapping file.
        found: Precision,
    },

    // === Storage errors ===
    /// No mapping file exists under the storage path.
    #[error("Vector index not found at {path}. Create the index before opening it.")]
    IndexNotFound {
        /// Expected mapping file path.
        path: PathBuf,
    },

    /// A persisted file is malformed (bad tag, truncated, invalid UTF-8, CRC mismatch).
    #[error("Vector index corrupted at {path}: {detail}. Delete the directory and rebuild.")]
    IndexCorrupted {
        /// Path to the corrupted file.
        path: PathBuf,
        /// Nature of the corruption.
        detail: String,
    },

    // === ANN primitive errors ===
    /// The ANN graph raised a fault (including a caught panic).
    #[error("ANN graph failure during {operation}: {detail}")]
    Graph {
        /// Which graph operation failed.
        operation: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// An insertion would exceed the graph capacity.
    #[error("ANN graph capacity {capacity} exhausted. Resize the graph before inserting.")]
    CapacityExceeded {
        /// Capacity at the time of the insertion.
        capacity: usize,
    },

    // === Lifecycle errors ===
    /// The index was already closed.
    #[error("Vector index is closed. Open it again to continue.")]
    Closed,

    /// The per-index lock was poisoned by a panic in another thread.
    #[error("Vector index lock poisoned by a panicking thread. Reopen the index.")]
    LockPoisoned,

    // === I/O errors ===
    /// Wraps `std::io::Error` for file operations.
    #[error("I/O error: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the tessera crates.
pub type IndexResult<T> = Result<T, IndexError>;

impl IndexError {
    /// Build an [`IndexError::InvalidArgument`].
    pub fn invalid_argument(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Build an [`IndexError::IndexCorrupted`].
    pub fn corrupted(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::IndexCorrupted {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether the error was raised before any state mutation.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::DimensionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IndexError>();
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IndexError = io_err.into();
        assert!(matches!(err, IndexError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn dimension_mismatch_message_has_both_sizes() {
        let err = IndexError::DimensionMismatch {
            expected: 384,
            found: 256,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("256"));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn precision_mismatch_names_both_precisions() {
        let err = IndexError::PrecisionMismatch {
            expected: Precision::Half,
            found: Precision::Quant8,
        };
        let msg = err.to_string();
        assert!(msg.contains("half"));
        assert!(msg.contains("quant8"));
    }

    #[test]
    fn corrupted_helper_keeps_path_and_detail() {
        let err = IndexError::corrupted("/data/id_mapping.bin", "truncated slot table");
        let msg = err.to_string();
        assert!(msg.contains("/data/id_mapping.bin"));
        assert!(msg.contains("truncated slot table"));
        assert!(!err.is_invalid_argument());
    }

    #[test]
    fn invalid_argument_display() {
        let err = IndexError::invalid_argument("capacity", 0, "capacity must be greater than zero");
        let msg = err.to_string();
        assert!(msg.contains("capacity"));
        assert!(msg.contains("\"0\""));
        assert!(msg.contains("greater than zero"));
    }

    #[test]
    fn graph_error_names_operation() {
        let err = IndexError::Graph {
            operation: "insert",
            detail: "panic: assertion failed".into(),
        };
        assert!(err.to_string().contains("insert"));
    }

    #[test]
    fn closed_and_poisoned_are_actionable() {
        assert!(IndexError::Closed.to_string().contains("Open it again"));
        assert!(IndexError::LockPoisoned.to_string().contains("Reopen"));
    }
}
