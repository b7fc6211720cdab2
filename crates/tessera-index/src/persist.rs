//! Binary persistence of the identifier registry and compressed vectors.
//!
//! # Mapping file (`id_mapping.bin`)
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ precision: i32   (0 full, 1 half, 2 quant8)  │
//! │ slot_count: u64                              │
//! │ next_label: u64                              │
//! ├──────────────────────────────────────────────┤
//! │ per slot, ascending label:                   │
//! │   label: u64 | id_len: u64 | id: [u8; len]   │  id_len = 0 → tombstone
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Compressed vector file (`vectors.f16` / `vectors.i8`)
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ vector_count: u32 | dimension: u32           │
//! ├──────────────────────────────────────────────┤
//! │ record[label] at 8 + label × stride          │
//! │   half:   dimension × u16                    │
//! │   quant8: scale: f32 | dimension × i8        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every slot, tombstoned or not, occupies one record so that a record's
//! offset depends only on its label. Tombstones are written as zeros.
//! All integers are little-endian.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tessera_core::tracing_config::targets;
use tessera_core::{IndexError, IndexResult, Precision};
use tracing::{debug, warn};

use crate::precision::{decode_half, dequantize_int8, encode_half_vector, quantize_int8};
use crate::registry::{IdentifierRegistry, Label};
use crate::wire::{
    read_exact_or_corrupted, read_i32, read_len, read_u64, write_atomically, write_u32, write_u64,
};

/// Identifier mapping file name.
pub const MAPPING_FILE: &str = "id_mapping.bin";
/// Native graph file written for full precision.
pub const GRAPH_FILE: &str = "index.bin";
/// Compressed vector file for half precision.
pub const HALF_VECTOR_FILE: &str = "vectors.f16";
/// Compressed vector file for 8-bit quantization.
pub const QUANT8_VECTOR_FILE: &str = "vectors.i8";

/// Size of the compressed vector file header.
pub const VECTOR_HEADER_BYTES: usize = 8;

const MAPPING_HEADER_BYTES: u64 = 4 + 8 + 8;
const MAPPING_SLOT_MIN_BYTES: u64 = 8 + 8;

/// Path of the mapping file under a storage directory.
#[must_use]
pub fn mapping_path(dir: &Path) -> PathBuf {
    dir.join(MAPPING_FILE)
}

/// Path of the native graph file under a storage directory.
#[must_use]
pub fn graph_path(dir: &Path) -> PathBuf {
    dir.join(GRAPH_FILE)
}

/// Compressed vector file name for a precision (`None` for full precision).
#[must_use]
pub const fn vector_file_name(precision: Precision) -> Option<&'static str> {
    match precision {
        Precision::Full => None,
        Precision::Half => Some(HALF_VECTOR_FILE),
        Precision::Quant8 => Some(QUANT8_VECTOR_FILE),
    }
}

/// Path of the compressed vector file (`None` for full precision).
#[must_use]
pub fn vector_path(dir: &Path, precision: Precision) -> Option<PathBuf> {
    vector_file_name(precision).map(|name| dir.join(name))
}

// ─── Mapping file ───────────────────────────────────────────────────────────

/// Write the registry and the index precision to `path`.
///
/// # Errors
///
/// Returns `IndexError::Io` on write, sync or rename failures.
pub fn write_mapping(
    path: &Path,
    precision: Precision,
    registry: &IdentifierRegistry,
) -> IndexResult<()> {
    write_atomically(path, |writer| {
        writer.write_all(&precision.to_wire().to_le_bytes())?;
        write_u64(writer, registry.slot_count())?;
        writer.write_all(&registry.next_label().to_le_bytes())?;
        for (label, identifier) in registry.slots() {
            let bytes = identifier.unwrap_or_default().as_bytes();
            writer.write_all(&label.to_le_bytes())?;
            write_u64(writer, bytes.len())?;
            writer.write_all(bytes)?;
        }
        Ok(())
    })?;
    debug!(
        target: targets::PERSIST,
        path = %path.display(),
        precision = %precision,
        slot_count = registry.slot_count(),
        live_count = registry.live_count(),
        "mapping file written"
    );
    Ok(())
}

/// Read a mapping file back into its precision and registry.
///
/// Slot records whose label lies beyond the declared slot count are skipped.
///
/// # Errors
///
/// - `IndexError::IndexNotFound` if the file does not exist
/// - `IndexError::IndexCorrupted` for an unknown precision tag, truncation,
///   a `next_label` that differs from `slot_count` or identifiers that are not UTF-8
pub fn read_mapping(path: &Path) -> IndexResult<(Precision, IdentifierRegistry)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::IndexNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(error) => return Err(error.into()),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let tag = read_i32(&mut reader, path, "precision")?;
    let precision = Precision::from_wire(tag)
        .ok_or_else(|| IndexError::corrupted(path, format!("unknown precision tag {tag}")))?;
    let slot_count = read_len(&mut reader, path, "slot_count")?;
    let next_label = read_len(&mut reader, path, "next_label")?;

    let max_slots = file_len.saturating_sub(MAPPING_HEADER_BYTES) / MAPPING_SLOT_MIN_BYTES;
    if slot_count as u64 > max_slots {
        return Err(IndexError::corrupted(
            path,
            format!("slot_count {slot_count} exceeds what a {file_len}-byte file can hold"),
        ));
    }
    if next_label != slot_count {
        return Err(IndexError::corrupted(
            path,
            format!("next_label {next_label} disagrees with slot_count {slot_count}"),
        ));
    }

    let mut registry = IdentifierRegistry::with_tombstoned_slots(slot_count);
    for _ in 0..slot_count {
        let label: Label = read_u64(&mut reader, path, "label")?;
        let id_len = read_len(&mut reader, path, "id_len")?;
        if id_len as u64 > file_len {
            return Err(IndexError::corrupted(
                path,
                format!("identifier length {id_len} at label {label} exceeds file size"),
            ));
        }
        let mut id_bytes = vec![0_u8; id_len];
        read_exact_or_corrupted(&mut reader, &mut id_bytes, path, "identifier")?;
        let identifier = String::from_utf8(id_bytes).map_err(|error| {
            IndexError::corrupted(path, format!("invalid UTF-8 identifier at label {label}: {error}"))
        })?;
        if !registry.restore_slot(label, identifier) {
            warn!(
                target: targets::PERSIST,
                path = %path.display(),
                label,
                slot_count,
                "skipping slot record beyond declared slot count"
            );
        }
    }

    debug!(
        target: targets::PERSIST,
        path = %path.display(),
        precision = %precision,
        slot_count = registry.slot_count(),
        live_count = registry.live_count(),
        "mapping file loaded"
    );
    Ok((precision, registry))
}

// ─── Compressed vector file ─────────────────────────────────────────────────

/// Write one record per slot in `[0, slot_count)`.
///
/// `vector_at` returns the full-precision vector stored at a live label, or
/// `None` for a tombstone (written as zeros, scale 0).
///
/// # Errors
///
/// - `IndexError::InvalidArgument` for full precision, a slot count beyond
///   `u32`, or a vector whose length differs from `dimension`
/// - `IndexError::Io` on write failures
pub fn write_vectors<F>(
    path: &Path,
    precision: Precision,
    dimension: usize,
    slot_count: usize,
    mut vector_at: F,
) -> IndexResult<()>
where
    F: FnMut(Label) -> Option<Vec<f32>>,
{
    if !precision.is_compressed() {
        return Err(IndexError::invalid_argument(
            "precision",
            precision,
            "full precision has no compressed vector file",
        ));
    }
    let zero_record = vec![0_u8; precision.record_bytes(dimension)];
    let mut written = 0_usize;

    write_atomically(path, |writer| {
        write_u32(writer, slot_count, "vector_count")?;
        write_u32(writer, dimension, "dimension")?;
        for label in 0..slot_count as Label {
            let Some(vector) = vector_at(label) else {
                writer.write_all(&zero_record)?;
                continue;
            };
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    found: vector.len(),
                });
            }
            if precision == Precision::Half {
                for code in encode_half_vector(&vector) {
                    writer.write_all(&code.to_le_bytes())?;
                }
            } else {
                let (codes, scale) = quantize_int8(&vector);
                writer.write_all(&scale.to_le_bytes())?;
                let bytes: Vec<u8> = codes.iter().map(|&code| code.to_le_bytes()[0]).collect();
                writer.write_all(&bytes)?;
            }
            written += 1;
        }
        Ok(())
    })?;

    debug!(
        target: targets::PERSIST,
        path = %path.display(),
        precision = %precision,
        dimension,
        slot_count,
        live_count = written,
        "compressed vector file written"
    );
    Ok(())
}

/// Read-only, memory-mapped view of a compressed vector file.
///
/// Records are addressed by label with fixed-stride offsets.
pub struct CompressedVectors {
    mmap: Mmap,
    path: PathBuf,
    precision: Precision,
    dimension: usize,
    count: usize,
    stride: usize,
}

impl std::fmt::Debug for CompressedVectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedVectors")
            .field("path", &self.path)
            .field("precision", &self.precision)
            .field("dimension", &self.dimension)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl CompressedVectors {
    /// Map a compressed vector file and validate its header and length.
    ///
    /// # Errors
    ///
    /// - `IndexError::InvalidArgument` for full precision
    /// - `IndexError::DimensionMismatch` if the header dimension differs from
    ///   `expected_dimension`
    /// - `IndexError::IndexCorrupted` if the file is shorter than its header
    ///   declares
    #[allow(unsafe_code)] // Mmap::map requires unsafe for memory-mapped I/O.
    pub fn open(path: &Path, precision: Precision, expected_dimension: usize) -> IndexResult<Self> {
        if !precision.is_compressed() {
            return Err(IndexError::invalid_argument(
                "precision",
                precision,
                "full precision has no compressed vector file",
            ));
        }
        let file = File::open(path)?;
        let file_len = usize::try_from(file.metadata()?.len())
            .map_err(|_| IndexError::corrupted(path, "file size does not fit in usize"))?;
        if file_len < VECTOR_HEADER_BYTES {
            return Err(IndexError::corrupted(
                path,
                format!("file is {file_len} bytes, shorter than the {VECTOR_HEADER_BYTES}-byte header"),
            ));
        }

        // SAFETY: the mapping is read-only and the index directory has a
        // single writer, which is not writing while an index is being opened.
        let mmap = unsafe { Mmap::map(&file)? };

        let count = le_u32_at(&mmap, 0) as usize;
        let dimension = le_u32_at(&mmap, 4) as usize;
        if dimension != expected_dimension {
            return Err(IndexError::DimensionMismatch {
                expected: expected_dimension,
                found: dimension,
            });
        }

        let stride = precision.record_bytes(dimension);
        let expected_len = count
            .checked_mul(stride)
            .and_then(|bytes| bytes.checked_add(VECTOR_HEADER_BYTES))
            .ok_or_else(|| IndexError::corrupted(path, "record table size overflows"))?;
        if file_len < expected_len {
            return Err(IndexError::corrupted(
                path,
                format!("file truncated: {file_len} bytes, expected {expected_len} for {count} records"),
            ));
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            precision,
            dimension,
            count,
            stride,
        })
    }

    /// Number of records declared by the header.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the file holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Vector dimensionality from the header.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Decode the record stored at `label` to full precision.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::IndexCorrupted` if `label` has no record.
    pub fn decode(&self, label: Label) -> IndexResult<Vec<f32>> {
        let index = usize::try_from(label)
            .ok()
            .filter(|&index| index < self.count)
            .ok_or_else(|| {
                IndexError::corrupted(
                    &self.path,
                    format!("no record for label {label}; file holds {}", self.count),
                )
            })?;
        let start = VECTOR_HEADER_BYTES + index * self.stride;
        let record = &self.mmap[start..start + self.stride];

        if self.precision == Precision::Half {
            return Ok(record
                .chunks_exact(2)
                .map(|pair| decode_half(u16::from_le_bytes([pair[0], pair[1]])))
                .collect());
        }
        let scale = f32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let codes: Vec<i8> = record[4..]
            .iter()
            .map(|&byte| i8::from_le_bytes([byte]))
            .collect();
        Ok(dequantize_int8(&codes, scale))
    }
}

fn le_u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
