//! Little-endian field readers/writers shared by the on-disk formats.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tessera_core::{IndexError, IndexResult};

pub(crate) fn read_exact_or_corrupted<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    path: &Path,
    field: &str,
) -> IndexResult<()> {
    reader.read_exact(buffer).map_err(|error| {
        if error.kind() == ErrorKind::UnexpectedEof {
            IndexError::corrupted(path, format!("unexpected EOF while reading {field}"))
        } else {
            IndexError::Io(error)
        }
    })
}

macro_rules! le_reader {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name<R: Read>(reader: &mut R, path: &Path, field: &str) -> IndexResult<$ty> {
            let mut bytes = [0_u8; size_of::<$ty>()];
            read_exact_or_corrupted(reader, &mut bytes, path, field)?;
            Ok(<$ty>::from_le_bytes(bytes))
        }
    };
}

le_reader!(read_u8, u8);
le_reader!(read_u16, u16);
le_reader!(read_i32, i32);
le_reader!(read_u32, u32);
le_reader!(read_u64, u64);
le_reader!(read_f32, f32);

/// Read a `u64` length/count field and convert it to `usize`.
pub(crate) fn read_len<R: Read>(reader: &mut R, path: &Path, field: &str) -> IndexResult<usize> {
    let value = read_u64(reader, path, field)?;
    usize::try_from(value)
        .map_err(|_| IndexError::corrupted(path, format!("{field} {value} does not fit in usize")))
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: usize, field: &str) -> IndexResult<()> {
    let value_u32 = u32::try_from(value).map_err(|_| {
        IndexError::invalid_argument(field, value, "value does not fit in u32")
    })?;
    writer.write_all(&value_u32.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: usize) -> IndexResult<()> {
    writer.write_all(&(value as u64).to_le_bytes())?;
    Ok(())
}

/// Write a file through a sibling `.tmp` file, fsync it, then rename it over
/// `path`. Readers never observe a half-written file under `path`.
pub(crate) fn write_atomically<F>(path: &Path, body: F) -> IndexResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> IndexResult<()>,
{
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    if let Err(error) = body(&mut writer) {
        drop(writer);
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|error| IndexError::Io(error.into_error()))?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, path)?;
    Ok(())
}
