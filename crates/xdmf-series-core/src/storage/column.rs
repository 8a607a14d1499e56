//! ColumnStore backend: a single container file of named datasets.
//!
//! The container holds every payload of one output (geometry, connectivity
//! and one dataset per field) so an extraction ships as two files: the index
//! document and the container. Layout:
//!
//! ```text
//! [magic "XDMFCOL1"]
//! [dataset payloads, in put() order, each optionally zlib-compressed]
//! [footer: dataset table (name, dtype, shape, level, offset, size)]
//! [u64 footer length][magic "XDMFCOL1"]
//! ```
//!
//! Records are native-endian row-major, matching the RawFile backend, so the
//! two backends are byte-compatible at the record level. Datasets are 2-D
//! for temporal fields and mesh arrays, 1-D for non-temporal tags.
//!
//! Handles own only the path; the file is opened for the scope of one read
//! or one write transaction and released on every exit path.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use snafu::prelude::*;
use snafu::IntoError;

use crate::descriptor::{Dtype, FieldArray, StepSelect};
use crate::error::{
    InvalidArgumentSnafu, IoSnafu, NotFoundSnafu, OutOfRangeSnafu, XdmfResult,
};

const MAGIC: &[u8; 8] = b"XDMFCOL1";

fn dtype_code(dtype: Dtype) -> u8 {
    match dtype {
        Dtype::Float32 => 0,
        Dtype::Float64 => 1,
        Dtype::Int32 => 2,
        Dtype::Int64 => 3,
    }
}

fn dtype_from_code(code: u8) -> Option<Dtype> {
    match code {
        0 => Some(Dtype::Float32),
        1 => Some(Dtype::Float64),
        2 => Some(Dtype::Int32),
        3 => Some(Dtype::Int64),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    dtype: Dtype,
    one_dimensional: bool,
    rows: usize,
    cols: usize,
    level: u8,
    offset: u64,
    size: u64,
}

fn corrupt(path: &Path, what: &str) -> crate::XdmfError {
    IoSnafu {
        path: path.display().to_string(),
    }
    .into_error(io::Error::other(format!("corrupt container: {what}")))
}

/// Read-side capability over one container file.
#[derive(Debug, Clone)]
pub struct ColumnStore {
    path: PathBuf,
}

impl ColumnStore {
    /// Handle on a container file. No I/O happens until a read.
    pub fn open(path: impl Into<PathBuf>) -> ColumnStore {
        ColumnStore { path: path.into() }
    }

    /// Read a `[first, first+count)` column window of a named dataset, for
    /// one row or all rows. 1-D datasets are treated as a single row.
    pub fn read_slice(
        &self,
        dataset: &str,
        step: StepSelect,
        first: usize,
        count: usize,
    ) -> XdmfResult<FieldArray> {
        let mut file = File::open(&self.path).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        let entries = self.read_footer(&mut file)?;
        let entry = entries
            .iter()
            .find(|e| e.name == dataset)
            .context(NotFoundSnafu { name: dataset })?;

        ensure!(
            first + count <= entry.cols,
            OutOfRangeSnafu {
                first,
                count,
                elements_per_step: entry.cols,
            }
        );

        let full = self.read_dataset(&mut file, entry)?;
        let sliced = match (entry.one_dimensional, step) {
            (true, _) => full.slice_block(0..1, first..first + count),
            (false, StepSelect::All) => full.slice_block(0..entry.rows, first..first + count),
            (false, StepSelect::One(idx)) => {
                ensure!(
                    idx < entry.rows,
                    InvalidArgumentSnafu {
                        reason: format!(
                            "step index {idx} out of range ({} rows in '{dataset}')",
                            entry.rows
                        ),
                    }
                );
                full.slice_block(idx..idx + 1, first..first + count)
            }
        };
        Ok(sliced)
    }

    /// Names of all datasets in the container, in storage order.
    pub fn dataset_names(&self) -> XdmfResult<Vec<String>> {
        let mut file = File::open(&self.path).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        Ok(self
            .read_footer(&mut file)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    fn read_dataset(&self, file: &mut File, entry: &Entry) -> XdmfResult<FieldArray> {
        let mut payload = vec![0u8; entry.size as usize];
        file.seek(SeekFrom::Start(entry.offset)).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        file.read_exact(&mut payload)
            .map_err(|_| corrupt(&self.path, "truncated dataset payload"))?;

        let expected = entry.rows * entry.cols * entry.dtype.size();
        let bytes = if entry.level > 0 {
            let mut out = Vec::with_capacity(expected);
            ZlibDecoder::new(&payload[..])
                .read_to_end(&mut out)
                .map_err(|_| corrupt(&self.path, "undecodable dataset payload"))?;
            out
        } else {
            payload
        };
        if bytes.len() != expected {
            return Err(corrupt(&self.path, "dataset payload length mismatch"));
        }
        FieldArray::from_bytes(entry.dtype, entry.rows, entry.cols, &bytes)
    }

    fn read_footer(&self, file: &mut File) -> XdmfResult<Vec<Entry>> {
        let len = file
            .metadata()
            .context(IoSnafu {
                path: self.path.display().to_string(),
            })?
            .len();
        if len < (MAGIC.len() * 2 + 8) as u64 {
            return Err(corrupt(&self.path, "file too short"));
        }

        file.seek(SeekFrom::Start(len - 16)).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        let footer_len = file
            .read_u64::<LE>()
            .map_err(|_| corrupt(&self.path, "missing footer"))?;
        let mut tail_magic = [0u8; 8];
        file.read_exact(&mut tail_magic)
            .map_err(|_| corrupt(&self.path, "missing trailing magic"))?;
        if &tail_magic != MAGIC {
            return Err(corrupt(&self.path, "bad trailing magic"));
        }
        if footer_len + 16 + MAGIC.len() as u64 > len {
            return Err(corrupt(&self.path, "footer length out of bounds"));
        }

        file.seek(SeekFrom::Start(len - 16 - footer_len))
            .context(IoSnafu {
                path: self.path.display().to_string(),
            })?;
        let mut footer = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer)
            .map_err(|_| corrupt(&self.path, "truncated footer"))?;

        let mut cursor = io::Cursor::new(&footer[..]);
        let n = cursor
            .read_u32::<LE>()
            .map_err(|_| corrupt(&self.path, "truncated footer table"))?;
        let mut entries = Vec::with_capacity(n as usize);
        for _ in 0..n {
            entries.push(self.read_entry(&mut cursor)?);
        }
        Ok(entries)
    }

    fn read_entry(&self, cursor: &mut io::Cursor<&[u8]>) -> XdmfResult<Entry> {
        let bad = |what| corrupt(&self.path, what);
        let name_len = cursor.read_u16::<LE>().map_err(|_| bad("entry name length"))?;
        let mut name = vec![0u8; name_len as usize];
        cursor.read_exact(&mut name).map_err(|_| bad("entry name"))?;
        let name = String::from_utf8(name).map_err(|_| bad("entry name encoding"))?;
        let dtype = dtype_from_code(cursor.read_u8().map_err(|_| bad("entry dtype"))?)
            .ok_or_else(|| bad("unknown dtype code"))?;
        let ndim = cursor.read_u8().map_err(|_| bad("entry rank"))?;
        let rows = cursor.read_u64::<LE>().map_err(|_| bad("entry rows"))? as usize;
        let cols = cursor.read_u64::<LE>().map_err(|_| bad("entry cols"))? as usize;
        let level = cursor.read_u8().map_err(|_| bad("entry level"))?;
        let offset = cursor.read_u64::<LE>().map_err(|_| bad("entry offset"))?;
        let size = cursor.read_u64::<LE>().map_err(|_| bad("entry size"))?;
        Ok(Entry {
            name,
            dtype,
            one_dimensional: ndim == 1,
            rows,
            cols,
            level,
            offset,
            size,
        })
    }
}

/// Write-side transaction over one container file. Datasets are appended
/// with [`put`] and the table is committed by [`finish`]; dropping the
/// writer without finishing leaves an unreadable file, which the caller is
/// responsible for cleaning up.
///
/// [`put`]: ColumnStoreWriter::put
/// [`finish`]: ColumnStoreWriter::finish
#[derive(Debug)]
pub struct ColumnStoreWriter {
    file: File,
    path: PathBuf,
    level: u32,
    entries: Vec<Entry>,
    cursor: u64,
}

impl ColumnStoreWriter {
    /// Create (or truncate) a container. `level` is the zlib level in
    /// [0, 9]; 0 stores datasets uncompressed. The level is validated here,
    /// before any bytes are written.
    pub fn create(path: impl Into<PathBuf>, level: u32) -> XdmfResult<ColumnStoreWriter> {
        ensure!(
            level <= 9,
            InvalidArgumentSnafu {
                reason: format!("compression level {level} not in 0-9"),
            }
        );
        let path = path.into();
        let mut file = File::create(&path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        file.write_all(MAGIC).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Ok(ColumnStoreWriter {
            file,
            path,
            level,
            entries: Vec::new(),
            cursor: MAGIC.len() as u64,
        })
    }

    /// Append a named dataset. `one_dimensional` stores the single row of a
    /// non-temporal field as a 1-D dataset.
    pub fn put(
        &mut self,
        name: &str,
        array: &FieldArray,
        one_dimensional: bool,
    ) -> XdmfResult<()> {
        let raw = array.to_bytes();
        let payload = if self.level > 0 {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
            encoder.write_all(&raw).context(IoSnafu {
                path: self.path.display().to_string(),
            })?;
            encoder.finish().context(IoSnafu {
                path: self.path.display().to_string(),
            })?
        } else {
            raw
        };

        self.file.write_all(&payload).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        self.entries.push(Entry {
            name: name.to_string(),
            dtype: array.dtype(),
            one_dimensional,
            rows: array.rows(),
            cols: array.cols(),
            level: self.level as u8,
            offset: self.cursor,
            size: payload.len() as u64,
        });
        self.cursor += payload.len() as u64;
        Ok(())
    }

    /// Commit the dataset table and close the container.
    pub fn finish(mut self) -> XdmfResult<()> {
        let mut footer = Vec::new();
        footer
            .write_u32::<LE>(self.entries.len() as u32)
            .and_then(|_| {
                for entry in &self.entries {
                    footer.write_u16::<LE>(entry.name.len() as u16)?;
                    footer.write_all(entry.name.as_bytes())?;
                    footer.write_u8(dtype_code(entry.dtype))?;
                    footer.write_u8(if entry.one_dimensional { 1 } else { 2 })?;
                    footer.write_u64::<LE>(entry.rows as u64)?;
                    footer.write_u64::<LE>(entry.cols as u64)?;
                    footer.write_u8(entry.level)?;
                    footer.write_u64::<LE>(entry.offset)?;
                    footer.write_u64::<LE>(entry.size)?;
                }
                Ok(())
            })
            .context(IoSnafu {
                path: self.path.display().to_string(),
            })?;

        self.file.write_all(&footer).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        self.file
            .write_u64::<LE>(footer.len() as u64)
            .context(IoSnafu {
                path: self.path.display().to_string(),
            })?;
        self.file.write_all(MAGIC).context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        self.file.sync_all().context(IoSnafu {
            path: self.path.display().to_string(),
        })?;
        Ok(())
    }
}
