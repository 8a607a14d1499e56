//! RawFile backend: flat, headerless binary record files.
//!
//! The file begins directly at the data section. The byte offset of step `t`,
//! element `e` is `(t * elements_per_step + e) * precision_bytes`. Two read
//! strategies are kept deliberately:
//!
//! - whole-width reads slurp the file once and reshape by the row width
//!   (the row count is inferred from the file length, which is how
//!   alignment-padded mesh payloads surface extra rows);
//! - column sub-ranges across all steps loop per step, re-seeking to the
//!   row offset each time. That costs one seek per step but never reads
//!   the irrelevant columns, which is the right trade for extracting a
//!   small region out of a long simulation.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian};
use snafu::prelude::*;

use crate::descriptor::{Dtype, FieldArray, StepSelect};
use crate::error::{CorruptChunkSnafu, InvalidArgumentSnafu, IoSnafu, XdmfResult};

/// Handle on one flat record file. Owns the path only; the file is opened
/// per call.
#[derive(Debug, Clone)]
pub struct RawFile {
    path: PathBuf,
    dtype: Dtype,
    row_width: usize,
}

impl RawFile {
    /// Describe a record file of `row_width` records of `dtype` per step.
    pub fn new(path: impl Into<PathBuf>, dtype: Dtype, row_width: usize) -> RawFile {
        RawFile {
            path: path.into(),
            dtype,
            row_width,
        }
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// Read the whole file and reshape by the row width. Rows are inferred
    /// from the file length; a partial trailing row is ignored.
    pub fn read_full(&self) -> XdmfResult<FieldArray> {
        ensure!(
            self.row_width > 0,
            InvalidArgumentSnafu {
                reason: "row width must be non-zero".to_string(),
            }
        );
        let bytes = std::fs::read(&self.path).context(IoSnafu {
            path: self.path_str(),
        })?;
        let row_bytes = self.row_width * self.dtype.size();
        let rows = bytes.len() / row_bytes;
        FieldArray::from_bytes(self.dtype, rows, self.row_width, &bytes[..rows * row_bytes])
    }

    /// Read a `[first, first+count)` element window, for one step or for all
    /// of `steps` steps.
    ///
    /// All-step reads loop with one seek per step. A short row is replaced
    /// by NaN (and logged) for float payloads; integer payloads have no NaN,
    /// so a short row is a fatal [`CorruptChunk`].
    ///
    /// [`CorruptChunk`]: crate::XdmfError::CorruptChunk
    pub fn read_rows(
        &self,
        steps: usize,
        step: StepSelect,
        first: usize,
        count: usize,
    ) -> XdmfResult<FieldArray> {
        let size = self.dtype.size();
        let mut file = File::open(&self.path).context(IoSnafu {
            path: self.path_str(),
        })?;

        match step {
            StepSelect::One(idx) => {
                ensure!(
                    idx < steps,
                    InvalidArgumentSnafu {
                        reason: format!("step index {idx} out of range ({steps} steps)"),
                    }
                );
                let mut buf = vec![0u8; count * size];
                self.read_row_at(&mut file, idx, first, &mut buf)?
                    .then_some(())
                    .context(CorruptChunkSnafu {
                        path: self.path_str(),
                        step: idx,
                    })?;
                FieldArray::from_bytes(self.dtype, 1, count, &buf)
            }
            StepSelect::All => {
                let mut bytes = vec![0u8; steps * count * size];
                for t in 0..steps {
                    let row = &mut bytes[t * count * size..(t + 1) * count * size];
                    let complete = self.read_row_at(&mut file, t, first, row)?;
                    if !complete {
                        ensure!(
                            self.dtype.is_float(),
                            CorruptChunkSnafu {
                                path: self.path_str(),
                                step: t,
                            }
                        );
                        fill_nan(self.dtype, row);
                        log::warn!(
                            "short read at step {t} of {}; substituting NaN row",
                            self.path.display()
                        );
                    }
                }
                FieldArray::from_bytes(self.dtype, steps, count, &bytes)
            }
        }
    }

    /// Seek to one step's element window and fill `buf`. Returns false when
    /// the range cannot be fully satisfied (short read).
    fn read_row_at(
        &self,
        file: &mut File,
        step: usize,
        first: usize,
        buf: &mut [u8],
    ) -> XdmfResult<bool> {
        let offset = (step * self.row_width + first) * self.dtype.size();
        file.seek(SeekFrom::Start(offset as u64)).context(IoSnafu {
            path: self.path_str(),
        })?;
        match file.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e).context(IoSnafu {
                path: self.path_str(),
            }),
        }
    }

    /// Write an array as one flat record file, replacing any existing file.
    pub fn write_array(path: &Path, array: &FieldArray) -> XdmfResult<()> {
        let mut file = File::create(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        file.write_all(&array.to_bytes()).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Ok(())
    }
}

fn fill_nan(dtype: Dtype, buf: &mut [u8]) {
    match dtype {
        Dtype::Float32 => {
            let mut pattern = [0u8; 4];
            NativeEndian::write_f32(&mut pattern, f32::NAN);
            for chunk in buf.chunks_exact_mut(4) {
                chunk.copy_from_slice(&pattern);
            }
        }
        Dtype::Float64 => {
            let mut pattern = [0u8; 8];
            NativeEndian::write_f64(&mut pattern, f64::NAN);
            for chunk in buf.chunks_exact_mut(8) {
                chunk.copy_from_slice(&pattern);
            }
        }
        Dtype::Int32 | Dtype::Int64 => unreachable!("NaN fill is float-only"),
    }
}
