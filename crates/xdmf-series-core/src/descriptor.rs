//! Typed storage descriptors and array payloads.
//!
//! Everything the resolver extracts from an index document is represented
//! here as owned, strongly-typed values: where a field's bytes live
//! ([`DataLocation`]), how wide each record is ([`Dtype`]), the mesh counts
//! that are authoritative over the on-disk row counts ([`MeshDescriptor`]),
//! and the time axis of temporal collections ([`TimeAxis`]).
//!
//! [`Dtype`] carries the one mapping shared by reader and writer: precision
//! bytes plus an integer flag select the numeric type, and the same table is
//! applied in reverse when a written descriptor is parsed back, which is what
//! guarantees round-trip fidelity.

use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian};
use ndarray::Array2;

use crate::error::{InvalidArgumentSnafu, MalformedIndexSnafu, XdmfResult};
use snafu::prelude::*;

/// Numeric type of one stored record.
///
/// The four members are exactly the combinations of `precision_bytes` in
/// {4, 8} and the integer flag that legacy producers emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    /// 4-byte IEEE float.
    Float32,
    /// 8-byte IEEE float.
    Float64,
    /// 4-byte signed integer.
    Int32,
    /// 8-byte signed integer.
    Int64,
}

impl Dtype {
    /// Record width in bytes.
    pub fn size(self) -> usize {
        match self {
            Dtype::Float32 | Dtype::Int32 => 4,
            Dtype::Float64 | Dtype::Int64 => 8,
        }
    }

    /// The `Precision` value written into index documents (same as [`size`]).
    ///
    /// [`size`]: Dtype::size
    pub fn precision(self) -> usize {
        self.size()
    }

    /// Whether this is an integer type.
    pub fn is_integer(self) -> bool {
        matches!(self, Dtype::Int32 | Dtype::Int64)
    }

    /// Whether this is a float type (and therefore has a NaN fill value).
    pub fn is_float(self) -> bool {
        !self.is_integer()
    }

    /// Map `(precision_bytes, integer)` to a dtype.
    ///
    /// This is the reader-side half of the shared mapping; anything other
    /// than 4 or 8 bytes is a malformed descriptor.
    pub fn from_parts(precision: usize, integer: bool) -> XdmfResult<Dtype> {
        match (precision, integer) {
            (4, false) => Ok(Dtype::Float32),
            (4, true) => Ok(Dtype::Int32),
            (8, false) => Ok(Dtype::Float64),
            (8, true) => Ok(Dtype::Int64),
            _ => MalformedIndexSnafu {
                reason: format!("unsupported precision {precision}"),
            }
            .fail(),
        }
    }

    /// The reduced-precision counterpart: 8-byte types narrow to their
    /// 4-byte sibling, 4-byte types pass through unchanged.
    pub fn narrowed(self) -> Dtype {
        match self {
            Dtype::Float64 => Dtype::Float32,
            Dtype::Int64 => Dtype::Int32,
            other => other,
        }
    }

    /// The `NumberType` tag used in index documents.
    pub fn number_type(self) -> &'static str {
        if self.is_integer() {
            "UInt"
        } else {
            "Float"
        }
    }
}

/// Where a field's payload lives.
///
/// The location string in the index document decides the backend: an
/// embedded colon separates a container path from a dataset key (ColumnStore
/// backend); a plain path is a flat file (RawFile backend). Relative paths
/// are resolved against the index document's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// Flat, headerless binary file.
    Raw(PathBuf),
    /// Named dataset inside a columnar container.
    Column {
        /// Path of the container file.
        container: PathBuf,
        /// Dataset key within the container (no leading slash).
        dataset: String,
    },
}

impl DataLocation {
    /// Parse a location string relative to the index document's directory.
    pub fn parse(text: &str, base_dir: &Path) -> XdmfResult<DataLocation> {
        let text = text.trim();
        let mut parts = text.splitn(3, ':');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(DataLocation::Raw(base_dir.join(first))),
            (Some(dataset), None) => Ok(DataLocation::Column {
                container: base_dir.join(first),
                dataset: dataset.trim_start_matches('/').to_string(),
            }),
            (Some(_), Some(_)) => MalformedIndexSnafu {
                reason: format!("data location '{text}' has more than one ':'"),
            }
            .fail(),
        }
    }
}

/// Per-field storage descriptor resolved from the index document.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Attribute name in the index document.
    pub name: String,
    /// Backend and address of the payload.
    pub location: DataLocation,
    /// Numeric type of one record.
    pub dtype: Dtype,
    /// Elements per time step (last declared dimension).
    pub elements_per_step: usize,
    /// Steps stored on disk for temporal fields, `None` for fields with a
    /// single-integer dimension list (not time-varying).
    pub stored_steps: Option<usize>,
}

/// Mesh topology counts resolved from the index document.
///
/// `element_count` is authoritative and may be smaller than the on-disk row
/// count of the connectivity payload (alignment padding in the producing
/// simulator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshDescriptor {
    /// Number of mesh nodes.
    pub node_count: usize,
    /// Authoritative number of cells.
    pub element_count: usize,
    /// 3 selects triangle topology, 4 tetrahedra.
    pub nodes_per_element: usize,
}

/// Ordered time values of a temporal collection; the position of a value is
/// the storage row offset of that step.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis(Vec<f64>);

impl TimeAxis {
    /// Build a time axis, enforcing strictly increasing values.
    pub fn new(values: Vec<f64>) -> XdmfResult<TimeAxis> {
        ensure!(
            values.windows(2).all(|w| w[0] < w[1]),
            MalformedIndexSnafu {
                reason: "time values are not strictly increasing".to_string(),
            }
        );
        Ok(TimeAxis(values))
    }

    /// Number of steps with a time value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no temporal grid carried a `Time` node.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Time values in step order.
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Sampling interval between the first two steps.
    pub fn timestep(&self) -> XdmfResult<f64> {
        ensure!(
            self.0.len() >= 2,
            MalformedIndexSnafu {
                reason: "time step needs at least two temporal grids".to_string(),
            }
        );
        Ok(self.0[1] - self.0[0])
    }
}

/// Step axis selector for a read: every stored step, or exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSelect {
    /// Read all stored steps.
    All,
    /// Read the single step at this index.
    One(usize),
}

/// A dtype-tagged 2-D payload of shape (steps x elements).
///
/// Non-temporal fields are carried as a single row. The variant set matches
/// [`Dtype`] so reads and writes preserve the stored numeric type exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldArray {
    /// 4-byte float payload.
    F32(Array2<f32>),
    /// 8-byte float payload.
    F64(Array2<f64>),
    /// 4-byte integer payload.
    I32(Array2<i32>),
    /// 8-byte integer payload.
    I64(Array2<i64>),
}

fn shape<T>(rows: usize, cols: usize, data: Vec<T>) -> XdmfResult<Array2<T>> {
    Array2::from_shape_vec((rows, cols), data).map_err(|e| {
        InvalidArgumentSnafu {
            reason: format!("array shape ({rows}, {cols}) mismatch: {e}"),
        }
        .build()
    })
}

impl FieldArray {
    /// Numeric type of the payload.
    pub fn dtype(&self) -> Dtype {
        match self {
            FieldArray::F32(_) => Dtype::Float32,
            FieldArray::F64(_) => Dtype::Float64,
            FieldArray::I32(_) => Dtype::Int32,
            FieldArray::I64(_) => Dtype::Int64,
        }
    }

    /// Number of rows (steps, or 1 for non-temporal fields).
    pub fn rows(&self) -> usize {
        match self {
            FieldArray::F32(a) => a.nrows(),
            FieldArray::F64(a) => a.nrows(),
            FieldArray::I32(a) => a.nrows(),
            FieldArray::I64(a) => a.nrows(),
        }
    }

    /// Number of columns (elements per step).
    pub fn cols(&self) -> usize {
        match self {
            FieldArray::F32(a) => a.ncols(),
            FieldArray::F64(a) => a.ncols(),
            FieldArray::I32(a) => a.ncols(),
            FieldArray::I64(a) => a.ncols(),
        }
    }

    /// Decode native-endian row-major bytes into an array of the given
    /// shape. The byte length must match exactly.
    pub fn from_bytes(dtype: Dtype, rows: usize, cols: usize, bytes: &[u8]) -> XdmfResult<FieldArray> {
        let n = rows * cols;
        ensure!(
            bytes.len() == n * dtype.size(),
            InvalidArgumentSnafu {
                reason: format!(
                    "byte length {} does not match shape ({rows}, {cols}) of {dtype:?}",
                    bytes.len()
                ),
            }
        );
        Ok(match dtype {
            Dtype::Float32 => {
                let mut v = vec![0f32; n];
                NativeEndian::read_f32_into(bytes, &mut v);
                FieldArray::F32(shape(rows, cols, v)?)
            }
            Dtype::Float64 => {
                let mut v = vec![0f64; n];
                NativeEndian::read_f64_into(bytes, &mut v);
                FieldArray::F64(shape(rows, cols, v)?)
            }
            Dtype::Int32 => {
                let mut v = vec![0i32; n];
                NativeEndian::read_i32_into(bytes, &mut v);
                FieldArray::I32(shape(rows, cols, v)?)
            }
            Dtype::Int64 => {
                let mut v = vec![0i64; n];
                NativeEndian::read_i64_into(bytes, &mut v);
                FieldArray::I64(shape(rows, cols, v)?)
            }
        })
    }

    /// Encode the payload as native-endian row-major bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.rows() * self.cols();
        let mut buf = vec![0u8; n * self.dtype().size()];
        match self {
            FieldArray::F32(a) => {
                let flat: Vec<f32> = a.iter().copied().collect();
                NativeEndian::write_f32_into(&flat, &mut buf);
            }
            FieldArray::F64(a) => {
                let flat: Vec<f64> = a.iter().copied().collect();
                NativeEndian::write_f64_into(&flat, &mut buf);
            }
            FieldArray::I32(a) => {
                let flat: Vec<i32> = a.iter().copied().collect();
                NativeEndian::write_i32_into(&flat, &mut buf);
            }
            FieldArray::I64(a) => {
                let flat: Vec<i64> = a.iter().copied().collect();
                NativeEndian::write_i64_into(&flat, &mut buf);
            }
        }
        buf
    }

    /// Narrow 8-byte values to their 4-byte siblings; 4-byte payloads are
    /// returned unchanged. The exact inverse of this table is applied when a
    /// reduced descriptor is parsed back.
    pub fn narrowed(&self) -> FieldArray {
        match self {
            FieldArray::F64(a) => FieldArray::F32(a.mapv(|v| v as f32)),
            FieldArray::I64(a) => FieldArray::I32(a.mapv(|v| v as i32)),
            other => other.clone(),
        }
    }

    /// Keep only the first `rows` rows (padding correction happens after the
    /// raw read, never by shrinking the read window).
    pub fn truncated_rows(&self, rows: usize) -> FieldArray {
        let rows = rows.min(self.rows());
        match self {
            FieldArray::F32(a) => FieldArray::F32(a.slice(ndarray::s![..rows, ..]).to_owned()),
            FieldArray::F64(a) => FieldArray::F64(a.slice(ndarray::s![..rows, ..]).to_owned()),
            FieldArray::I32(a) => FieldArray::I32(a.slice(ndarray::s![..rows, ..]).to_owned()),
            FieldArray::I64(a) => FieldArray::I64(a.slice(ndarray::s![..rows, ..]).to_owned()),
        }
    }

    /// Copy out a rectangular block of rows x columns.
    pub fn slice_block(
        &self,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
    ) -> FieldArray {
        match self {
            FieldArray::F32(a) => {
                FieldArray::F32(a.slice(ndarray::s![rows, cols]).to_owned())
            }
            FieldArray::F64(a) => {
                FieldArray::F64(a.slice(ndarray::s![rows, cols]).to_owned())
            }
            FieldArray::I32(a) => {
                FieldArray::I32(a.slice(ndarray::s![rows, cols]).to_owned())
            }
            FieldArray::I64(a) => {
                FieldArray::I64(a.slice(ndarray::s![rows, cols]).to_owned())
            }
        }
    }

    /// Gather the given columns, preserving their order.
    pub fn select_columns(&self, ids: &[usize]) -> FieldArray {
        fn gather<T: Copy>(a: &Array2<T>, ids: &[usize]) -> Array2<T> {
            Array2::from_shape_fn((a.nrows(), ids.len()), |(i, j)| a[(i, ids[j])])
        }
        match self {
            FieldArray::F32(a) => FieldArray::F32(gather(a, ids)),
            FieldArray::F64(a) => FieldArray::F64(gather(a, ids)),
            FieldArray::I32(a) => FieldArray::I32(gather(a, ids)),
            FieldArray::I64(a) => FieldArray::I64(gather(a, ids)),
        }
    }

    /// Gather the given rows, preserving their order. Every index must be in
    /// bounds; the writer validates this before calling.
    pub fn select_rows(&self, ids: &[usize]) -> XdmfResult<FieldArray> {
        if let Some(&bad) = ids.iter().find(|&&i| i >= self.rows()) {
            return InvalidArgumentSnafu {
                reason: format!("row index {bad} out of range ({} rows)", self.rows()),
            }
            .fail();
        }
        fn gather<T: Copy>(a: &Array2<T>, ids: &[usize]) -> Array2<T> {
            Array2::from_shape_fn((ids.len(), a.ncols()), |(i, j)| a[(ids[i], j)])
        }
        Ok(match self {
            FieldArray::F32(a) => FieldArray::F32(gather(a, ids)),
            FieldArray::F64(a) => FieldArray::F64(gather(a, ids)),
            FieldArray::I32(a) => FieldArray::I32(gather(a, ids)),
            FieldArray::I64(a) => FieldArray::I64(gather(a, ids)),
        })
    }

    /// Convert to a 64-bit float view (copies), used by filters and derived
    /// quantities.
    pub fn to_f64(&self) -> Array2<f64> {
        match self {
            FieldArray::F32(a) => a.mapv(f64::from),
            FieldArray::F64(a) => a.clone(),
            FieldArray::I32(a) => a.mapv(f64::from),
            FieldArray::I64(a) => a.mapv(|v| v as f64),
        }
    }

    /// Convert to 64-bit integers (copies), used for tag and partition
    /// fields whatever their declared precision.
    pub fn to_i64(&self) -> Array2<i64> {
        match self {
            FieldArray::F32(a) => a.mapv(|v| v as i64),
            FieldArray::F64(a) => a.mapv(|v| v as i64),
            FieldArray::I32(a) => a.mapv(i64::from),
            FieldArray::I64(a) => a.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XdmfError;

    #[test]
    fn dtype_table_is_inverse_of_itself() {
        for dtype in [Dtype::Float32, Dtype::Float64, Dtype::Int32, Dtype::Int64] {
            let back = Dtype::from_parts(dtype.precision(), dtype.is_integer()).unwrap();
            assert_eq!(back, dtype);
        }
    }

    #[test]
    fn narrowing_is_idempotent() {
        assert_eq!(Dtype::Float64.narrowed(), Dtype::Float32);
        assert_eq!(Dtype::Int64.narrowed(), Dtype::Int32);
        assert_eq!(Dtype::Float32.narrowed(), Dtype::Float32);
        assert_eq!(Dtype::Int32.narrowed().narrowed(), Dtype::Int32);
    }

    #[test]
    fn bad_precision_is_malformed() {
        let err = Dtype::from_parts(2, false).unwrap_err();
        assert!(matches!(err, XdmfError::MalformedIndex { .. }));
    }

    #[test]
    fn location_colon_selects_column_store() {
        let base = Path::new("/data");
        let loc = DataLocation::parse("out.cols:/SRs", base).unwrap();
        assert_eq!(
            loc,
            DataLocation::Column {
                container: PathBuf::from("/data/out.cols"),
                dataset: "SRs".to_string(),
            }
        );

        let loc = DataLocation::parse("out/SRs.bin", base).unwrap();
        assert_eq!(loc, DataLocation::Raw(PathBuf::from("/data/out/SRs.bin")));
    }

    #[test]
    fn bytes_roundtrip_all_dtypes() {
        let arrays = [
            FieldArray::F32(Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()),
            FieldArray::F64(Array2::from_shape_vec((1, 2), vec![0.5, -0.25]).unwrap()),
            FieldArray::I32(Array2::from_shape_vec((2, 2), vec![1, -2, 3, -4]).unwrap()),
            FieldArray::I64(Array2::from_shape_vec((1, 3), vec![7, 8, 9]).unwrap()),
        ];
        for a in arrays {
            let bytes = a.to_bytes();
            let back = FieldArray::from_bytes(a.dtype(), a.rows(), a.cols(), &bytes).unwrap();
            assert_eq!(back, a);
        }
    }

    #[test]
    fn time_axis_must_increase() {
        assert!(TimeAxis::new(vec![0.0, 1.0, 2.0]).is_ok());
        assert!(TimeAxis::new(vec![0.0, 0.0]).is_err());
        let axis = TimeAxis::new(vec![0.0, 0.5, 1.0]).unwrap();
        assert_eq!(axis.timestep().unwrap(), 0.5);
        assert!(TimeAxis::new(vec![1.0]).unwrap().timestep().is_err());
    }
}
