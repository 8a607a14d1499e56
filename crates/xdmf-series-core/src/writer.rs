//! Chunked Writer: emit an index document plus payloads for a new output.
//!
//! A write request carries full in-memory arrays, the step selection mapping
//! output rows to source rows, and the two policies (precision, backend).
//! Every validation happens before any file is created, so a rejected
//! request leaves no partial output behind. The document is written first,
//! then the payloads, mirroring how consumers discover an output: the
//! document is the unit of addressing.
//!
//! Mesh arrays (geometry, connectivity) are always written at full
//! precision; the reduction policy applies to field payloads only.

mod document;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use snafu::prelude::*;

use crate::descriptor::{FieldArray, MeshDescriptor};
use crate::error::{InvalidArgumentSnafu, IoSnafu, XdmfResult};
use crate::storage::{ColumnStoreWriter, RawFile};

use document::DocField;

/// Field names that are per-element metadata, never time-varying. They are
/// written once as a single row whatever the step selection says.
pub const NON_TEMPORAL_FIELDS: [&str; 5] = [
    "partition",
    "clustering",
    "global-ids",
    "fault-tag",
    "locationFlag",
];

/// Payload backend of a written output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// One flat binary file per payload, in a `<prefix>/` directory.
    Raw,
    /// All payloads in one `<prefix>.cols` container.
    Column,
}

/// Whether field payloads keep their dtype or narrow to 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionPolicy {
    /// Write fields with the dtype they arrived in.
    Preserve,
    /// Narrow 8-byte records to their 4-byte siblings.
    Reduce,
}

/// One complete output to be written under `prefix`.
pub struct WriteRequest<'a> {
    /// Output path prefix; the document lands at `<prefix>.xdmf`.
    pub prefix: PathBuf,
    /// Node coordinates, `(node_count, 3)`.
    pub geometry: &'a Array2<f64>,
    /// Cell connectivity, `(element_count, 3 | 4)`.
    pub connect: &'a Array2<i64>,
    /// Field payloads; reserved names (see [`NON_TEMPORAL_FIELDS`]) must be
    /// single-row.
    pub fields: BTreeMap<String, FieldArray>,
    /// Output steps as `(time value, source row index)`, in time order.
    /// Empty writes a mesh-only document.
    pub steps: &'a [(f64, usize)],
    /// Field payload precision policy.
    pub precision: PrecisionPolicy,
    /// Payload backend.
    pub backend: Backend,
    /// zlib level in 0-9 for the Column backend; ignored by Raw.
    pub compression: u32,
}

/// Write the output described by `request`; returns the document path.
pub fn write(request: &WriteRequest<'_>) -> XdmfResult<PathBuf> {
    validate(request)?;

    let prefix_name = request
        .prefix
        .file_name()
        .and_then(|n| n.to_str())
        .context(InvalidArgumentSnafu {
            reason: format!("prefix '{}' has no file name", request.prefix.display()),
        })?
        .to_string();

    let mesh = MeshDescriptor {
        node_count: request.geometry.nrows(),
        element_count: request.connect.nrows(),
        nodes_per_element: request.connect.ncols(),
    };

    // Select and narrow once; document and payloads describe the same bytes.
    let mut payloads: Vec<(String, FieldArray, bool)> = Vec::new();
    for (name, array) in &request.fields {
        let temporal = is_temporal(name, request.steps);
        let selected = if temporal {
            let sources: Vec<usize> = request.steps.iter().map(|&(_, src)| src).collect();
            array.select_rows(&sources)?
        } else {
            array.clone()
        };
        let written = match request.precision {
            PrecisionPolicy::Preserve => selected,
            PrecisionPolicy::Reduce => selected.narrowed(),
        };
        payloads.push((name.clone(), written, temporal));
    }

    let doc_fields: Vec<DocField<'_>> = payloads
        .iter()
        .map(|(name, array, temporal)| DocField {
            name: name.as_str(),
            dtype: array.dtype(),
            temporal: *temporal,
        })
        .collect();

    let doc = if request.steps.is_empty() {
        document::mesh_document(&prefix_name, &mesh, &doc_fields, request.backend)
    } else {
        document::timeseries_document(
            &prefix_name,
            &mesh,
            &doc_fields,
            request.steps,
            request.backend,
        )
    };

    let doc_path = sibling(&request.prefix, ".xdmf");
    let mut file = File::create(&doc_path).context(IoSnafu {
        path: doc_path.display().to_string(),
    })?;
    file.write_all(doc.as_bytes()).context(IoSnafu {
        path: doc_path.display().to_string(),
    })?;

    let geometry = FieldArray::F64(request.geometry.clone());
    let connect = FieldArray::I64(request.connect.clone());

    match request.backend {
        Backend::Raw => {
            std::fs::create_dir_all(&request.prefix).context(IoSnafu {
                path: request.prefix.display().to_string(),
            })?;
            RawFile::write_array(&request.prefix.join("geometry.bin"), &geometry)?;
            RawFile::write_array(&request.prefix.join("connect.bin"), &connect)?;
            for (name, array, _) in &payloads {
                RawFile::write_array(&request.prefix.join(format!("{name}.bin")), array)?;
            }
        }
        Backend::Column => {
            let container = sibling(&request.prefix, ".cols");
            let mut writer = ColumnStoreWriter::create(&container, request.compression)?;
            writer.put("geometry", &geometry, false)?;
            writer.put("connect", &connect, false)?;
            for (name, array, temporal) in &payloads {
                writer.put(name, array, !temporal)?;
            }
            writer.finish()?;
        }
    }

    Ok(doc_path)
}

fn is_temporal(name: &str, steps: &[(f64, usize)]) -> bool {
    !steps.is_empty() && !NON_TEMPORAL_FIELDS.contains(&name)
}

/// `<prefix><ext>` next to the prefix, without touching its extension.
fn sibling(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(ext);
    PathBuf::from(name)
}

/// Reject inconsistent requests before any file is created.
fn validate(request: &WriteRequest<'_>) -> XdmfResult<()> {
    ensure!(
        request.compression <= 9,
        InvalidArgumentSnafu {
            reason: format!("compression level {} not in 0-9", request.compression),
        }
    );
    ensure!(
        request.geometry.ncols() == 3,
        InvalidArgumentSnafu {
            reason: format!("geometry must have 3 columns, got {}", request.geometry.ncols()),
        }
    );
    ensure!(
        matches!(request.connect.ncols(), 3 | 4),
        InvalidArgumentSnafu {
            reason: format!(
                "connectivity must have 3 or 4 columns, got {}",
                request.connect.ncols()
            ),
        }
    );
    ensure!(
        request
            .steps
            .windows(2)
            .all(|w| w[0].0 < w[1].0),
        InvalidArgumentSnafu {
            reason: "output time values are not strictly increasing".to_string(),
        }
    );

    for (name, array) in &request.fields {
        ensure!(
            array.cols() == request.connect.nrows(),
            InvalidArgumentSnafu {
                reason: format!(
                    "field '{name}' has {} elements, mesh has {} cells",
                    array.cols(),
                    request.connect.nrows()
                ),
            }
        );
        if is_temporal(name, request.steps) {
            // select_rows would also catch this, but only after the document
            // exists; the request must fail whole.
            if let Some(&(_, bad)) = request.steps.iter().find(|&&(_, src)| src >= array.rows()) {
                return InvalidArgumentSnafu {
                    reason: format!(
                        "step index {bad} out of range for field '{name}' ({} rows)",
                        array.rows()
                    ),
                }
                .fail();
            }
        } else {
            ensure!(
                array.rows() == 1,
                InvalidArgumentSnafu {
                    reason: format!(
                        "field '{name}' is not time-varying but has {} rows",
                        array.rows()
                    ),
                }
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Dtype;
    use crate::error::XdmfError;
    use tempfile::TempDir;

    fn geometry() -> Array2<f64> {
        Array2::from_shape_vec(
            (4, 3),
            vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                1.0, 1.0, 0.0,
            ],
        )
        .unwrap()
    }

    fn connect() -> Array2<i64> {
        Array2::from_shape_vec((2, 3), vec![0, 1, 2, 1, 3, 2]).unwrap()
    }

    fn request<'a>(
        prefix: PathBuf,
        geometry: &'a Array2<f64>,
        connect: &'a Array2<i64>,
        steps: &'a [(f64, usize)],
    ) -> WriteRequest<'a> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "SRs".to_string(),
            FieldArray::F64(
                Array2::from_shape_vec((3, 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            ),
        );
        WriteRequest {
            prefix,
            geometry,
            connect,
            fields,
            steps,
            precision: PrecisionPolicy::Preserve,
            backend: Backend::Raw,
            compression: 0,
        }
    }

    #[test]
    fn out_of_range_step_fails_before_any_file_exists() {
        let tmp = TempDir::new().unwrap();
        let (geometry, connect) = (geometry(), connect());
        let steps = [(0.0, 0), (1.0, 7)];
        let req = request(tmp.path().join("out"), &geometry, &connect, &steps);
        let err = write(&req).unwrap_err();
        assert!(matches!(err, XdmfError::InvalidArgument { .. }));
        assert!(!tmp.path().join("out.xdmf").exists());
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn reserved_fields_must_be_single_row() {
        let tmp = TempDir::new().unwrap();
        let (geometry, connect) = (geometry(), connect());
        let steps = [(0.0, 0)];
        let mut req = request(tmp.path().join("out"), &geometry, &connect, &steps);
        req.fields.insert(
            "fault-tag".to_string(),
            FieldArray::I64(Array2::from_shape_vec((2, 2), vec![1, 2, 3, 4]).unwrap()),
        );
        let err = write(&req).unwrap_err();
        assert!(matches!(err, XdmfError::InvalidArgument { .. }));
    }

    #[test]
    fn decreasing_times_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (geometry, connect) = (geometry(), connect());
        let steps = [(1.0, 0), (0.5, 1)];
        let req = request(tmp.path().join("out"), &geometry, &connect, &steps);
        assert!(matches!(
            write(&req),
            Err(XdmfError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn reduce_policy_narrows_field_payloads_only() {
        let tmp = TempDir::new().unwrap();
        let (geometry, connect) = (geometry(), connect());
        let steps = [(0.0, 0), (1.0, 2)];
        let mut req = request(tmp.path().join("out"), &geometry, &connect, &steps);
        req.precision = PrecisionPolicy::Reduce;
        let doc = write(&req).unwrap();

        let index = crate::index::XdmfIndex::open(doc).unwrap();
        assert_eq!(index.field("SRs").unwrap().dtype, Dtype::Float32);
        assert_eq!(index.geometry_descriptor().dtype, Dtype::Float64);
        assert_eq!(index.connect_descriptor().dtype, Dtype::Int64);

        // Rows 0 and 2 of the source, narrowed.
        let reader = crate::reader::XdmfReader::from_index(index);
        let srs = reader
            .read_field("SRs", crate::descriptor::StepSelect::All)
            .unwrap();
        assert_eq!(srs.dtype(), Dtype::Float32);
        assert_eq!(
            srs.to_f64().into_raw_vec_and_offset().0,
            vec![1.0, 2.0, 5.0, 6.0]
        );
    }

    #[test]
    fn mesh_only_request_writes_single_row_fields() {
        let tmp = TempDir::new().unwrap();
        let (geometry, connect) = (geometry(), connect());
        let mut req = request(tmp.path().join("mesh"), &geometry, &connect, &[]);
        req.fields.insert(
            "SRs".to_string(),
            FieldArray::F64(Array2::from_shape_vec((1, 2), vec![0.5, 0.75]).unwrap()),
        );
        let doc = write(&req).unwrap();

        let reader = crate::reader::XdmfReader::open(doc).unwrap();
        assert!(reader.time_axis().is_empty());
        assert_eq!(reader.index().step_count(), 1);
        let srs = reader
            .read_field("SRs", crate::descriptor::StepSelect::All)
            .unwrap();
        assert_eq!(
            srs.to_f64().into_raw_vec_and_offset().0,
            vec![0.5, 0.75]
        );
    }
}
