//! End-to-end coverage over the write-then-read cycle: both backends, the
//! precision policy, padding correction and the selection pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use ndarray::Array2;
use tempfile::TempDir;

use xdmf_series_core::derived::{FieldSource, VectorMagnitude};
use xdmf_series_core::select;
use xdmf_series_core::writer::{self, Backend, PrecisionPolicy, WriteRequest};
use xdmf_series_core::{Dtype, FieldArray, StepSelect, XdmfError, XdmfReader};

fn geometry() -> Array2<f64> {
    Array2::from_shape_vec(
        (5, 3),
        vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            1.0, 1.0, 0.0, //
            2.0, 0.5, 0.0,
        ],
    )
    .unwrap()
}

fn connect() -> Array2<i64> {
    Array2::from_shape_vec((3, 3), vec![0, 1, 2, 1, 3, 2, 1, 4, 3]).unwrap()
}

fn fields() -> BTreeMap<String, FieldArray> {
    let mut fields = BTreeMap::new();
    fields.insert(
        "SRs".to_string(),
        FieldArray::F64(
            Array2::from_shape_vec((4, 3), (0..12).map(|v| v as f64 / 4.0).collect()).unwrap(),
        ),
    );
    fields.insert(
        "SRd".to_string(),
        FieldArray::F64(
            Array2::from_shape_vec((4, 3), (0..12).map(|v| v as f64 / 8.0).collect()).unwrap(),
        ),
    );
    fields.insert(
        "fault-tag".to_string(),
        FieldArray::I64(Array2::from_shape_vec((1, 3), vec![1, 3, 3]).unwrap()),
    );
    fields
}

fn write_sample(dir: &TempDir, backend: Backend, compression: u32) -> PathBuf {
    let geometry = geometry();
    let connect = connect();
    let req = WriteRequest {
        prefix: dir.path().join("out"),
        geometry: &geometry,
        connect: &connect,
        fields: fields(),
        steps: &[(0.0, 0), (0.5, 1), (1.0, 2), (1.5, 3)],
        precision: PrecisionPolicy::Preserve,
        backend,
        compression,
    };
    writer::write(&req).unwrap()
}

#[test]
fn both_backends_roundtrip_bit_identically() {
    for (backend, compression) in [(Backend::Raw, 0), (Backend::Column, 0), (Backend::Column, 6)] {
        let tmp = TempDir::new().unwrap();
        let doc = write_sample(&tmp, backend, compression);
        let reader = XdmfReader::open(&doc).unwrap();

        assert_eq!(reader.time_axis().values(), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(reader.mesh().element_count, 3);
        assert_eq!(reader.mesh().node_count, 5);
        assert_eq!(reader.read_geometry().unwrap(), geometry());
        assert_eq!(reader.read_connect().unwrap(), connect());

        let srs = reader.read_field("SRs", StepSelect::All).unwrap();
        assert_eq!(srs, fields()["SRs"]);

        let tags = reader.read_field("fault-tag", StepSelect::All).unwrap();
        assert_eq!(tags.to_i64().into_raw_vec_and_offset().0, vec![1, 3, 3]);
    }
}

#[test]
fn single_step_and_window_reads_agree_across_backends() {
    let tmp_raw = TempDir::new().unwrap();
    let tmp_col = TempDir::new().unwrap();
    let raw = XdmfReader::open(write_sample(&tmp_raw, Backend::Raw, 0)).unwrap();
    let col = XdmfReader::open(write_sample(&tmp_col, Backend::Column, 4)).unwrap();

    for step in 0..4 {
        let a = raw
            .read_field_chunk("SRs", 1, 2, StepSelect::One(step))
            .unwrap();
        let b = col
            .read_field_chunk("SRs", 1, 2, StepSelect::One(step))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!((a.rows(), a.cols()), (1, 2));
    }
}

#[test]
fn chunk_beyond_element_axis_is_out_of_range() {
    let tmp = TempDir::new().unwrap();
    let reader = XdmfReader::open(write_sample(&tmp, Backend::Raw, 0)).unwrap();
    let err = reader
        .read_field_chunk("SRs", 2, 5, StepSelect::All)
        .unwrap_err();
    assert!(matches!(err, XdmfError::OutOfRange { .. }));
}

#[test]
fn padded_connectivity_is_truncated_to_the_declared_count() {
    let tmp = TempDir::new().unwrap();
    let doc = write_sample(&tmp, Backend::Raw, 0);

    // Simulate producer alignment padding: extra zero rows on disk.
    let connect_path = tmp.path().join("out/connect.bin");
    let mut bytes = std::fs::read(&connect_path).unwrap();
    bytes.extend_from_slice(&[0u8; 2 * 3 * 8]);
    std::fs::write(&connect_path, &bytes).unwrap();

    let reader = XdmfReader::open(&doc).unwrap();
    let back = reader.read_connect().unwrap();
    assert_eq!(back, connect());
}

#[test]
fn corrupt_step_becomes_nan_without_poisoning_neighbours() {
    let tmp = TempDir::new().unwrap();
    let doc = write_sample(&tmp, Backend::Raw, 0);

    // Drop the tail of the last step so its window cannot be satisfied.
    let field_path = tmp.path().join("out/SRs.bin");
    let bytes = std::fs::read(&field_path).unwrap();
    std::fs::write(&field_path, &bytes[..bytes.len() - 8]).unwrap();

    let reader = XdmfReader::open(&doc).unwrap();
    // A sub-width window forces the per-step path where the substitution
    // policy lives.
    let out = reader
        .read_field_chunk("SRs", 1, 2, StepSelect::All)
        .unwrap()
        .to_f64();
    assert_eq!(out[(0, 0)], 0.25);
    assert_eq!(out[(2, 1)], 2.0);
    assert!(out.row(3).iter().all(|v| v.is_nan()));

    // The same corruption on a single-step read is surfaced.
    let err = reader
        .read_field_chunk("SRs", 1, 2, StepSelect::One(3))
        .unwrap_err();
    assert!(matches!(err, XdmfError::CorruptChunk { step: 3, .. }));
}

#[test]
fn selection_pipeline_extracts_a_subset_that_reads_back() {
    let tmp = TempDir::new().unwrap();
    let doc = write_sample(&tmp, Backend::Raw, 0);
    let reader = XdmfReader::open(&doc).unwrap();

    let steps = select::select_steps(reader.time_axis(), &["0.5", "i-1"]).unwrap();
    assert_eq!(steps, vec![1, 3]);

    let region = select::region_elements(&reader, &BTreeSet::from([3])).unwrap();
    let elements = select::select_elements(Some(region), None).unwrap();
    let ids = elements.to_indices(reader.mesh().element_count);
    assert_eq!(ids, vec![1, 2]);

    // Re-emit the subset: selected steps, selected elements only.
    let geometry = reader.read_geometry().unwrap();
    let connect = reader.read_connect().unwrap();
    let sub_connect = Array2::from_shape_fn((ids.len(), 3), |(i, j)| connect[(ids[i], j)]);

    let mut sub_fields = BTreeMap::new();
    let full = reader.read_field("SRs", StepSelect::All).unwrap();
    sub_fields.insert("SRs".to_string(), full.select_columns(&ids));

    let times: Vec<(f64, usize)> = steps
        .iter()
        .map(|&s| (reader.time_axis().values()[s], s))
        .collect();
    let req = WriteRequest {
        prefix: tmp.path().join("subset"),
        geometry: &geometry,
        connect: &sub_connect,
        fields: sub_fields,
        steps: &times,
        precision: PrecisionPolicy::Preserve,
        backend: Backend::Column,
        compression: 4,
    };
    let sub_doc = writer::write(&req).unwrap();

    let sub = XdmfReader::open(&sub_doc).unwrap();
    assert_eq!(sub.time_axis().values(), &[0.5, 1.5]);
    assert_eq!(sub.mesh().element_count, 2);
    let srs = sub.read_field("SRs", StepSelect::All).unwrap().to_f64();
    // Source rows 1 and 3, columns 1 and 2.
    assert_eq!(
        srs.into_raw_vec_and_offset().0,
        vec![1.0, 1.25, 2.5, 2.75]
    );
}

#[test]
fn precision_reduction_survives_a_second_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let geometry = geometry();
    let connect = connect();
    let req = WriteRequest {
        prefix: tmp.path().join("narrow"),
        geometry: &geometry,
        connect: &connect,
        fields: fields(),
        steps: &[(0.0, 0), (1.0, 2)],
        precision: PrecisionPolicy::Reduce,
        backend: Backend::Column,
        compression: 0,
    };
    let doc = writer::write(&req).unwrap();

    let reader = XdmfReader::open(&doc).unwrap();
    let srs = reader.read_field("SRs", StepSelect::All).unwrap();
    assert_eq!(srs.dtype(), Dtype::Float32);
    let tags = reader.read_field("fault-tag", StepSelect::All).unwrap();
    assert_eq!(tags.dtype(), Dtype::Int32);
    // Mesh arrays never narrow.
    assert_eq!(reader.index().geometry_descriptor().dtype, Dtype::Float64);
    assert_eq!(reader.read_geometry().unwrap(), geometry);
}

#[test]
fn derived_magnitude_reads_through_a_written_output() {
    let tmp = TempDir::new().unwrap();
    let doc = write_sample(&tmp, Backend::Column, 0);
    let reader = XdmfReader::open(&doc).unwrap();

    let derived = VectorMagnitude::new(&reader, "SR", ("SRs", "SRd"));
    let out = derived.read_chunk("SR", 0, 3, StepSelect::One(1)).unwrap();
    let srs = reader
        .read_field("SRs", StepSelect::One(1))
        .unwrap()
        .to_f64();
    let srd = reader
        .read_field("SRd", StepSelect::One(1))
        .unwrap()
        .to_f64();
    let expected: Vec<f64> = srs
        .iter()
        .zip(srd.iter())
        .map(|(a, b)| (a * a + b * b).sqrt())
        .collect();
    assert_eq!(out.to_f64().into_raw_vec_and_offset().0, expected);
}
