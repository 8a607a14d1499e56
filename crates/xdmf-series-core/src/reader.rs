//! Chunked Reader: sub-range reads over a resolved index document.
//!
//! A reader wraps one [`XdmfIndex`] and reads arbitrary element windows and
//! step selections without loading the whole field. Element windows are
//! validated against the descriptor before any I/O; the storage handle is
//! acquired per read and released on every exit path.
//!
//! Topology and geometry reads truncate to the authoritative mesh counts
//! *after* the raw read, never by shrinking the read window — the on-disk
//! row count can exceed the declared count because the producing simulator
//! zero-pads rows for memory alignment.

use std::path::Path;

use ndarray::Array2;
use snafu::prelude::*;

use crate::derived::FieldSource;
use crate::descriptor::{
    DataLocation, FieldArray, FieldDescriptor, MeshDescriptor, StepSelect, TimeAxis,
};
use crate::error::{OutOfRangeSnafu, XdmfResult};
use crate::index::XdmfIndex;
use crate::storage::{ColumnStore, RawFile};

/// Reader over one index document and its payloads.
#[derive(Debug, Clone)]
pub struct XdmfReader {
    index: XdmfIndex,
}

impl XdmfReader {
    /// Open and resolve the index document at `path`.
    pub fn open(path: impl AsRef<Path>) -> XdmfResult<XdmfReader> {
        Ok(XdmfReader {
            index: XdmfIndex::open(path)?,
        })
    }

    /// Wrap an already-resolved index.
    pub fn from_index(index: XdmfIndex) -> XdmfReader {
        XdmfReader { index }
    }

    /// The resolved index.
    pub fn index(&self) -> &XdmfIndex {
        &self.index
    }

    /// Authoritative mesh counts.
    pub fn mesh(&self) -> &MeshDescriptor {
        self.index.mesh()
    }

    /// Time values of the temporal grids.
    pub fn time_axis(&self) -> &TimeAxis {
        self.index.time_axis()
    }

    /// Names of all readable fields, sorted.
    pub fn available_fields(&self) -> Vec<String> {
        self.index
            .field_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Read the full element width of a named field.
    pub fn read_field(&self, name: &str, step: StepSelect) -> XdmfResult<FieldArray> {
        let width = self.index.field(name)?.elements_per_step;
        self.read_field_chunk(name, 0, width, step)
    }

    /// Read a `[first, first+count)` element window of a named field.
    pub fn read_field_chunk(
        &self,
        name: &str,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray> {
        let descriptor = self.index.field(name)?.clone();
        self.read_descriptor_chunk(&descriptor, first, count, step)
    }

    /// Read the connectivity matrix, truncated to the authoritative cell
    /// count.
    pub fn read_connect(&self) -> XdmfResult<Array2<i64>> {
        let descriptor = self.index.connect_descriptor().clone();
        let width = descriptor.elements_per_step;
        let full = self.read_descriptor_chunk(&descriptor, 0, width, StepSelect::All)?;
        Ok(full
            .truncated_rows(self.index.mesh().element_count)
            .to_i64())
    }

    /// Read node coordinates, truncated to the authoritative node count.
    pub fn read_geometry(&self) -> XdmfResult<Array2<f64>> {
        let descriptor = self.index.geometry_descriptor().clone();
        let width = descriptor.elements_per_step;
        let full = self.read_descriptor_chunk(&descriptor, 0, width, StepSelect::All)?;
        Ok(full.truncated_rows(self.index.mesh().node_count).to_f64())
    }

    /// Read the per-element partition tags.
    pub fn read_partition(&self) -> XdmfResult<Vec<i64>> {
        let row = self.read_field("partition", StepSelect::All)?;
        let (data, _) = row.to_i64().into_raw_vec_and_offset();
        Ok(data)
    }

    /// Dispatch one chunk read to the descriptor's backend.
    fn read_descriptor_chunk(
        &self,
        descriptor: &FieldDescriptor,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray> {
        ensure!(
            first + count <= descriptor.elements_per_step,
            OutOfRangeSnafu {
                first,
                count,
                elements_per_step: descriptor.elements_per_step,
            }
        );
        let steps = descriptor.stored_steps.unwrap_or(1);

        match &descriptor.location {
            DataLocation::Raw(path) => {
                let raw = RawFile::new(path, descriptor.dtype, descriptor.elements_per_step);
                let whole_width = first == 0 && count == descriptor.elements_per_step;
                if whole_width && step == StepSelect::All {
                    // Fast path: one bulk read and a reshape. Row counts
                    // come from the file length, which keeps any alignment
                    // padding visible to the caller-side truncation.
                    raw.read_full()
                } else {
                    raw.read_rows(steps, step, first, count)
                }
            }
            DataLocation::Column { container, dataset } => {
                ColumnStore::open(container).read_slice(dataset, step, first, count)
            }
        }
    }
}

impl FieldSource for XdmfReader {
    fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor> {
        Ok(self.index.field(name)?.clone())
    }

    fn read_chunk(
        &self,
        name: &str,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray> {
        self.read_field_chunk(name, first, count, step)
    }
}
