//! Reading, selecting and writing hybrid scientific-data outputs.
//!
//! An output is a small XML *index document* describing an unstructured mesh
//! and its time-varying cell attributes, pointing into bulk payloads stored
//! either as flat binary files ([`storage::RawFile`]) or as datasets of one
//! columnar container ([`storage::ColumnStore`]). This crate covers the full
//! life cycle:
//!
//! - [`index::XdmfIndex`] resolves a document into typed storage
//!   descriptors;
//! - [`reader::XdmfReader`] reads element windows and step selections
//!   without materializing whole fields, correcting alignment padding
//!   against the authoritative mesh counts;
//! - [`select`] turns user-facing time tokens and region/spatial filters
//!   into concrete step and element index sets;
//! - [`writer`] emits a new document plus payloads for a selected subset,
//!   optionally narrowed to 4-byte precision, on either backend;
//! - [`derived::VectorMagnitude`] synthesizes fields the index does not
//!   store.
//!
//! ```no_run
//! use xdmf_series_core::reader::XdmfReader;
//! use xdmf_series_core::descriptor::StepSelect;
//!
//! # fn main() -> xdmf_series_core::XdmfResult<()> {
//! let reader = XdmfReader::open("output.xdmf")?;
//! let last = reader.time_axis().len() - 1;
//! let slip = reader.read_field("ASl", StepSelect::One(last))?;
//! println!("{} elements", slip.cols());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod derived;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod reader;
pub mod select;
pub mod storage;
pub mod writer;

pub use descriptor::{
    DataLocation, Dtype, FieldArray, FieldDescriptor, MeshDescriptor, StepSelect, TimeAxis,
};
pub use error::{XdmfError, XdmfResult};
pub use index::XdmfIndex;
pub use reader::XdmfReader;
pub use writer::{Backend, PrecisionPolicy, WriteRequest, NON_TEMPORAL_FIELDS};
