//! Storage backends behind one addressing model.
//!
//! Both backends expose capability-typed handles that own only a path; the
//! live file handle is acquired for the scope of one logical read or write
//! and released on every exit path, so long chunked-extraction workloads do
//! not accumulate descriptors.
//!
//! - [`raw`]: flat, headerless, row-major record files with native byte
//!   order. Byte addressing is `(step * elements_per_step + element) *
//!   precision_bytes` from the start of the file.
//! - [`column`]: a single container file of named 1-D/2-D datasets with
//!   per-dataset zlib compression and native row/column slicing.

pub mod column;
pub mod raw;

pub use column::{ColumnStore, ColumnStoreWriter};
pub use raw::RawFile;
