//! Error taxonomy and SNAFU context selectors for the whole crate.
//!
//! All public operations return [`XdmfResult`]. The taxonomy mirrors how the
//! failures are handled, not where they originate:
//!
//! - [`XdmfError::NotFound`] is recoverable: a caller may fall back to a
//!   derived quantity or an alternate tag name.
//! - [`XdmfError::MalformedIndex`] is fatal for the whole open.
//! - [`XdmfError::OutOfRange`] and [`XdmfError::InvalidArgument`] are caller
//!   mistakes, validated eagerly before any I/O where feasible.
//! - [`XdmfError::CorruptChunk`] is locally recoverable: during a multi-step
//!   extraction the affected step's row is replaced by NaN and the anomaly is
//!   logged as a warning; only single-step reads surface it to the caller.
//! - [`XdmfError::Io`] is a fatal backend failure.

use snafu::{Backtrace, prelude::*};

/// Result alias used throughout the crate.
pub type XdmfResult<T> = std::result::Result<T, XdmfError>;

/// Errors produced by the resolver, reader, writer and selector.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum XdmfError {
    /// A named field, tag or dataset is absent from the index or container.
    #[snafu(display("'{name}' not found in index"))]
    NotFound {
        /// The name that could not be resolved.
        name: String,
    },

    /// The index document is inconsistent or misses required attributes.
    #[snafu(display("malformed index document: {reason}"))]
    MalformedIndex {
        /// Human-readable description of the inconsistency.
        reason: String,
    },

    /// A requested element window exceeds the per-step element axis.
    #[snafu(display(
        "element range [{first}, {first}+{count}) exceeds row width {elements_per_step}"
    ))]
    OutOfRange {
        /// First element of the requested window.
        first: usize,
        /// Number of elements requested.
        count: usize,
        /// Authoritative number of elements per step.
        elements_per_step: usize,
    },

    /// A caller-supplied selection or option is invalid.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// Why the argument was rejected.
        reason: String,
    },

    /// One step's byte range could not be fully satisfied (short read).
    #[snafu(display("corrupt chunk: step {step} of {path} is short or unreadable"))]
    CorruptChunk {
        /// Payload file or container the short read happened in.
        path: String,
        /// Step index whose bytes were incomplete.
        step: usize,
    },

    /// A backend open/create/read/write failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// Path of the file involved in the failing operation.
        path: String,
        /// Underlying OS error.
        source: std::io::Error,
        /// Backtrace captured when the error occurred.
        backtrace: Backtrace,
    },
}
