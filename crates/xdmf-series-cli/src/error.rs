use snafu::Snafu;
use xdmf_series_core::XdmfError;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to open index document {path}: {source}"))]
    OpenIndex {
        path: String,
        #[snafu(source(from(XdmfError, Box::new)))]
        source: Box<XdmfError>,
    },

    #[snafu(display("Failed to read '{name}': {source}"))]
    ReadField {
        name: String,
        #[snafu(source(from(XdmfError, Box::new)))]
        source: Box<XdmfError>,
    },

    #[snafu(display("Invalid selection: {source}"))]
    Selection {
        #[snafu(source(from(XdmfError, Box::new)))]
        source: Box<XdmfError>,
    },

    #[snafu(display("Failed to write output under prefix {prefix}: {source}"))]
    WriteOutput {
        prefix: String,
        #[snafu(source(from(XdmfError, Box::new)))]
        source: Box<XdmfError>,
    },

    #[snafu(display("Index path has no usable file name: {path}"))]
    BadPrefix { path: String },
}
