//! CLI for inspecting XDMF-indexed outputs and extracting subsets.

mod error;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use ndarray::Array2;
use snafu::{OptionExt, ResultExt};
use xdmf_series_core::derived::{FieldSource, VectorMagnitude};
use xdmf_series_core::select::{self, SpatialFilter};
use xdmf_series_core::storage::ColumnStore;
use xdmf_series_core::writer::{self, Backend, PrecisionPolicy, WriteRequest, NON_TEMPORAL_FIELDS};
use xdmf_series_core::{DataLocation, FieldArray, StepSelect, XdmfReader};

use crate::error::{
    BadPrefixSnafu, CliResult, OpenIndexSnafu, ReadFieldSnafu, SelectionSnafu, WriteOutputSnafu,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    /// One flat binary file per payload.
    Raw,
    /// A single columnar container next to the document.
    Column,
}

impl From<BackendArg> for Backend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Raw => Backend::Raw,
            BackendArg::Column => Backend::Column,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PrecisionArg {
    /// Narrow 8-byte records to 4 bytes (default).
    Float,
    /// Keep the stored precision.
    Double,
}

impl From<PrecisionArg> for PrecisionPolicy {
    fn from(value: PrecisionArg) -> Self {
        match value {
            PrecisionArg::Float => PrecisionPolicy::Reduce,
            PrecisionArg::Double => PrecisionPolicy::Preserve,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print mesh counts, time axis and available fields of an output
    Info {
        /// Index document (.xdmf)
        xdmf: PathBuf,
    },

    /// Extract a time/region subset into a new output next to the
    /// working directory
    Extract {
        /// Index document (.xdmf)
        xdmf: PathBuf,

        /// Field names to extract, or 'all'
        #[arg(long, num_args = 1.., default_values_t = vec!["all".to_string()])]
        variables: Vec<String>,

        /// Time tokens, comma separated: a time value, i<step> or a
        /// i<start>:<stop>:<step> slice. E.g. 45.0,i2,i4:10:2,i-1
        #[arg(long, default_value = "i:")]
        time: String,

        /// Keep cells with x center coordinate in this range
        #[arg(long = "x-range", num_args = 2, value_names = ["XMIN", "XMAX"], allow_negative_numbers = true)]
        x_range: Option<Vec<f64>>,

        /// Keep cells with y center coordinate in this range
        #[arg(long = "y-range", num_args = 2, value_names = ["YMIN", "YMAX"], allow_negative_numbers = true)]
        y_range: Option<Vec<f64>>,

        /// Keep cells with z center coordinate in this range
        #[arg(long = "z-range", num_args = 2, value_names = ["ZMIN", "ZMAX"], allow_negative_numbers = true)]
        z_range: Option<Vec<f64>>,

        /// Keep cells whose region tag is one of these values
        #[arg(long, num_args = 1.., allow_negative_numbers = true)]
        region: Vec<i64>,

        /// Payload backend of the new output
        #[arg(long, value_enum, default_value_t = BackendArg::Column)]
        backend: BackendArg,

        /// Precision of field payloads in the new output
        #[arg(long, value_enum, default_value_t = PrecisionArg::Float)]
        precision: PrecisionArg,

        /// zlib level 0-9 (column backend only)
        #[arg(long, default_value_t = 4)]
        compression: u32,

        /// String appended to the prefix of the new output
        #[arg(long = "add2prefix", default_value = "_extracted")]
        add2prefix: String,
    },
}

#[derive(Debug, Parser)]
#[command(name = "xdmf-series", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

struct ExtractArgs {
    xdmf: PathBuf,
    variables: Vec<String>,
    time: String,
    spatial: SpatialFilter,
    region: Vec<i64>,
    backend: Backend,
    precision: PrecisionPolicy,
    compression: u32,
    add2prefix: String,
}

fn open_reader(path: &Path) -> CliResult<XdmfReader> {
    XdmfReader::open(path).context(OpenIndexSnafu {
        path: path.display().to_string(),
    })
}

fn location_text(location: &DataLocation) -> String {
    match location {
        DataLocation::Raw(path) => path.display().to_string(),
        DataLocation::Column { container, dataset } => {
            format!("{}:/{dataset}", container.display())
        }
    }
}

fn cmd_info(xdmf: &Path) -> CliResult<()> {
    let reader = open_reader(xdmf)?;
    let mesh = reader.mesh();
    let topology = if mesh.nodes_per_element == 4 {
        "tetrahedra"
    } else {
        "triangles"
    };
    println!("index:  {}", reader.index().path().display());
    println!(
        "mesh:   {} nodes, {} cells ({topology})",
        mesh.node_count, mesh.element_count
    );
    println!("steps:  {}", reader.index().step_count());

    let axis = reader.time_axis();
    match axis.values() {
        [] => println!("times:  none (mesh-only output)"),
        [only] => println!("times:  {only}"),
        [first, .., last] => {
            if let Ok(dt) = axis.timestep() {
                println!("times:  {first} .. {last} (dt {dt})");
            } else {
                println!("times:  {first} .. {last}");
            }
        }
    }

    println!("fields:");
    for name in reader.available_fields() {
        let descriptor = reader.descriptor(&name).context(ReadFieldSnafu {
            name: name.clone(),
        })?;
        let steps = match descriptor.stored_steps {
            Some(n) => format!("{n} step(s)"),
            None => "not time-varying".to_string(),
        };
        println!(
            "  {name}: {:?}, {} elements, {steps}, {}",
            descriptor.dtype,
            descriptor.elements_per_step,
            location_text(&descriptor.location),
        );
    }

    if let DataLocation::Column { container, .. } =
        &reader.index().geometry_descriptor().location
    {
        let datasets = ColumnStore::open(container)
            .dataset_names()
            .context(ReadFieldSnafu {
                name: container.display().to_string(),
            })?;
        println!(
            "container: {} ({})",
            container.display(),
            datasets.join(", ")
        );
    }
    Ok(())
}

fn band(range: &Option<Vec<f64>>) -> Option<(f64, f64)> {
    range.as_ref().map(|v| (v[0], v[1]))
}

/// `prefix-fault` plus `_x` becomes `prefix_x-fault`: the output-kind
/// qualifier stays the last dash-separated token.
fn append_to_prefix(prefix: &str, suffix: &str) -> String {
    let parts: Vec<&str> = prefix.split('-').collect();
    match parts.split_last() {
        Some((last, rest))
            if !rest.is_empty() && matches!(*last, "surface" | "low" | "fault") =>
        {
            format!("{}{suffix}-{last}", rest.join("-"))
        }
        _ => format!("{prefix}{suffix}"),
    }
}

fn cmd_extract(args: ExtractArgs) -> CliResult<()> {
    let reader = open_reader(&args.xdmf)?;
    let source = VectorMagnitude::new(&reader, "SR", ("SRs", "SRd"));

    let tokens: Vec<&str> = args.time.split(',').collect();
    let steps = select::select_steps(reader.time_axis(), &tokens).context(SelectionSnafu)?;
    let times: Vec<(f64, usize)> = steps
        .iter()
        .map(|&s| (reader.time_axis().values()[s], s))
        .collect();

    let geometry = reader.read_geometry().context(ReadFieldSnafu {
        name: "geometry".to_string(),
    })?;
    let connect = reader.read_connect().context(ReadFieldSnafu {
        name: "connect".to_string(),
    })?;

    let spatial_ids = if args.spatial.is_empty() {
        None
    } else {
        log::warn!("spatial filtering reads the whole mesh and is slow on large outputs");
        Some(select::spatial_elements(&geometry, &connect, &args.spatial))
    };
    let region_ids = if args.region.is_empty() {
        None
    } else {
        let regions: BTreeSet<i64> = args.region.iter().copied().collect();
        Some(select::region_elements(&reader, &regions).context(SelectionSnafu)?)
    };
    let selection = select::select_elements(region_ids, spatial_ids).context(SelectionSnafu)?;

    let element_count = reader.mesh().element_count;
    let (out_connect, ids) = if selection.is_all() {
        (connect.clone(), None)
    } else {
        println!(
            "extracting {} cells out of {}",
            selection.len(element_count),
            element_count
        );
        let ids = selection.to_indices(element_count);
        let sub = Array2::from_shape_fn((ids.len(), connect.ncols()), |(i, j)| {
            connect[(ids[i], j)]
        });
        (sub, Some(ids))
    };

    let variables = if args.variables == ["all"] {
        reader.available_fields()
    } else {
        args.variables.clone()
    };

    let mut fields: BTreeMap<String, FieldArray> = BTreeMap::new();
    for name in &variables {
        let descriptor = source.descriptor(name).context(ReadFieldSnafu {
            name: name.clone(),
        })?;
        let reserved = NON_TEMPORAL_FIELDS.contains(&name.as_str());
        if descriptor.stored_steps.is_none() && !reserved {
            log::warn!("'{name}' is not time-varying and not a known tag; skipping");
            continue;
        }
        let full = source
            .read_chunk(name, 0, descriptor.elements_per_step, StepSelect::All)
            .context(ReadFieldSnafu { name: name.clone() })?;
        let array = match &ids {
            Some(ids) => full.select_columns(ids),
            None => full,
        };
        fields.insert(name.clone(), array);
    }

    let stem = args
        .xdmf
        .file_stem()
        .and_then(|s| s.to_str())
        .context(BadPrefixSnafu {
            path: args.xdmf.display().to_string(),
        })?;
    let prefix = PathBuf::from(append_to_prefix(stem, &args.add2prefix));

    let request = WriteRequest {
        prefix: prefix.clone(),
        geometry: &geometry,
        connect: &out_connect,
        fields,
        steps: &times,
        precision: args.precision,
        backend: args.backend,
        compression: args.compression,
    };
    let doc = writer::write(&request).context(WriteOutputSnafu {
        prefix: prefix.display().to_string(),
    })?;
    println!("done writing {}", doc.display());
    Ok(())
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Info { xdmf } => cmd_info(&xdmf),

        Command::Extract {
            xdmf,
            variables,
            time,
            x_range,
            y_range,
            z_range,
            region,
            backend,
            precision,
            compression,
            add2prefix,
        } => cmd_extract(ExtractArgs {
            xdmf,
            variables,
            time,
            spatial: SpatialFilter {
                x: band(&x_range),
                y: band(&y_range),
                z: band(&z_range),
            },
            region,
            backend: backend.into(),
            precision: precision.into(),
            compression,
            add2prefix,
        }),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::append_to_prefix;

    #[test]
    fn suffix_lands_before_the_kind_qualifier() {
        assert_eq!(append_to_prefix("run-fault", "_ext"), "run_ext-fault");
        assert_eq!(
            append_to_prefix("long-run-surface", "_ext"),
            "long-run_ext-surface"
        );
        assert_eq!(append_to_prefix("run-low", "_ext"), "run_ext-low");
    }

    #[test]
    fn plain_prefixes_just_append() {
        assert_eq!(append_to_prefix("run", "_ext"), "run_ext");
        assert_eq!(append_to_prefix("fault", "_ext"), "fault_ext");
        assert_eq!(append_to_prefix("run-other", "_ext"), "run-other_ext");
    }
}
