//! Index document templates.
//!
//! Documents are emitted as literal text, not through an XML writer: the
//! legacy layout is whitespace-stable and tooling downstream diffs the
//! documents, so the templates reproduce it byte for byte. Field attributes
//! come in three shapes:
//!
//! - temporal fields in a time-series document are `HyperSlab` items whose
//!   selection row pins one step of the shared 2-D payload;
//! - non-temporal tags carry a single-integer dimension list;
//! - every attribute of a mesh-only document is a flat `1 x n` item.
//!
//! Payload locations are written relative to the document (the prefix file
//! name, never its directory), which keeps an extraction relocatable as a
//! unit.

use crate::descriptor::{Dtype, MeshDescriptor};

use super::Backend;

/// One attribute entry of the document, with its as-written dtype.
pub(crate) struct DocField<'a> {
    pub(crate) name: &'a str,
    pub(crate) dtype: Dtype,
    pub(crate) temporal: bool,
}

const HEADER: &str = "<?xml version=\"1.0\" ?>\n<!DOCTYPE Xdmf SYSTEM \"Xdmf.dtd\" []>\n<Xdmf Version=\"2.0\">\n <Domain>";
const FOOTER: &str = "\n </Domain>\n</Xdmf>\n";

fn data_format(backend: Backend) -> &'static str {
    match backend {
        Backend::Raw => "Binary",
        Backend::Column => "HDF",
    }
}

fn data_location(prefix: &str, name: &str, backend: Backend) -> String {
    match backend {
        Backend::Raw => format!("{prefix}/{name}.bin"),
        Backend::Column => format!("{prefix}.cols:/{name}"),
    }
}

fn topology_type(mesh: &MeshDescriptor) -> &'static str {
    if mesh.nodes_per_element == 4 {
        "Tetrahedron"
    } else {
        "Triangle"
    }
}

fn mesh_nodes(prefix: &str, mesh: &MeshDescriptor, backend: Backend, indent: &str) -> String {
    let fmt = data_format(backend);
    let connect = data_location(prefix, "connect", backend);
    let geometry = data_location(prefix, "geometry", backend);
    format!(
        "\n{indent}<Topology TopologyType=\"{topo}\" NumberOfElements=\"{cells}\">\
         \n{indent} <DataItem NumberType=\"Int\" Precision=\"8\" Format=\"{fmt}\" Dimensions=\"{cells} {npe}\">{connect}</DataItem>\
         \n{indent}</Topology>\
         \n{indent}<Geometry name=\"geo\" GeometryType=\"XYZ\" NumberOfElements=\"{nodes}\">\
         \n{indent} <DataItem NumberType=\"Float\" Precision=\"8\" Format=\"{fmt}\" Dimensions=\"{nodes} 3\">{geometry}</DataItem>\
         \n{indent}</Geometry>",
        topo = topology_type(mesh),
        cells = mesh.element_count,
        npe = mesh.nodes_per_element,
        nodes = mesh.node_count,
    )
}

/// Document of a mesh-only output (no temporal grids, no `Time` nodes).
pub(crate) fn mesh_document(
    prefix: &str,
    mesh: &MeshDescriptor,
    fields: &[DocField<'_>],
    backend: Backend,
) -> String {
    let fmt = data_format(backend);
    let mut doc = String::from(HEADER);
    doc.push_str("\n  <Grid Name=\"mesh\" GridType=\"Uniform\">");
    doc.push_str(&mesh_nodes(prefix, mesh, backend, "   "));
    for field in fields {
        doc.push_str(&format!(
            "\n   <Attribute Name=\"{name}\" Center=\"Cell\">\
             \n    <DataItem NumberType=\"{nt}\" Precision=\"{prec}\" Format=\"{fmt}\" Dimensions=\"1 {cells}\">{loc}</DataItem>\
             \n   </Attribute>",
            name = field.name,
            nt = field.dtype.number_type(),
            prec = field.dtype.precision(),
            cells = mesh.element_count,
            loc = data_location(prefix, field.name, backend),
        ));
    }
    doc.push_str("\n  </Grid>");
    doc.push_str(FOOTER);
    doc
}

/// Document of a time-series output: one temporal collection per written
/// step. `steps` pairs each output time value with the source step index it
/// was extracted from; the hyperslab rows address the *output* payload, so
/// they run 0..steps regardless of the source indices.
pub(crate) fn timeseries_document(
    prefix: &str,
    mesh: &MeshDescriptor,
    fields: &[DocField<'_>],
    steps: &[(f64, usize)],
    backend: Backend,
) -> String {
    let fmt = data_format(backend);
    let cells = mesh.element_count;
    let mut doc = String::from(HEADER);
    for (i, (time, source)) in steps.iter().enumerate() {
        doc.push_str(&format!(
            "\n  <Grid Name=\"TimeSeries\" GridType=\"Collection\" CollectionType=\"Temporal\">\
             \n   <Grid Name=\"step_{source}\" GridType=\"Uniform\">"
        ));
        doc.push_str(&mesh_nodes(prefix, mesh, backend, "    "));
        doc.push_str(&format!("\n    <Time Value=\"{time}\"/>"));
        for field in fields {
            let loc = data_location(prefix, field.name, backend);
            let nt = field.dtype.number_type();
            let prec = field.dtype.precision();
            if field.temporal {
                doc.push_str(&format!(
                    "\n    <Attribute Name=\"{name}\" Center=\"Cell\">\
                     \n     <DataItem ItemType=\"HyperSlab\" Dimensions=\"{cells}\">\
                     \n      <DataItem NumberType=\"UInt\" Precision=\"4\" Format=\"XML\" Dimensions=\"3 2\">{i} 0 1 1 1 {cells}</DataItem>\
                     \n      <DataItem NumberType=\"{nt}\" Precision=\"{prec}\" Format=\"{fmt}\" Dimensions=\"{rows} {cells}\">{loc}</DataItem>\
                     \n     </DataItem>\
                     \n    </Attribute>",
                    name = field.name,
                    rows = i + 1,
                ));
            } else {
                doc.push_str(&format!(
                    "\n    <Attribute Name=\"{name}\" Center=\"Cell\">\
                     \n     <DataItem NumberType=\"{nt}\" Precision=\"{prec}\" Format=\"{fmt}\" Dimensions=\"{cells}\">{loc}</DataItem>\
                     \n    </Attribute>",
                    name = field.name,
                ));
            }
        }
        doc.push_str("\n   </Grid>\n  </Grid>");
    }
    doc.push_str(FOOTER);
    doc
}
