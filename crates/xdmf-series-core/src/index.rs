//! Descriptor Resolver: parse an index document into storage descriptors.
//!
//! An index document is a small XML tree describing mesh topology, geometry
//! and time-varying cell attributes, each pointing at a bulk payload (flat
//! binary file or columnar-container dataset). [`XdmfIndex::open`] parses the
//! whole document eagerly into owned descriptors — fresh on every open, no
//! caching across documents — so the reader and writer never touch the XML
//! again.
//!
//! Resolution rules preserved from the legacy format:
//!
//! - A `DataItem` whose `Format` is `HDF` or `Binary` carries the payload
//!   pointer directly; a `DataItem` with a `Reference` attribute is followed
//!   exactly one level, and a dangling target makes that field unresolvable
//!   (`NotFound` on lookup) without failing the open.
//! - An embedded colon in the location text selects the ColumnStore backend
//!   (`container:/dataset`); a plain path is a RawFile sibling of the
//!   document.
//! - A single-integer `Dimensions` list means not time-varying; two integers
//!   mean `(steps, elements_per_step)`. Temporal attributes wrapped in a
//!   `HyperSlab` item take their step count from the number of
//!   `GridType="Uniform"` grids, the only authoritative source.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node, ParsingOptions};
use snafu::prelude::*;

use crate::descriptor::{
    DataLocation, Dtype, FieldDescriptor, MeshDescriptor, TimeAxis,
};
use crate::error::{IoSnafu, MalformedIndexSnafu, NotFoundSnafu, XdmfResult};

/// Parsed index document: mesh counts, per-field descriptors and time axis.
#[derive(Debug, Clone)]
pub struct XdmfIndex {
    path: PathBuf,
    dir: PathBuf,
    mesh: MeshDescriptor,
    connect: FieldDescriptor,
    geometry: FieldDescriptor,
    fields: BTreeMap<String, FieldDescriptor>,
    times: TimeAxis,
    step_count: usize,
}

impl XdmfIndex {
    /// Read and parse the index document at `path`.
    pub fn open(path: impl AsRef<Path>) -> XdmfResult<XdmfIndex> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::parse(&xml, path)
    }

    /// Parse an index document already loaded into memory. `path` is used to
    /// resolve relative payload locations against the document's directory.
    pub fn parse(xml: &str, path: impl AsRef<Path>) -> XdmfResult<XdmfIndex> {
        let path = path.as_ref().to_path_buf();
        let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();

        // Legacy documents open with a `<!DOCTYPE Xdmf SYSTEM "Xdmf.dtd" []>`
        // header, which roxmltree rejects unless DTDs are allowed.
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(xml, options).map_err(|e| {
            MalformedIndexSnafu {
                reason: format!("XML parse error: {e}"),
            }
            .build()
        })?;
        let root = doc.root_element();

        let step_count = root
            .descendants()
            .filter(|n| n.has_tag_name("Grid") && n.attribute("GridType") == Some("Uniform"))
            .count();
        ensure!(
            step_count > 0,
            MalformedIndexSnafu {
                reason: "no GridType=Uniform grid found".to_string(),
            }
        );

        let times = collect_times(root)?;

        let (mesh_part, connect) = parse_mesh_node(root, &dir, "Topology", true)?;
        let (geo_part, geometry) = parse_mesh_node(root, &dir, "Geometry", false)?;
        let mesh = MeshDescriptor {
            node_count: geo_part,
            element_count: mesh_part,
            nodes_per_element: connect.elements_per_step,
        };

        let mut fields = BTreeMap::new();
        for attr in root.descendants().filter(|n| n.has_tag_name("Attribute")) {
            let name = match attr.attribute("Name") {
                Some(n) => n,
                None => continue,
            };
            if fields.contains_key(name) {
                continue;
            }
            if let Some(desc) = parse_attribute(attr, name, &dir, step_count)? {
                fields.insert(name.to_string(), desc);
            }
        }

        Ok(XdmfIndex {
            path,
            dir,
            mesh,
            connect,
            geometry,
            fields,
            times,
            step_count,
        })
    }

    /// Path of the index document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory payload locations are resolved against.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Authoritative mesh counts.
    pub fn mesh(&self) -> &MeshDescriptor {
        &self.mesh
    }

    /// Descriptor of the connectivity payload. Its row count reflects the
    /// on-disk layout and may exceed [`MeshDescriptor::element_count`].
    pub fn connect_descriptor(&self) -> &FieldDescriptor {
        &self.connect
    }

    /// Descriptor of the node coordinate payload.
    pub fn geometry_descriptor(&self) -> &FieldDescriptor {
        &self.geometry
    }

    /// Resolve a named attribute to its storage descriptor.
    pub fn field(&self, name: &str) -> XdmfResult<&FieldDescriptor> {
        self.fields.get(name).context(NotFoundSnafu { name })
    }

    /// Names of all resolvable attributes, in sorted order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Time values of the temporal grids (may be empty for mesh-only
    /// documents written without `Time` nodes).
    pub fn time_axis(&self) -> &TimeAxis {
        &self.times
    }

    /// Number of `GridType="Uniform"` grids, i.e. stored time steps.
    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

/// Walk an absolute document path like `/Xdmf/Domain/Grid/Grid[1]/Topology`,
/// with 1-based `[i]` child indices. Returns `None` when any segment does
/// not match.
fn resolve_reference<'a, 'input>(
    root: Node<'a, 'input>,
    path: &str,
) -> XdmfResult<Option<Node<'a, 'input>>> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let first = match segments.next() {
        Some(s) => s,
        None => return Ok(None),
    };
    let (tag, idx) = split_segment(first)?;
    if root.tag_name().name() != tag || idx > 1 {
        return Ok(None);
    }
    let mut node = root;
    for segment in segments {
        let (tag, idx) = split_segment(segment)?;
        let found = node
            .children()
            .filter(|c| c.has_tag_name(tag))
            .nth(idx - 1);
        match found {
            Some(n) => node = n,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Split `Name[3]` into `("Name", 3)`; a bare `Name` means the first match.
fn split_segment(segment: &str) -> XdmfResult<(&str, usize)> {
    match segment.split_once('[') {
        None => Ok((segment, 1)),
        Some((tag, rest)) => {
            let idx = rest
                .strip_suffix(']')
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&v| v >= 1);
            match idx {
                Some(i) => Ok((tag, i)),
                None => MalformedIndexSnafu {
                    reason: format!("bad reference segment '{segment}'"),
                }
                .fail(),
            }
        }
    }
}

/// Payload pointer extracted from one `DataItem`.
struct RawItem {
    location: DataLocation,
    dtype: Dtype,
    dims: Vec<usize>,
    hyperslab: bool,
}

fn is_payload_format(node: Node<'_, '_>) -> bool {
    matches!(node.attribute("Format"), Some("HDF") | Some("Binary"))
}

/// Find the payload `DataItem` under `scope`: the first one whose `Format`
/// is `HDF` or `Binary`, or the target of one level of `Reference`
/// indirection. `Ok(None)` means a dangling reference (recoverable);
/// a present but unusable item is a malformed document.
fn find_payload_item<'a, 'input>(
    scope: Node<'a, 'input>,
    root: Node<'a, 'input>,
) -> XdmfResult<Option<(Node<'a, 'input>, bool)>> {
    let mut saw_any = false;
    let mut hyperslab = false;
    for item in scope.descendants().filter(|n| n.has_tag_name("DataItem")) {
        saw_any = true;
        if item.attribute("ItemType") == Some("HyperSlab") {
            hyperslab = true;
            continue;
        }
        if is_payload_format(item) {
            return Ok(Some((item, hyperslab)));
        }
        if let Some(path) = item.attribute("Reference") {
            let target = resolve_reference(root, path.trim())?;
            return match target {
                Some(t) if t.has_tag_name("DataItem") && is_payload_format(t) => {
                    Ok(Some((t, hyperslab)))
                }
                Some(_) => MalformedIndexSnafu {
                    reason: format!("reference '{}' does not point at a payload item", path.trim()),
                }
                .fail(),
                None => Ok(None),
            };
        }
    }
    if saw_any {
        MalformedIndexSnafu {
            reason: "no payload DataItem with Format=HDF or Binary".to_string(),
        }
        .fail()
    } else {
        Ok(None)
    }
}

/// Parse location, precision, dimensions and number type out of a payload
/// `DataItem` node.
fn parse_item(item: Node<'_, '_>, dir: &Path, hyperslab: bool, integer_default: bool) -> XdmfResult<RawItem> {
    let text = item.text().unwrap_or_default().trim();
    ensure!(
        !text.is_empty(),
        MalformedIndexSnafu {
            reason: "payload DataItem has no location text".to_string(),
        }
    );
    let location = DataLocation::parse(text, dir)?;

    let precision = item
        .attribute("Precision")
        .and_then(|v| v.parse::<usize>().ok())
        .context(MalformedIndexSnafu {
            reason: format!("DataItem for '{text}' has no usable Precision"),
        })?;

    let dims: Vec<usize> = item
        .attribute("Dimensions")
        .unwrap_or_default()
        .split_whitespace()
        .map(|v| v.parse::<usize>())
        .collect::<Result<_, _>>()
        .ok()
        .filter(|d: &Vec<usize>| !d.is_empty() && d.len() <= 2)
        .context(MalformedIndexSnafu {
            reason: format!("DataItem for '{text}' has unparsable Dimensions"),
        })?;

    let integer = match item.attribute("NumberType") {
        Some("Int") | Some("UInt") => true,
        Some(_) => false,
        None => integer_default,
    };

    Ok(RawItem {
        location,
        dtype: Dtype::from_parts(precision, integer)?,
        dims,
        hyperslab,
    })
}

/// Parse a `Topology` or `Geometry` node: the authoritative count plus the
/// descriptor of the underlying 2-D payload.
fn parse_mesh_node(
    root: Node<'_, '_>,
    dir: &Path,
    tag: &str,
    integer: bool,
) -> XdmfResult<(usize, FieldDescriptor)> {
    let node = root
        .descendants()
        .find(|n| n.has_tag_name(tag))
        .context(MalformedIndexSnafu {
            reason: format!("no {tag} node found"),
        })?;

    // The node itself may be a reference into an earlier grid.
    let node = match node.attribute("Reference") {
        Some(path) => resolve_reference(root, path.trim())?.context(MalformedIndexSnafu {
            reason: format!("{tag} reference '{}' is dangling", path.trim()),
        })?,
        None => node,
    };

    let count = node
        .attribute("NumberOfElements")
        .and_then(|v| v.parse::<usize>().ok())
        .context(MalformedIndexSnafu {
            reason: format!("{tag} node has no usable NumberOfElements"),
        })?;

    let (item, _) = find_payload_item(node, root)?.context(MalformedIndexSnafu {
        reason: format!("{tag} payload reference is dangling"),
    })?;
    let raw = parse_item(item, dir, false, integer)?;
    ensure!(
        raw.dims.len() == 2,
        MalformedIndexSnafu {
            reason: format!("{tag} payload must be 2-D"),
        }
    );

    let descriptor = FieldDescriptor {
        name: tag.to_lowercase(),
        location: raw.location,
        dtype: raw.dtype,
        elements_per_step: raw.dims[1],
        stored_steps: Some(raw.dims[0]),
    };
    Ok((count, descriptor))
}

/// Parse one `Attribute` node into a field descriptor; `Ok(None)` skips
/// attributes whose payload reference is dangling.
fn parse_attribute(
    attr: Node<'_, '_>,
    name: &str,
    dir: &Path,
    step_count: usize,
) -> XdmfResult<Option<FieldDescriptor>> {
    let found = match find_payload_item(attr, attr.document().root_element())? {
        Some(f) => f,
        None => return Ok(None),
    };
    let raw = parse_item(found.0, dir, found.1, false)?;

    let (elements_per_step, stored_steps) = match raw.dims.as_slice() {
        [n] => (*n, None),
        // Hyperslab sources advertise a per-grid row count; only the number
        // of uniform grids is authoritative.
        [rows, n] if raw.hyperslab => {
            let _ = rows;
            (*n, Some(step_count))
        }
        [rows, n] => (*n, Some(*rows)),
        _ => unreachable!("dims length checked in parse_item"),
    };

    Ok(Some(FieldDescriptor {
        name: name.to_string(),
        location: raw.location,
        dtype: raw.dtype,
        elements_per_step,
        stored_steps,
    }))
}

/// Collect `Time` values of the uniform grids, in document order.
fn collect_times(root: Node<'_, '_>) -> XdmfResult<TimeAxis> {
    let mut values = Vec::new();
    for grid in root
        .descendants()
        .filter(|n| n.has_tag_name("Grid") && n.attribute("GridType") == Some("Uniform"))
    {
        let time = grid.children().find(|c| c.has_tag_name("Time"));
        if let Some(t) = time {
            let value = t
                .attribute("Value")
                .and_then(|v| v.parse::<f64>().ok())
                .context(MalformedIndexSnafu {
                    reason: "Time node has no usable Value".to_string(),
                })?;
            values.push(value);
        }
    }
    TimeAxis::new(values)
}
