//! Time and region selection.
//!
//! [`select_steps`] turns user-facing time tokens into a concrete ordered
//! step set; [`select_elements`] composes region-tag and centroid-band
//! element filters. Both produce views: the resulting index sets feed the
//! reader and writer but never touch storage themselves.
//!
//! Token grammar (one token per entry):
//!
//! - a literal time value, matched against the axis with absolute tolerance
//!   `1e-4`; a miss is logged, not fatal;
//! - `i<index>`: one step index, negative counts from the end;
//! - `i<start>:<stop>:<step>`: a half-open slice with the usual
//!   ordered-sequence semantics, any part optional.
//!
//! Resulting indices are deduplicated and sorted ascending; indices that
//! fall outside the axis are dropped silently here — the writer is the
//! place that validates strictly.

use std::collections::BTreeSet;

use ndarray::Array2;
use snafu::prelude::*;

use crate::derived::FieldSource;
use crate::descriptor::{StepSelect, TimeAxis};
use crate::error::{InvalidArgumentSnafu, NotFoundSnafu, XdmfError, XdmfResult};

/// Absolute tolerance for matching literal time values against the axis.
pub const TIME_MATCH_TOLERANCE: f64 = 1e-4;

/// Region tag fields, tried in this fixed priority order.
pub const REGION_TAG_FIELDS: [&str; 2] = ["fault-tag", "locationFlag"];

/// Resolve time tokens into a sorted, deduplicated set of step indices.
pub fn select_steps(axis: &TimeAxis, tokens: &[impl AsRef<str>]) -> XdmfResult<Vec<usize>> {
    let len = axis.len() as isize;
    let mut picked: BTreeSet<usize> = BTreeSet::new();

    for token in tokens {
        let token = token.as_ref().trim();
        if let Some(rest) = token.strip_prefix('i') {
            if rest.contains(':') {
                picked.extend(slice_token(rest, len)?);
            } else {
                let idx: isize = rest.parse().map_err(|_| {
                    InvalidArgumentSnafu {
                        reason: format!("unparsable step token 'i{rest}'"),
                    }
                    .build()
                })?;
                let idx = if idx < 0 { idx + len } else { idx };
                if (0..len).contains(&idx) {
                    picked.insert(idx as usize);
                }
            }
        } else {
            let value: f64 = token.parse().map_err(|_| {
                InvalidArgumentSnafu {
                    reason: format!("unparsable time token '{token}'"),
                }
                .build()
            })?;
            let hit = axis
                .values()
                .iter()
                .position(|t| (t - value).abs() <= TIME_MATCH_TOLERANCE);
            match hit {
                Some(i) => {
                    picked.insert(i);
                }
                None => log::warn!("time {value} not found in time axis"),
            }
        }
    }
    Ok(picked.into_iter().collect())
}

/// Expand a `start:stop:step` slice over `0..len`.
fn slice_token(token: &str, len: isize) -> XdmfResult<Vec<usize>> {
    let parts: Vec<&str> = token.split(':').collect();
    ensure!(
        parts.len() <= 3,
        InvalidArgumentSnafu {
            reason: format!("bad slice token 'i{token}'"),
        }
    );
    let mut bounds = [None::<isize>; 3];
    for (i, part) in parts.iter().enumerate() {
        if !part.is_empty() {
            bounds[i] = Some(part.parse().map_err(|_| {
                InvalidArgumentSnafu {
                    reason: format!("bad slice token 'i{token}'"),
                }
                .build()
            })?);
        }
    }
    let step = bounds[2].unwrap_or(1);
    ensure!(
        step != 0,
        InvalidArgumentSnafu {
            reason: "slice step cannot be zero".to_string(),
        }
    );

    let normalize = |v: isize| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let mut i = bounds[0].map(normalize).unwrap_or(0).clamp(0, len);
        let stop = bounds[1].map(normalize).unwrap_or(len).clamp(0, len);
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let mut i = bounds[0].map(normalize).unwrap_or(len - 1).clamp(-1, len - 1);
        let stop = bounds[1].map(normalize).unwrap_or(-1).clamp(-1, len - 1);
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

/// Ordered element index set produced by the filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementSelection {
    /// No filter active; every element is selected.
    All,
    /// Explicit ascending element indices.
    Indices(Vec<usize>),
}

impl ElementSelection {
    /// Number of selected elements out of `total`.
    pub fn len(&self, total: usize) -> usize {
        match self {
            ElementSelection::All => total,
            ElementSelection::Indices(ids) => ids.len(),
        }
    }

    /// Whether nothing is filtered out.
    pub fn is_all(&self) -> bool {
        matches!(self, ElementSelection::All)
    }

    /// Materialize the ascending index list.
    pub fn to_indices(&self, total: usize) -> Vec<usize> {
        match self {
            ElementSelection::All => (0..total).collect(),
            ElementSelection::Indices(ids) => ids.clone(),
        }
    }
}

/// Symmetric centroid bands per coordinate axis; a `(min, max)` range keeps
/// elements whose centroid lies within `|c - mid| < half_width`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialFilter {
    /// Band on the x axis.
    pub x: Option<(f64, f64)>,
    /// Band on the y axis.
    pub y: Option<(f64, f64)>,
    /// Band on the z axis.
    pub z: Option<(f64, f64)>,
}

impl SpatialFilter {
    /// True when no axis band is set.
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}

/// Elements whose region tag value is in `regions`. Tries the reserved tag
/// fields in priority order; `NotFound` when none of them exists.
pub fn region_elements(
    source: &dyn FieldSource,
    regions: &BTreeSet<i64>,
) -> XdmfResult<Vec<usize>> {
    for name in REGION_TAG_FIELDS {
        match source.descriptor(name) {
            Ok(descriptor) => {
                let tags =
                    source.read_chunk(name, 0, descriptor.elements_per_step, StepSelect::All)?;
                let (flat, _) = tags.to_i64().into_raw_vec_and_offset();
                return Ok(flat
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| regions.contains(v))
                    .map(|(i, _)| i)
                    .collect());
            }
            Err(XdmfError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    NotFoundSnafu {
        name: REGION_TAG_FIELDS.join(" / "),
    }
    .fail()
}

/// Elements whose centroid (mean of vertex coordinates) falls inside every
/// active band. Independent axis filters compose by intersection.
pub fn spatial_elements(
    geometry: &Array2<f64>,
    connect: &Array2<i64>,
    filter: &SpatialFilter,
) -> Vec<usize> {
    let bands = [filter.x, filter.y, filter.z];
    let nodes_per_element = connect.ncols() as f64;
    let mut out = Vec::new();

    'elements: for (e, element) in connect.rows().into_iter().enumerate() {
        let mut centroid = [0.0f64; 3];
        for &node in element {
            for (axis, c) in centroid.iter_mut().enumerate() {
                *c += geometry[(node as usize, axis)];
            }
        }
        for c in centroid.iter_mut() {
            *c /= nodes_per_element;
        }
        for (axis, band) in bands.iter().enumerate() {
            if let Some((min, max)) = band {
                let mid = 0.5 * (min + max);
                let half = 0.5 * (max - min);
                if (centroid[axis] - mid).abs() >= half {
                    continue 'elements;
                }
            }
        }
        out.push(e);
    }
    out
}

/// Compose the region and spatial results by intersection. Both absent
/// means no filtering; an empty final set is fatal.
pub fn select_elements(
    region: Option<Vec<usize>>,
    spatial: Option<Vec<usize>>,
) -> XdmfResult<ElementSelection> {
    let selection = match (region, spatial) {
        (None, None) => return Ok(ElementSelection::All),
        (Some(r), None) => r,
        (None, Some(s)) => s,
        (Some(r), Some(s)) => {
            let set: BTreeSet<usize> = s.into_iter().collect();
            r.into_iter().filter(|i| set.contains(i)).collect()
        }
    };
    ensure!(
        !selection.is_empty(),
        InvalidArgumentSnafu {
            reason: "all elements filtered out".to_string(),
        }
    );
    Ok(ElementSelection::Indices(selection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DataLocation, FieldArray, FieldDescriptor};
    use std::path::PathBuf;

    fn axis() -> TimeAxis {
        TimeAxis::new((0..=10).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn token_mix_resolves_to_sorted_dedup_union() {
        let tokens = ["5.0", "i2", "i4:8:2", "i-1"];
        let steps = select_steps(&axis(), &tokens).unwrap();
        assert_eq!(steps, vec![2, 4, 5, 6, 10]);
    }

    #[test]
    fn unmatched_time_is_reported_not_fatal() {
        let steps = select_steps(&axis(), &["7.77", "i1"]).unwrap();
        assert_eq!(steps, vec![1]);
    }

    #[test]
    fn out_of_bounds_indices_drop_silently() {
        let steps = select_steps(&axis(), &["i42", "i-99", "i3"]).unwrap();
        assert_eq!(steps, vec![3]);
    }

    #[test]
    fn full_and_negative_slices() {
        assert_eq!(
            select_steps(&axis(), &["i:"]).unwrap(),
            (0..=10).collect::<Vec<_>>()
        );
        assert_eq!(select_steps(&axis(), &["i-3:"]).unwrap(), vec![8, 9, 10]);
        assert_eq!(select_steps(&axis(), &["i8:2:-3"]).unwrap(), vec![5, 8]);
    }

    #[test]
    fn zero_step_slice_is_invalid() {
        assert!(matches!(
            select_steps(&axis(), &["i0:5:0"]),
            Err(XdmfError::InvalidArgument { .. })
        ));
    }

    struct Tags(&'static str, Vec<i64>);

    impl FieldSource for Tags {
        fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor> {
            if name != self.0 {
                return NotFoundSnafu { name }.fail();
            }
            Ok(FieldDescriptor {
                name: name.to_string(),
                location: DataLocation::Raw(PathBuf::from("mem")),
                dtype: crate::descriptor::Dtype::Int32,
                elements_per_step: self.1.len(),
                stored_steps: None,
            })
        }

        fn read_chunk(
            &self,
            name: &str,
            first: usize,
            count: usize,
            _step: StepSelect,
        ) -> XdmfResult<FieldArray> {
            assert_eq!(name, self.0);
            let window: Vec<i64> = self.1[first..first + count].to_vec();
            Ok(FieldArray::I64(
                Array2::from_shape_vec((1, count), window).unwrap(),
            ))
        }
    }

    #[test]
    fn region_filter_keeps_matching_tags() {
        let source = Tags("fault-tag", vec![0, 1, 1, 2, 0]);
        let ids = region_elements(&source, &BTreeSet::from([1])).unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn region_filter_falls_back_to_location_tag() {
        let source = Tags("locationFlag", vec![3, 0, 3]);
        let ids = region_elements(&source, &BTreeSet::from([3])).unwrap();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn region_filter_without_tag_field_is_not_found() {
        let source = Tags("unrelated", vec![0]);
        assert!(matches!(
            region_elements(&source, &BTreeSet::from([1])),
            Err(XdmfError::NotFound { .. })
        ));
    }

    #[test]
    fn centroid_bands_intersect_across_axes() {
        // Two triangles in the z=0 plane: one near the origin, one at x≈10.
        let geometry = Array2::from_shape_vec(
            (6, 3),
            vec![
                0.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                10.0, 0.0, 0.0, //
                11.0, 0.0, 0.0, //
                10.0, 1.0, 0.0,
            ],
        )
        .unwrap();
        let connect = Array2::from_shape_vec((2, 3), vec![0, 1, 2, 3, 4, 5]).unwrap();

        let near_origin = SpatialFilter {
            x: Some((-1.0, 2.0)),
            ..Default::default()
        };
        assert_eq!(spatial_elements(&geometry, &connect, &near_origin), vec![0]);

        let both_x_wrong_y = SpatialFilter {
            x: Some((-20.0, 20.0)),
            y: Some((5.0, 6.0)),
            ..Default::default()
        };
        assert!(spatial_elements(&geometry, &connect, &both_x_wrong_y).is_empty());
    }

    #[test]
    fn selection_exposes_its_cardinality() {
        let all = ElementSelection::All;
        assert!(all.is_all());
        assert_eq!(all.len(4), 4);
        assert_eq!(all.to_indices(3), vec![0, 1, 2]);

        let some = ElementSelection::Indices(vec![1, 3]);
        assert!(!some.is_all());
        assert_eq!(some.len(10), 2);
        assert_eq!(some.to_indices(10), vec![1, 3]);
    }

    #[test]
    fn empty_composition_is_fatal() {
        assert!(matches!(
            select_elements(Some(vec![1, 2]), Some(vec![3])),
            Err(XdmfError::InvalidArgument { .. })
        ));
        assert_eq!(
            select_elements(Some(vec![1, 2, 5]), Some(vec![2, 5, 7])).unwrap(),
            ElementSelection::Indices(vec![2, 5])
        );
        assert_eq!(select_elements(None, None).unwrap(), ElementSelection::All);
    }
}
