//! Derived-field composition over the core read capability.
//!
//! The resolver/reader pair is exposed through the [`FieldSource`]
//! capability: resolve a descriptor, read a chunk. Derived quantities are
//! wrapping strategies implemented entirely in terms of that interface,
//! never by modifying reader state, so they stack and they work over either
//! backend.
//!
//! [`VectorMagnitude`] is the one strategy the legacy tooling needed: when a
//! synthetic field (say a total slip rate) is absent from the index, it is
//! computed as `sqrt(a^2 + b^2)` from two stored component fields.

use crate::descriptor::{FieldArray, FieldDescriptor, StepSelect};
use crate::error::{XdmfError, XdmfResult};

/// Capability interface of the resolver/reader pair.
pub trait FieldSource {
    /// Resolve a named field to its storage descriptor.
    fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor>;

    /// Read a `[first, first+count)` element window of a named field.
    fn read_chunk(
        &self,
        name: &str,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray>;
}

impl<T: FieldSource + ?Sized> FieldSource for &T {
    fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor> {
        (**self).descriptor(name)
    }

    fn read_chunk(
        &self,
        name: &str,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray> {
        (**self).read_chunk(name, first, count, step)
    }
}

/// Synthesizes `name` as the euclidean magnitude of two component fields
/// when the index does not store it directly. A stored field of the same
/// name always wins.
#[derive(Debug, Clone)]
pub struct VectorMagnitude<S> {
    inner: S,
    name: String,
    components: (String, String),
}

impl<S: FieldSource> VectorMagnitude<S> {
    /// Wrap `inner`, deriving `name` from the two `components`.
    pub fn new(
        inner: S,
        name: impl Into<String>,
        components: (impl Into<String>, impl Into<String>),
    ) -> VectorMagnitude<S> {
        VectorMagnitude {
            inner,
            name: name.into(),
            components: (components.0.into(), components.1.into()),
        }
    }

    fn is_derived(&self, name: &str) -> bool {
        name == self.name && matches!(self.inner.descriptor(name), Err(XdmfError::NotFound { .. }))
    }
}

impl<S: FieldSource> FieldSource for VectorMagnitude<S> {
    fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor> {
        if self.is_derived(name) {
            // The synthetic field inherits the first component's layout.
            let mut descriptor = self.inner.descriptor(&self.components.0)?;
            descriptor.name = self.name.clone();
            Ok(descriptor)
        } else {
            self.inner.descriptor(name)
        }
    }

    fn read_chunk(
        &self,
        name: &str,
        first: usize,
        count: usize,
        step: StepSelect,
    ) -> XdmfResult<FieldArray> {
        if !self.is_derived(name) {
            return self.inner.read_chunk(name, first, count, step);
        }
        let a = self
            .inner
            .read_chunk(&self.components.0, first, count, step)?;
        let b = self
            .inner
            .read_chunk(&self.components.1, first, count, step)?;
        let single_precision = a.dtype() == crate::descriptor::Dtype::Float32;
        let mut magnitude = a.to_f64();
        magnitude.zip_mut_with(&b.to_f64(), |x, &y| *x = (*x * *x + y * y).sqrt());
        // Keep the component precision so round-trips stay faithful.
        Ok(if single_precision {
            FieldArray::F32(magnitude.mapv(|v| v as f32))
        } else {
            FieldArray::F64(magnitude)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DataLocation, Dtype};
    use crate::error::NotFoundSnafu;
    use ndarray::Array2;
    use snafu::prelude::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct InMemory(BTreeMap<String, FieldArray>);

    impl FieldSource for InMemory {
        fn descriptor(&self, name: &str) -> XdmfResult<FieldDescriptor> {
            let array = self.0.get(name).context(NotFoundSnafu { name })?;
            Ok(FieldDescriptor {
                name: name.to_string(),
                location: DataLocation::Raw(PathBuf::from("mem")),
                dtype: array.dtype(),
                elements_per_step: array.cols(),
                stored_steps: Some(array.rows()),
            })
        }

        fn read_chunk(
            &self,
            name: &str,
            first: usize,
            count: usize,
            step: StepSelect,
        ) -> XdmfResult<FieldArray> {
            let array = self.0.get(name).context(NotFoundSnafu { name })?;
            let rows = match step {
                StepSelect::All => 0..array.rows(),
                StepSelect::One(i) => i..i + 1,
            };
            Ok(array.slice_block(rows, first..first + count))
        }
    }

    fn source() -> InMemory {
        let mut fields = BTreeMap::new();
        fields.insert(
            "SRs".to_string(),
            FieldArray::F64(Array2::from_shape_vec((1, 3), vec![3.0, 0.0, 5.0]).unwrap()),
        );
        fields.insert(
            "SRd".to_string(),
            FieldArray::F64(Array2::from_shape_vec((1, 3), vec![4.0, 2.0, 12.0]).unwrap()),
        );
        InMemory(fields)
    }

    #[test]
    fn synthesizes_magnitude_when_absent() {
        let derived = VectorMagnitude::new(source(), "SR", ("SRs", "SRd"));
        let out = derived.read_chunk("SR", 0, 3, StepSelect::All).unwrap();
        assert_eq!(
            out.to_f64().into_raw_vec_and_offset().0,
            vec![5.0, 2.0, 13.0]
        );
        assert_eq!(derived.descriptor("SR").unwrap().elements_per_step, 3);
    }

    #[test]
    fn stored_field_wins_over_derivation() {
        let mut base = source();
        base.0.insert(
            "SR".to_string(),
            FieldArray::F64(Array2::from_shape_vec((1, 3), vec![9.0, 9.0, 9.0]).unwrap()),
        );
        let derived = VectorMagnitude::new(base, "SR", ("SRs", "SRd"));
        let out = derived.read_chunk("SR", 0, 3, StepSelect::All).unwrap();
        assert_eq!(
            out.to_f64().into_raw_vec_and_offset().0,
            vec![9.0, 9.0, 9.0]
        );
    }

    #[test]
    fn other_fields_pass_through() {
        let derived = VectorMagnitude::new(source(), "SR", ("SRs", "SRd"));
        let out = derived.read_chunk("SRd", 1, 2, StepSelect::All).unwrap();
        assert_eq!(out.to_f64().into_raw_vec_and_offset().0, vec![2.0, 12.0]);
        assert!(matches!(
            derived.descriptor("missing"),
            Err(XdmfError::NotFound { .. })
        ));
    }
}
