use std::ops::Index;

use indexmap::IndexMap;

use crate::{
    error::SimulationError,
    sampling::Parameters,
    shape::BatchShape,
    tensor::{Device, Tensor},
};

/// Named simulation output: field name to tensor, in insertion order.
///
/// Holds one draw when produced by an unbatched sampling function, or a whole batch
/// once stacked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleRecord {
    fields: IndexMap<String, Tensor>,
}

/// Builds a [`SampleRecord`] from `name => value` pairs.
///
/// ```
/// use sbi_simulators::record;
/// let draw = record! { "x" => 1.0, "n" => 3_i64 };
/// assert_eq!(draw.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::record::SampleRecord::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::record::SampleRecord::new();
        $( record.insert($name, $value); )+
        record
    }};
}

impl SampleRecord {
    /// Empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, returning the previous value. Existing fields keep their position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Tensor>) -> Option<Tensor> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Tensor>) -> Self {
        self.insert(name, value);
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.fields.get(name)
    }

    /// Removes a field, preserving the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.fields.shift_remove(name)
    }

    /// Whether the field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Field names as owned strings.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Whether both records have the same set of field names, ignoring order.
    #[must_use]
    pub fn same_fields(&self, other: &Self) -> bool {
        self.len() == other.len() && self.keys().all(|name| other.contains(name))
    }

    /// Ordered last-writer-wins merge: every field of `other` overwrites a field of the
    /// same name in `self`; new fields are appended in `other`'s order.
    ///
    /// This is the only composition primitive; sequential and composite simulators both
    /// go through it.
    pub fn merge(&mut self, other: Self) {
        for (name, value) in other.fields {
            self.fields.insert(name, value);
        }
    }

    /// Consuming variant of [`SampleRecord::merge`].
    #[must_use]
    pub fn merged(mut self, other: Self) -> Self {
        self.merge(other);
        self
    }

    /// Keeps only the fields `parameters` accepts.
    #[must_use]
    pub fn filter(&self, parameters: &Parameters) -> Self {
        self.fields
            .iter()
            .filter(|(name, _)| parameters.accepts(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Applies `f` to every tensor.
    #[must_use]
    pub fn map_tensors(self, mut f: impl FnMut(&str, Tensor) -> Tensor) -> Self {
        self.fields
            .into_iter()
            .map(|(name, value)| {
                let mapped = f(&name, value);
                (name, mapped)
            })
            .collect()
    }

    /// Moves every tensor to `device`.
    #[must_use]
    pub fn to_device(self, device: Device) -> Self {
        self.map_tensors(|_, value| value.to_device(device))
    }

    /// Appends a trailing unit axis to every exactly one-dimensional field.
    #[must_use]
    pub fn expand_vectors(self) -> Self {
        self.map_tensors(|_, value| {
            if value.ndim() == 1 {
                value.expand_last()
            } else {
                value
            }
        })
    }

    /// Stacks per-element records into one batched record.
    ///
    /// Records are ordered row-major over `batch_shape`; each field becomes
    /// `batch_shape ++ element_shape`. All records must carry the same field names.
    pub fn stack(records: &[Self], batch_shape: &BatchShape) -> Result<Self, SimulationError> {
        let Some(first) = records.first() else {
            return Ok(Self::new());
        };
        for (index, record) in records.iter().enumerate().skip(1) {
            if !record.same_fields(first) {
                return Err(SimulationError::SchemaMismatch {
                    index,
                    expected: first.field_names(),
                    actual: record.field_names(),
                });
            }
        }
        let mut stacked = Self::new();
        for name in first.keys() {
            let parts: Vec<Tensor> = records.iter().map(|record| record[name].clone()).collect();
            let joined = Tensor::stack(&parts).map_err(|err| SimulationError::field(name, err))?;
            let full_shape = batch_shape.with_trailing(first[name].shape());
            let reshaped = joined
                .reshape(&full_shape)
                .map_err(|err| SimulationError::field(name, err))?;
            stacked.insert(name, reshaped);
        }
        Ok(stacked)
    }

    /// Selects one element of a batched record by flat row-major index.
    pub fn select(&self, batch_shape: &BatchShape, flat_index: usize) -> Result<Self, SimulationError> {
        self.fields
            .iter()
            .map(|(name, value)| {
                value
                    .select_leading(batch_shape.ndim(), flat_index)
                    .map(|element| (name.clone(), element))
                    .map_err(|err| SimulationError::field(name.as_str(), err))
            })
            .collect()
    }

    /// Unwraps into the underlying ordered map.
    #[must_use]
    pub fn into_inner(self) -> IndexMap<String, Tensor> {
        self.fields
    }
}

impl Index<&str> for SampleRecord {
    type Output = Tensor;

    fn index(&self, name: &str) -> &Tensor {
        &self.fields[name]
    }
}

impl<K: Into<String>> FromIterator<(K, Tensor)> for SampleRecord {
    fn from_iter<I: IntoIterator<Item = (K, Tensor)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(name, value)| (name.into(), value)).collect(),
        }
    }
}

impl IntoIterator for SampleRecord {
    type Item = (String, Tensor);
    type IntoIter = indexmap::map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl From<IndexMap<String, Tensor>> for SampleRecord {
    fn from(fields: IndexMap<String, Tensor>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;
    use ndarray::{arr1, arr2};

    #[test]
    fn merge_is_last_writer_wins_and_keeps_positions() {
        let mut base = record! { "a" => 1.0, "b" => 2.0 };
        base.merge(record! { "b" => 20.0, "c" => 30.0 });
        assert_eq!(base.field_names(), vec!["a", "b", "c"]);
        assert_eq!(base["b"].scalar_f64().unwrap(), 20.0);
    }

    #[test]
    fn filter_respects_declared_parameters() {
        let kwargs = record! { "a" => 1.0, "b" => 2.0, "rng_seed" => 3_i64 };
        let filtered = kwargs.filter(&Parameters::named(["b"]));
        assert_eq!(filtered.field_names(), vec!["b"]);
        assert_eq!(kwargs.filter(&Parameters::any()).len(), 3);
        assert!(kwargs.filter(&Parameters::none()).is_empty());
    }

    #[test]
    fn stack_builds_batch_dimensions() {
        let records = vec![
            record! { "x" => 1.0, "v" => arr1(&[1.0, 2.0]) },
            record! { "x" => 2.0, "v" => arr1(&[3.0, 4.0]) },
            record! { "x" => 3.0, "v" => arr1(&[5.0, 6.0]) },
            record! { "x" => 4.0, "v" => arr1(&[7.0, 8.0]) },
        ];
        let shape = BatchShape::new(vec![2, 2]).unwrap();
        let stacked = SampleRecord::stack(&records, &shape).unwrap();
        assert_eq!(stacked["x"].shape(), &[2, 2]);
        assert_eq!(stacked["v"].shape(), &[2, 2, 2]);
        assert_eq!(stacked["x"].to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn stack_rejects_differing_field_names() {
        let records = vec![record! { "x" => 1.0 }, record! { "y" => 1.0 }];
        let err = SampleRecord::stack(&records, &BatchShape::count(2)).unwrap_err();
        match err {
            SimulationError::SchemaMismatch { index, expected, actual } => {
                assert_eq!(index, 1);
                assert_eq!(expected, vec!["x"]);
                assert_eq!(actual, vec!["y"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stack_reports_field_on_dtype_conflict() {
        let records = vec![record! { "x" => 1.0 }, record! { "x" => 1_i64 }];
        let err = SampleRecord::stack(&records, &BatchShape::count(2)).unwrap_err();
        assert!(matches!(err, SimulationError::Field { ref field, .. } if field == "x"));
    }

    #[test]
    fn select_returns_one_element() {
        let batch = record! { "m" => arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]) };
        let element = batch.select(&BatchShape::count(3), 1).unwrap();
        assert_eq!(element["m"].to_f64_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn expand_vectors_only_touches_one_dimensional_fields() {
        let data = record! {
            "scalar" => 1.0,
            "vector" => arr1(&[1.0, 2.0]),
            "matrix" => arr2(&[[1.0], [2.0]]),
        }
        .expand_vectors();
        assert_eq!(data["scalar"].ndim(), 0);
        assert_eq!(data["vector"].shape(), &[2, 1]);
        assert_eq!(data["matrix"].shape(), &[2, 1]);
        assert_eq!(data["vector"].dtype(), DType::Float64);
    }
}
