use indexmap::IndexMap;

use crate::{
    error::SimulationError,
    record::SampleRecord,
    tensor::{DType, Tensor},
};

/// Output dtype casting rules, applied to every field after generation.
///
/// The default narrows `float64` to `float32`, the dtype downstream training expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastDtypeRules {
    rules: IndexMap<DType, DType>,
}

impl Default for CastDtypeRules {
    fn default() -> Self {
        Self::none().with_rule(DType::Float64, DType::Float32)
    }
}

impl CastDtypeRules {
    /// No casting at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            rules: IndexMap::new(),
        }
    }

    /// Adds or replaces the rule for `from`.
    #[must_use]
    pub fn with_rule(mut self, from: DType, to: DType) -> Self {
        self.rules.insert(from, to);
        self
    }

    /// Builds rules from dtype names, e.g. `[("float64", "float32")]`.
    pub fn from_names<I, K, V>(pairs: I) -> Result<Self, SimulationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut rules = Self::none();
        for (from, to) in pairs {
            rules = rules.with_rule(parse_dtype(from.as_ref())?, parse_dtype(to.as_ref())?);
        }
        Ok(rules)
    }

    /// Target dtype for `dtype`, if a rule matches.
    #[must_use]
    pub fn target_for(&self, dtype: DType) -> Option<DType> {
        self.rules.get(&dtype).copied()
    }

    /// Whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates `(from, to)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (DType, DType)> + '_ {
        self.rules.iter().map(|(from, to)| (*from, *to))
    }

    /// Casts one tensor according to the rules.
    #[must_use]
    pub fn apply_tensor(&self, tensor: Tensor) -> Tensor {
        match self.target_for(tensor.dtype()) {
            Some(target) => tensor.cast(target),
            None => tensor,
        }
    }

    /// Casts every field of a record.
    #[must_use]
    pub fn apply(&self, record: SampleRecord) -> SampleRecord {
        if self.is_empty() {
            return record;
        }
        record.map_tensors(|_, tensor| self.apply_tensor(tensor))
    }
}

fn parse_dtype(name: &str) -> Result<DType, SimulationError> {
    DType::from_name(name).ok_or_else(|| SimulationError::UnknownDType {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use ndarray::arr1;

    #[test]
    fn default_narrows_float64() {
        let data = CastDtypeRules::default().apply(record! {
            "x" => arr1(&[1.0_f64, 2.0]),
            "n" => 3_i64,
        });
        assert_eq!(data["x"].dtype(), DType::Float32);
        assert_eq!(data["x"].shape(), &[2]);
        assert_eq!(data["n"].dtype(), DType::Int64);
    }

    #[test]
    fn casting_is_idempotent_for_float32() {
        let rules = CastDtypeRules::default();
        let once = rules.apply_tensor(Tensor::from(arr1(&[0.5_f32, 1.5])));
        let twice = rules.apply_tensor(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice.dtype(), DType::Float32);
    }

    #[test]
    fn parses_rule_names() {
        let rules = CastDtypeRules::from_names([("int64", "float32"), ("f64", "f32")]).unwrap();
        assert_eq!(rules.target_for(DType::Int64), Some(DType::Float32));
        assert_eq!(rules.target_for(DType::Float64), Some(DType::Float32));
        let err = CastDtypeRules::from_names([("float128", "float32")]).unwrap_err();
        assert!(matches!(err, SimulationError::UnknownDType { name } if name == "float128"));
    }
}
