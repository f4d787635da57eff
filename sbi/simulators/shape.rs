use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Canonical batch shape: the leading dimensions of a sampling request.
///
/// A bare count `n` normalizes to `(n,)`. The empty shape `()` is a single draw with no
/// batch axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchShape(Vec<usize>);

impl BatchShape {
    /// Creates a batch shape from dimensions. Fails when the element count does not
    /// fit in `usize`.
    pub fn new(dims: impl Into<Vec<usize>>) -> Result<Self, SimulationError> {
        let dims = dims.into();
        let input = format!("{dims:?}");
        checked_shape(dims, input)
    }

    /// Single-axis shape `(count,)`.
    #[must_use]
    pub fn count(count: usize) -> Self {
        Self(vec![count])
    }

    /// The empty shape `()`.
    #[must_use]
    pub const fn unbatched() -> Self {
        Self(Vec::new())
    }

    /// Dimensions.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of batch axes.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Number of draws the shape describes (1 for the empty shape).
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    /// `batch_shape ++ element_shape`.
    #[must_use]
    pub fn with_trailing(&self, element_shape: &[usize]) -> Vec<usize> {
        let mut full = self.0.clone();
        full.extend_from_slice(element_shape);
        full
    }

    /// Multi-indices of the Cartesian product in row-major order.
    #[must_use]
    pub fn indices(&self) -> Indices {
        Indices {
            dims: self.0.clone(),
            next: (self.num_elements() > 0).then(|| vec![0; self.0.len()]),
        }
    }

    /// Parses `"3"`, `"(2, 4)"`, `"[2, 4]"`, `"2x4"` or `"()"`.
    pub fn parse(text: &str) -> Result<Self, SimulationError> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| {
                trimmed
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
            })
            .unwrap_or(trimmed);
        let separator = if inner.contains(',') { ',' } else { 'x' };
        let parts: Vec<&str> = inner
            .split(separator)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() && inner.trim().is_empty() && trimmed != inner {
            return Ok(Self::unbatched());
        }
        if parts.is_empty() {
            return Err(SimulationError::invalid_shape(text, "no dimensions given"));
        }
        let dims = parts
            .iter()
            .map(|part| {
                part.parse::<i64>().map_err(|_| {
                    SimulationError::invalid_shape(text, format!("`{part}` is not an integer"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        validate_dims(dims, text)
    }
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "({single},)"),
            dims => {
                let joined: Vec<String> = dims.iter().map(ToString::to_string).collect();
                write!(f, "({})", joined.join(", "))
            }
        }
    }
}

/// Row-major iterator over the multi-indices of a [`BatchShape`].
#[derive(Debug, Clone)]
pub struct Indices {
    dims: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl Iterator for Indices {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut following = current.clone();
        let mut axis = following.len();
        let mut carried = true;
        while carried && axis > 0 {
            axis -= 1;
            following[axis] += 1;
            if following[axis] < self.dims[axis] {
                carried = false;
            } else {
                following[axis] = 0;
            }
        }
        if !carried {
            self.next = Some(following);
        }
        Some(current)
    }
}

fn validate_dims(
    dims: impl IntoIterator<Item = i64>,
    input: impl fmt::Display,
) -> Result<BatchShape, SimulationError> {
    let normalized = dims
        .into_iter()
        .map(|dim| {
            usize::try_from(dim).map_err(|_| {
                SimulationError::invalid_shape(
                    input.to_string(),
                    format!("dimension {dim} is negative"),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    checked_shape(normalized, input)
}

fn checked_shape(
    dims: Vec<usize>,
    input: impl fmt::Display,
) -> Result<BatchShape, SimulationError> {
    dims.iter()
        .try_fold(1_usize, |total, dim| total.checked_mul(*dim))
        .ok_or_else(|| {
            SimulationError::invalid_shape(input.to_string(), "element count overflows usize")
        })?;
    Ok(BatchShape(dims))
}

/// Anything that can be normalized into a [`BatchShape`].
pub trait ShapeLike {
    /// Normalizes into canonical form.
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError>;
}

impl ShapeLike for BatchShape {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        Ok(self)
    }
}

impl ShapeLike for &BatchShape {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        Ok(self.clone())
    }
}

impl ShapeLike for usize {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        Ok(BatchShape::count(self))
    }
}

impl ShapeLike for i64 {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        validate_dims([self], self)
    }
}

impl ShapeLike for i32 {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        validate_dims([i64::from(self)], self)
    }
}

impl ShapeLike for &[usize] {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        BatchShape::new(self)
    }
}

impl<const N: usize> ShapeLike for [usize; N] {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        BatchShape::new(self.to_vec())
    }
}

impl ShapeLike for Vec<usize> {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        BatchShape::new(self)
    }
}

impl ShapeLike for &[i64] {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        validate_dims(self.iter().copied(), format!("{self:?}"))
    }
}

impl<const N: usize> ShapeLike for [i64; N] {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        validate_dims(self, format!("{self:?}"))
    }
}

impl ShapeLike for Vec<i64> {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        let input = format!("{self:?}");
        validate_dims(self, input)
    }
}

impl ShapeLike for &str {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        BatchShape::parse(self)
    }
}

impl ShapeLike for (usize,) {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        Ok(BatchShape::count(self.0))
    }
}

impl ShapeLike for (usize, usize) {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        BatchShape::new(vec![self.0, self.1])
    }
}

impl ShapeLike for () {
    fn into_batch_shape(self) -> Result<BatchShape, SimulationError> {
        Ok(BatchShape::unbatched())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_count_equals_single_axis_tuple() {
        assert_eq!(3_usize.into_batch_shape().unwrap(), (3,).into_batch_shape().unwrap());
        assert_eq!(4_i64.into_batch_shape().unwrap().dims(), &[4]);
    }

    #[test]
    fn rejects_negative_dimensions() {
        let err = [2_i64, -1].into_batch_shape().unwrap_err();
        assert!(matches!(err, SimulationError::InvalidShape { .. }));
        assert!((-3_i32).into_batch_shape().is_err());
    }

    #[test]
    fn parses_textual_shapes() {
        assert_eq!(BatchShape::parse("3").unwrap().dims(), &[3]);
        assert_eq!(BatchShape::parse("(2, 4)").unwrap().dims(), &[2, 4]);
        assert_eq!(BatchShape::parse("[5,]").unwrap().dims(), &[5]);
        assert_eq!(BatchShape::parse("2x4").unwrap().dims(), &[2, 4]);
        assert_eq!(BatchShape::parse("()").unwrap(), BatchShape::unbatched());
        assert!(BatchShape::parse("two").is_err());
        assert!(BatchShape::parse("").is_err());
        assert!(BatchShape::parse("(2, -4)").is_err());
    }

    #[test]
    fn indices_follow_row_major_order() {
        let shape = BatchShape::new(vec![2, 3]).unwrap();
        let indices: Vec<Vec<usize>> = shape.indices().collect();
        assert_eq!(indices.len(), 6);
        assert_eq!(indices[0], vec![0, 0]);
        assert_eq!(indices[1], vec![0, 1]);
        assert_eq!(indices[3], vec![1, 0]);
        assert_eq!(indices[5], vec![1, 2]);
    }

    #[test]
    fn empty_and_zero_sized_shapes() {
        assert_eq!(BatchShape::unbatched().indices().count(), 1);
        assert_eq!(BatchShape::unbatched().num_elements(), 1);
        assert_eq!(BatchShape::new(vec![3, 0]).unwrap().indices().count(), 0);
    }

    #[test]
    fn displays_like_a_tuple() {
        assert_eq!(BatchShape::count(3).to_string(), "(3,)");
        assert_eq!(BatchShape::new(vec![2, 4]).unwrap().to_string(), "(2, 4)");
        assert_eq!(BatchShape::unbatched().to_string(), "()");
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        let huge = 1_usize << 40;
        for result in [
            BatchShape::new(vec![huge, huge]),
            [huge, huge].into_batch_shape(),
            vec![huge, huge].into_batch_shape(),
            (huge, huge).into_batch_shape(),
            [usize::MAX, 2].as_slice().into_batch_shape(),
        ] {
            assert!(matches!(result, Err(SimulationError::InvalidShape { .. })));
        }
        assert!([1_i64 << 40, 1 << 40].into_batch_shape().is_err());
        assert_eq!(BatchShape::new(vec![huge, 0]).unwrap().num_elements(), 0);
    }
}
