use std::{
    fmt,
    ops::{Add, Mul, Sub},
};

use ndarray::{Array, ArrayD, Axis, Dimension, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit float, the training default.
    Float32,
    /// 64-bit float, the host default for scalar draws.
    Float64,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Boolean.
    Bool,
}

impl DType {
    /// Canonical name (`float32`, `int64`, ...).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Bool => "bool",
        }
    }

    /// Looks up a dtype by canonical name or short alias (`f32`, `i64`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "float32" | "f32" => Some(Self::Float32),
            "float64" | "f64" | "double" => Some(Self::Float64),
            "int32" | "i32" => Some(Self::Int32),
            "int64" | "i64" => Some(Self::Int64),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Whether the dtype supports arithmetic.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Placement of a tensor. Host code runs on `Cpu`; accelerator-resident tensors carry
/// their ordinal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// CUDA device with the given ordinal.
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Errors raised by tensor operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// Operands live on different devices.
    #[error("cross-device operation between {left} and {right}")]
    DeviceMismatch {
        /// Device of the left operand.
        left: Device,
        /// Device of the right operand.
        right: Device,
    },
    /// Operands have different element types.
    #[error("dtype mismatch: expected {expected}, found {actual}")]
    DTypeMismatch {
        /// Expected dtype.
        expected: DType,
        /// Dtype encountered.
        actual: DType,
    },
    /// Shapes are incompatible for the requested operation.
    #[error("shape mismatch: expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Shape encountered.
        actual: Vec<usize>,
    },
    /// The operation is undefined for this dtype.
    #[error("operation `{op}` is not supported for {dtype}")]
    UnsupportedDType {
        /// Operation name.
        op: &'static str,
        /// Offending dtype.
        dtype: DType,
    },
    /// `stack` received no tensors.
    #[error("cannot stack an empty sequence of tensors")]
    EmptyStack,
    /// The tensor holds more than one element where a scalar was required.
    #[error("expected a single element, tensor has shape {shape:?}")]
    NotScalar {
        /// Shape of the tensor.
        shape: Vec<usize>,
    },
    /// Error raised by ndarray while reshaping or stacking.
    #[error("shape error: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for TensorError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Shape(err.to_string())
    }
}

/// Typed storage behind a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// `float32` storage.
    Float32(ArrayD<f32>),
    /// `float64` storage.
    Float64(ArrayD<f64>),
    /// `int32` storage.
    Int32(ArrayD<i32>),
    /// `int64` storage.
    Int64(ArrayD<i64>),
    /// `bool` storage.
    Bool(ArrayD<bool>),
}

macro_rules! with_data {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            TensorData::Float32($arr) => $body,
            TensorData::Float64($arr) => $body,
            TensorData::Int32($arr) => $body,
            TensorData::Int64($arr) => $body,
            TensorData::Bool($arr) => $body,
        }
    };
}

macro_rules! map_data {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            TensorData::Float32($arr) => TensorData::Float32($body),
            TensorData::Float64($arr) => TensorData::Float64($body),
            TensorData::Int32($arr) => TensorData::Int32($body),
            TensorData::Int64($arr) => TensorData::Int64($body),
            TensorData::Bool($arr) => TensorData::Bool($body),
        }
    };
}

impl TensorData {
    /// Element type of the storage.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Bool(_) => DType::Bool,
        }
    }

    fn shape(&self) -> &[usize] {
        with_data!(self, arr => arr.shape())
    }
}

/// Scalar types that can back a tensor.
pub trait Element: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Matching dtype tag.
    const DTYPE: DType;

    /// Wraps an array into typed storage.
    fn into_data(array: ArrayD<Self>) -> TensorData;

    /// Borrows the array if the storage has this element type.
    fn from_data(data: &TensorData) -> Option<&ArrayD<Self>>;

    /// Widens to `f64` (`true` maps to 1).
    fn to_f64(self) -> f64;

    /// Narrows from `f64` with `as` semantics (non-zero maps to `true`).
    fn from_f64(value: f64) -> Self;
}

macro_rules! numeric_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(arr) => Some(arr),
                    _ => None,
                }
            }

            #[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
            fn from_f64(value: f64) -> Self {
                value as Self
            }
        }
    };
}

numeric_element!(f32, Float32);
numeric_element!(f64, Float64);
numeric_element!(i32, Int32);
numeric_element!(i64, Int64);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn into_data(array: ArrayD<Self>) -> TensorData {
        TensorData::Bool(array)
    }

    fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::Bool(arr) => Some(arr),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

/// Dynamically typed n-d array with a device tag.
///
/// Scalars are 0-d tensors. Binary arithmetic requires both operands on the same device
/// and of the same dtype; scalar arithmetic (`add_scalar`, `mul_scalar`) works on any
/// device.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
    device: Device,
}

impl Tensor {
    /// Creates a host tensor from typed storage.
    #[must_use]
    pub const fn new(data: TensorData) -> Self {
        Self {
            data,
            device: Device::Cpu,
        }
    }

    /// Creates a host tensor from any ndarray array.
    #[must_use]
    pub fn from_array<T: Element, D: Dimension>(array: Array<T, D>) -> Self {
        Self::new(T::into_data(array.into_dyn()))
    }

    /// Creates a 0-d tensor.
    #[must_use]
    pub fn scalar<T: Element>(value: T) -> Self {
        Self::new(T::into_data(ArrayD::from_elem(IxDyn(&[]), value)))
    }

    /// Creates a tensor from a flat row-major buffer.
    pub fn from_shape_vec<T: Element>(shape: &[usize], values: Vec<T>) -> Result<Self, TensorError> {
        let array = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Self::new(T::into_data(array)))
    }

    /// Creates a tensor filled with `value`.
    #[must_use]
    pub fn full<T: Element>(shape: &[usize], value: T) -> Self {
        Self::new(T::into_data(ArrayD::from_elem(IxDyn(shape), value)))
    }

    /// Element type.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Device placement.
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Whether the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the typed storage.
    #[must_use]
    pub const fn data(&self) -> &TensorData {
        &self.data
    }

    /// Consumes the tensor and returns its storage.
    #[must_use]
    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Borrows the array if the dtype matches `T`.
    #[must_use]
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::from_data(&self.data)
    }

    /// Borrows the array as `T`, failing with a dtype mismatch otherwise.
    pub fn try_array<T: Element>(&self) -> Result<&ArrayD<T>, TensorError> {
        self.as_array::<T>().ok_or(TensorError::DTypeMismatch {
            expected: T::DTYPE,
            actual: self.dtype(),
        })
    }

    /// Copies the values widened to `f64`, keeping the shape.
    #[must_use]
    pub fn to_f64_array(&self) -> ArrayD<f64> {
        with_data!(&self.data, arr => arr.mapv(Element::to_f64))
    }

    /// Copies the values widened to `f64` in row-major order.
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_data!(&self.data, arr => arr.iter().map(|v| v.to_f64()).collect())
    }

    /// Returns the single element as `f64`.
    pub fn scalar_f64(&self) -> Result<f64, TensorError> {
        if self.len() != 1 {
            return Err(TensorError::NotScalar {
                shape: self.shape().to_vec(),
            });
        }
        Ok(self.to_f64_vec()[0])
    }

    /// Arithmetic mean of all elements, `None` when empty.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        self.to_f64_array().mean()
    }

    /// Casts to `dtype`, preserving shape and device. Casting to the current dtype is a
    /// plain copy.
    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        let data = with_data!(&self.data, arr => cast_array(arr, dtype));
        Self {
            data,
            device: self.device,
        }
    }

    /// Re-tags the tensor with a new device.
    #[must_use]
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Reshapes into `shape`, keeping the element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != self.len() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: self.shape().to_vec(),
            });
        }
        let data = map_data!(&self.data, arr => reshape_array(arr, shape)?);
        Ok(Self {
            data,
            device: self.device,
        })
    }

    /// Appends a trailing axis of length 1.
    #[must_use]
    pub fn expand_last(&self) -> Self {
        let axis = Axis(self.ndim());
        let data = map_data!(&self.data, arr => arr.clone().insert_axis(axis));
        Self {
            data,
            device: self.device,
        }
    }

    /// Repeats the tensor over new leading `batch_dims`; the result has shape
    /// `batch_dims ++ shape`.
    pub fn broadcast_leading(&self, batch_dims: &[usize]) -> Result<Self, TensorError> {
        let mut full = batch_dims.to_vec();
        full.extend_from_slice(self.shape());
        let mismatch = || TensorError::ShapeMismatch {
            expected: full.clone(),
            actual: self.shape().to_vec(),
        };
        let data = map_data!(&self.data, arr => arr
            .broadcast(IxDyn(&full))
            .ok_or_else(mismatch)?
            .to_owned());
        Ok(Self {
            data,
            device: self.device,
        })
    }

    /// Selects one element of the leading `batch_ndim` dimensions, addressed by its
    /// row-major flat index. The result has the trailing (element) shape.
    pub fn select_leading(&self, batch_ndim: usize, flat_index: usize) -> Result<Self, TensorError> {
        if batch_ndim == 0 {
            return Ok(self.clone());
        }
        let shape = self.shape();
        if shape.len() < batch_ndim {
            return Err(TensorError::ShapeMismatch {
                expected: vec![0; batch_ndim],
                actual: shape.to_vec(),
            });
        }
        let count: usize = shape[..batch_ndim].iter().product();
        if flat_index >= count {
            return Err(TensorError::ShapeMismatch {
                expected: shape[..batch_ndim].to_vec(),
                actual: vec![flat_index],
            });
        }
        let mut flat_shape = vec![count];
        flat_shape.extend_from_slice(&shape[batch_ndim..]);
        let flattened = self.reshape(&flat_shape)?;
        let data = map_data!(&flattened.data, arr => arr.index_axis(Axis(0), flat_index).to_owned());
        Ok(Self {
            data,
            device: self.device,
        })
    }

    /// Stacks tensors of identical dtype, device and shape along a new leading axis.
    pub fn stack(tensors: &[Self]) -> Result<Self, TensorError> {
        let first = tensors.first().ok_or(TensorError::EmptyStack)?;
        for tensor in &tensors[1..] {
            if tensor.device != first.device {
                return Err(TensorError::DeviceMismatch {
                    left: first.device,
                    right: tensor.device,
                });
            }
            if tensor.dtype() != first.dtype() {
                return Err(TensorError::DTypeMismatch {
                    expected: first.dtype(),
                    actual: tensor.dtype(),
                });
            }
            if tensor.shape() != first.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape().to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        let data = match first.dtype() {
            DType::Float32 => TensorData::Float32(stack_as::<f32>(tensors)?),
            DType::Float64 => TensorData::Float64(stack_as::<f64>(tensors)?),
            DType::Int32 => TensorData::Int32(stack_as::<i32>(tensors)?),
            DType::Int64 => TensorData::Int64(stack_as::<i64>(tensors)?),
            DType::Bool => TensorData::Bool(stack_as::<bool>(tensors)?),
        };
        Ok(Self {
            data,
            device: first.device,
        })
    }

    /// Element-wise sum with broadcasting.
    pub fn add(&self, other: &Self) -> Result<Self, TensorError> {
        self.binary(other, BinaryOp::Add)
    }

    /// Element-wise difference with broadcasting.
    pub fn sub(&self, other: &Self) -> Result<Self, TensorError> {
        self.binary(other, BinaryOp::Sub)
    }

    /// Element-wise product with broadcasting.
    pub fn mul(&self, other: &Self) -> Result<Self, TensorError> {
        self.binary(other, BinaryOp::Mul)
    }

    /// Adds a host scalar to every element.
    pub fn add_scalar(&self, value: f64) -> Result<Self, TensorError> {
        self.map_numeric("add_scalar", |x| x + value)
    }

    /// Multiplies every element by a host scalar.
    pub fn mul_scalar(&self, value: f64) -> Result<Self, TensorError> {
        self.map_numeric("mul_scalar", |x| x * value)
    }

    fn map_numeric(&self, op: &'static str, f: impl Fn(f64) -> f64) -> Result<Self, TensorError> {
        let data = match &self.data {
            TensorData::Float32(arr) => TensorData::Float32(arr.mapv(|x| f32::from_f64(f(x.to_f64())))),
            TensorData::Float64(arr) => TensorData::Float64(arr.mapv(&f)),
            TensorData::Int32(arr) => TensorData::Int32(arr.mapv(|x| i32::from_f64(f(x.to_f64())))),
            TensorData::Int64(arr) => TensorData::Int64(arr.mapv(|x| i64::from_f64(f(x.to_f64())))),
            TensorData::Bool(_) => {
                return Err(TensorError::UnsupportedDType {
                    op,
                    dtype: DType::Bool,
                })
            }
        };
        Ok(Self {
            data,
            device: self.device,
        })
    }

    fn binary(&self, other: &Self, op: BinaryOp) -> Result<Self, TensorError> {
        if self.device != other.device {
            return Err(TensorError::DeviceMismatch {
                left: self.device,
                right: other.device,
            });
        }
        let data = match (&self.data, &other.data) {
            (TensorData::Float32(a), TensorData::Float32(b)) => {
                TensorData::Float32(zip_broadcast(a, b, |x, y| op.apply(x, y))?)
            }
            (TensorData::Float64(a), TensorData::Float64(b)) => {
                TensorData::Float64(zip_broadcast(a, b, |x, y| op.apply(x, y))?)
            }
            (TensorData::Int32(a), TensorData::Int32(b)) => {
                TensorData::Int32(zip_broadcast(a, b, |x, y| op.apply(x, y))?)
            }
            (TensorData::Int64(a), TensorData::Int64(b)) => {
                TensorData::Int64(zip_broadcast(a, b, |x, y| op.apply(x, y))?)
            }
            (TensorData::Bool(_), _) => {
                return Err(TensorError::UnsupportedDType {
                    op: op.name(),
                    dtype: DType::Bool,
                })
            }
            (left, right) => {
                return Err(TensorError::DTypeMismatch {
                    expected: left.dtype(),
                    actual: right.dtype(),
                })
            }
        };
        Ok(Self {
            data,
            device: self.device,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
        }
    }

    fn apply<T>(self, x: T, y: T) -> T
    where
        T: Add<Output = T> + Sub<Output = T> + Mul<Output = T>,
    {
        match self {
            Self::Add => x + y,
            Self::Sub => x - y,
            Self::Mul => x * y,
        }
    }
}

fn cast_array<T: Element>(array: &ArrayD<T>, dtype: DType) -> TensorData {
    match dtype {
        DType::Float32 => TensorData::Float32(array.mapv(|v| f32::from_f64(v.to_f64()))),
        DType::Float64 => TensorData::Float64(array.mapv(Element::to_f64)),
        DType::Int32 => TensorData::Int32(array.mapv(|v| i32::from_f64(v.to_f64()))),
        DType::Int64 => TensorData::Int64(array.mapv(|v| i64::from_f64(v.to_f64()))),
        DType::Bool => TensorData::Bool(array.mapv(|v| bool::from_f64(v.to_f64()))),
    }
}

fn reshape_array<T: Element>(array: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>, TensorError> {
    let standard = array.as_standard_layout().into_owned();
    Ok(standard.into_shape(IxDyn(shape))?)
}

fn stack_as<T: Element>(tensors: &[Tensor]) -> Result<ArrayD<T>, TensorError> {
    let views = tensors
        .iter()
        .map(|tensor| tensor.try_array::<T>().map(|arr| arr.view()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ndarray::stack(Axis(0), &views)?)
}

fn zip_broadcast<T: Copy>(
    a: &ArrayD<T>,
    b: &ArrayD<T>,
    f: impl Fn(T, T) -> T,
) -> Result<ArrayD<T>, TensorError> {
    if a.shape() == b.shape() {
        return Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)));
    }
    if let Some(b_view) = b.broadcast(a.raw_dim()) {
        return Ok(Zip::from(a).and(b_view).map_collect(|&x, &y| f(x, y)));
    }
    if let Some(a_view) = a.broadcast(b.raw_dim()) {
        return Ok(Zip::from(a_view).and(b).map_collect(|&x, &y| f(x, y)));
    }
    Err(TensorError::ShapeMismatch {
        expected: a.shape().to_vec(),
        actual: b.shape().to_vec(),
    })
}

macro_rules! scalar_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Tensor {
                fn from(value: $ty) -> Self {
                    Self::scalar(value)
                }
            }
        )*
    };
}

scalar_from!(f32, f64, i32, i64, bool);

impl<T: Element, D: Dimension> From<Array<T, D>> for Tensor {
    fn from(array: Array<T, D>) -> Self {
        Self::from_array(array)
    }
}

impl<T: Element> From<Vec<T>> for Tensor {
    fn from(values: Vec<T>) -> Self {
        Self::from_array(ndarray::Array1::from(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn scalars_default_to_host_float64() {
        let t = Tensor::from(1.5);
        assert_eq!(t.dtype(), DType::Float64);
        assert_eq!(t.device(), Device::Cpu);
        assert!(t.shape().is_empty());
        assert_eq!(t.scalar_f64().unwrap(), 1.5);
    }

    #[test]
    fn cast_preserves_shape_and_device() {
        let t = Tensor::from(arr2(&[[1.0_f64, 2.0], [3.0, 4.0]])).to_device(Device::Cuda(0));
        let cast = t.cast(DType::Float32);
        assert_eq!(cast.dtype(), DType::Float32);
        assert_eq!(cast.shape(), &[2, 2]);
        assert_eq!(cast.device(), Device::Cuda(0));
        assert_eq!(cast.cast(DType::Float32), cast);
    }

    #[test]
    fn broadcast_leading_repeats_element() {
        let t = Tensor::from(arr1(&[1_i64, 2])).to_device(Device::Cuda(1));
        let batched = t.broadcast_leading(&[3]).unwrap();
        assert_eq!(batched.shape(), &[3, 2]);
        assert_eq!(batched.device(), Device::Cuda(1));
        assert_eq!(batched.to_f64_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(t.broadcast_leading(&[]).unwrap(), t);
    }

    #[test]
    fn bool_and_int_casts() {
        let t = Tensor::from(arr1(&[0_i64, 1, 3]));
        let as_bool = t.cast(DType::Bool);
        let flags: Vec<bool> = as_bool.as_array::<bool>().unwrap().iter().copied().collect();
        assert_eq!(flags, vec![false, true, true]);
        assert_eq!(as_bool.cast(DType::Float32).to_f64_vec(), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn stack_adds_leading_axis() {
        let parts = vec![Tensor::from(arr1(&[1.0, 2.0])), Tensor::from(arr1(&[3.0, 4.0]))];
        let stacked = Tensor::stack(&parts).unwrap();
        assert_eq!(stacked.shape(), &[2, 2]);
        assert_eq!(stacked.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn stack_rejects_mixed_shapes_and_dtypes() {
        let err = Tensor::stack(&[Tensor::from(arr1(&[1.0])), Tensor::from(arr1(&[1.0, 2.0]))])
            .unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
        let err = Tensor::stack(&[Tensor::from(1.0), Tensor::from(1_i64)]).unwrap_err();
        assert!(matches!(err, TensorError::DTypeMismatch { .. }));
        assert_eq!(Tensor::stack(&[]).unwrap_err(), TensorError::EmptyStack);
    }

    #[test]
    fn select_leading_flattens_batch_dims() {
        let t = Tensor::from_shape_vec(&[2, 3, 2], (0..12).map(f64::from).collect()).unwrap();
        let element = t.select_leading(2, 4).unwrap();
        assert_eq!(element.shape(), &[2]);
        assert_eq!(element.to_f64_vec(), vec![8.0, 9.0]);
        assert!(t.select_leading(2, 6).is_err());
    }

    #[test]
    fn binary_ops_check_device_before_arithmetic() {
        let host = Tensor::from(1.0);
        let device = Tensor::from(2.0).to_device(Device::Cuda(0));
        let err = device.add(&host).unwrap_err();
        assert_eq!(
            err,
            TensorError::DeviceMismatch {
                left: Device::Cuda(0),
                right: Device::Cpu
            }
        );
        let shifted = device.add_scalar(1.0).unwrap();
        assert_eq!(shifted.device(), Device::Cuda(0));
        assert_eq!(shifted.scalar_f64().unwrap(), 3.0);
    }

    #[test]
    fn binary_ops_broadcast() {
        let a = Tensor::from(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        let b = Tensor::from(arr1(&[10.0, 20.0]));
        assert_eq!(a.add(&b).unwrap().to_f64_vec(), vec![11.0, 22.0, 13.0, 24.0]);
        assert_eq!(b.mul(&a).unwrap().to_f64_vec(), vec![10.0, 40.0, 30.0, 80.0]);
        let c = Tensor::from(arr1(&[1.0, 2.0, 3.0]));
        assert!(matches!(a.sub(&c).unwrap_err(), TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn expand_last_appends_unit_axis() {
        let t = Tensor::from(arr1(&[1_i32, 2, 3]));
        assert_eq!(t.expand_last().shape(), &[3, 1]);
    }
}
