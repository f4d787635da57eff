use std::{fmt, sync::Arc};

use indexmap::IndexSet;
use rand::rngs::SmallRng;
use tracing::debug;

use crate::{error::SimulationError, record::SampleRecord, shape::BatchShape, tensor::Tensor};

/// Calling convention of a sampling function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Batching {
    /// Produces one draw per call; auto-vectorized over the batch shape.
    #[default]
    Unbatched,
    /// Receives the batch shape and returns tensors that already carry it.
    Batched,
}

/// Keyword parameters a sampling function declares.
///
/// A catch-all function accepts every keyword, the way a `**kwargs` parameter would.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    names: IndexSet<String>,
    catch_all: bool,
}

impl Parameters {
    /// Accepts no keyword arguments.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Accepts every keyword argument.
    #[must_use]
    pub fn any() -> Self {
        Self {
            names: IndexSet::new(),
            catch_all: true,
        }
    }

    /// Accepts exactly the given names.
    #[must_use]
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            catch_all: false,
        }
    }

    /// Additionally accepts every other keyword.
    #[must_use]
    pub const fn with_catch_all(mut self) -> Self {
        self.catch_all = true;
        self
    }

    /// Whether `name` would be passed to the function.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        self.catch_all || self.names.contains(name)
    }

    /// Explicitly declared names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Whether the function has a catch-all parameter.
    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.catch_all
    }
}

/// Arguments handed to a sampling function for one call.
pub struct SampleArgs<'a> {
    kwargs: &'a SampleRecord,
    batch_shape: &'a BatchShape,
    index: Option<&'a [usize]>,
    rng: &'a mut SmallRng,
}

impl<'a> SampleArgs<'a> {
    /// Bundles the arguments for one call. `index` is the element position when the call
    /// is part of an auto-vectorized batch.
    pub fn new(
        kwargs: &'a SampleRecord,
        batch_shape: &'a BatchShape,
        index: Option<&'a [usize]>,
        rng: &'a mut SmallRng,
    ) -> Self {
        Self {
            kwargs,
            batch_shape,
            index,
            rng,
        }
    }

    /// Keyword argument by name.
    pub fn get(&self, name: &str) -> Result<&'a Tensor, SimulationError> {
        self.kwargs
            .get(name)
            .ok_or_else(|| SimulationError::MissingArgument {
                name: name.to_string(),
            })
    }

    /// Keyword argument by name, if present.
    #[must_use]
    pub fn try_get(&self, name: &str) -> Option<&'a Tensor> {
        self.kwargs.get(name)
    }

    /// All keyword arguments passed to this call.
    #[must_use]
    pub const fn kwargs(&self) -> &'a SampleRecord {
        self.kwargs
    }

    /// Batch shape of the request.
    #[must_use]
    pub const fn batch_shape(&self) -> &'a BatchShape {
        self.batch_shape
    }

    /// Position within the batch for auto-vectorized calls, `None` for batched calls.
    #[must_use]
    pub const fn element_index(&self) -> Option<&'a [usize]> {
        self.index
    }

    /// The simulator's random generator.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut *self.rng
    }
}

impl fmt::Debug for SampleArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleArgs")
            .field("kwargs", &self.kwargs.field_names())
            .field("batch_shape", &self.batch_shape)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

type SampleFn = dyn Fn(&mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> + Send + Sync;

/// A user-supplied sampling function with an explicit calling convention and declared
/// keyword parameters.
#[derive(Clone)]
pub struct SamplingFunction {
    name: String,
    batching: Batching,
    parameters: Parameters,
    func: Arc<SampleFn>,
}

impl fmt::Debug for SamplingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingFunction")
            .field("name", &self.name)
            .field("batching", &self.batching)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl SamplingFunction {
    /// Wraps a function returning one draw per call.
    pub fn unbatched<F>(name: impl Into<String>, parameters: Parameters, func: F) -> Self
    where
        F: Fn(&mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            batching: Batching::Unbatched,
            parameters,
            func: Arc::new(func),
        }
    }

    /// Wraps a function that produces the whole batch at once.
    pub fn batched<F>(name: impl Into<String>, parameters: Parameters, func: F) -> Self
    where
        F: Fn(&mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            batching: Batching::Batched,
            parameters,
            func: Arc::new(func),
        }
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calling convention.
    #[must_use]
    pub const fn batching(&self) -> Batching {
        self.batching
    }

    /// Whether the function is batched.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        self.batching == Batching::Batched
    }

    /// Declared keyword parameters.
    #[must_use]
    pub const fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Invokes the function once.
    pub fn call(&self, args: &mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> {
        (self.func)(args)
    }

    /// Produces a batched record: batched functions are called once, unbatched ones are
    /// auto-vectorized and stacked. Failures of the function itself surface as
    /// [`SimulationError::Stage`].
    pub fn sample_batch(
        &self,
        batch_shape: &BatchShape,
        kwargs: &SampleRecord,
        mode: ContextMode,
        rng: &mut SmallRng,
    ) -> Result<SampleRecord, SimulationError> {
        match self.batching {
            Batching::Batched => {
                let mut args = SampleArgs::new(kwargs, batch_shape, None, rng);
                self.call(&mut args)
                    .map_err(|source| SimulationError::stage(self.name(), source))
            }
            Batching::Unbatched => {
                let records = batched_call(self, batch_shape, kwargs, mode, rng)?;
                SampleRecord::stack(&records, batch_shape)
            }
        }
    }
}

/// How keyword context reaches each auto-vectorized call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Every call receives the same keyword arguments.
    Shared,
    /// Every call receives the element's slice of each (batched) keyword argument.
    PerElement,
}

/// Calls `function` once per element of `batch_shape`, in row-major order, and returns
/// the per-element records unstacked.
///
/// This is a per-sample loop, not a vectorized computation: correct for any sampler,
/// but each element pays one function call.
pub fn batched_call(
    function: &SamplingFunction,
    batch_shape: &BatchShape,
    kwargs: &SampleRecord,
    mode: ContextMode,
    rng: &mut SmallRng,
) -> Result<Vec<SampleRecord>, SimulationError> {
    debug!(
        function = function.name(),
        elements = batch_shape.num_elements(),
        "auto-vectorizing sampler"
    );
    let mut outputs = Vec::with_capacity(batch_shape.num_elements());
    for (flat_index, index) in batch_shape.indices().enumerate() {
        let element_kwargs;
        let call_kwargs = match mode {
            ContextMode::Shared => kwargs,
            ContextMode::PerElement => {
                element_kwargs = kwargs.select(batch_shape, flat_index)?;
                &element_kwargs
            }
        };
        let mut args = SampleArgs::new(call_kwargs, batch_shape, Some(index.as_slice()), &mut *rng);
        let record = function
            .call(&mut args)
            .map_err(|source| SimulationError::stage(function.name(), source))?;
        outputs.push(record);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{helper::seeded_rng, record};
    use ndarray::arr1;
    use rand::Rng;

    #[test]
    fn catch_all_accepts_everything() {
        let params = Parameters::named(["a"]).with_catch_all();
        assert!(params.accepts("a"));
        assert!(params.accepts("anything"));
        assert!(!Parameters::named(["a"]).accepts("b"));
    }

    #[test]
    fn batched_call_visits_every_element_in_order() {
        let function = SamplingFunction::unbatched("index", Parameters::none(), |args| {
            let index = args.element_index().unwrap_or_default();
            let flat = index[0] * 3 + index[1];
            Ok(record! { "flat" => i64::try_from(flat)? })
        });
        let shape = BatchShape::new(vec![2, 3]).unwrap();
        let outputs = batched_call(
            &function,
            &shape,
            &SampleRecord::new(),
            ContextMode::Shared,
            &mut seeded_rng(0),
        )
        .unwrap();
        let flats: Vec<f64> = outputs.iter().map(|r| r["flat"].scalar_f64().unwrap()).collect();
        assert_eq!(flats, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn per_element_mode_slices_context() {
        let function = SamplingFunction::unbatched("double", Parameters::named(["a"]), |args| {
            Ok(record! { "b" => args.get("a")?.mul_scalar(2.0)? })
        });
        let kwargs = record! { "a" => arr1(&[1.0, 2.0, 3.0]) };
        let out = function
            .sample_batch(
                &BatchShape::count(3),
                &kwargs,
                ContextMode::PerElement,
                &mut seeded_rng(0),
            )
            .unwrap();
        assert_eq!(out["b"].to_f64_vec(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn batched_functions_are_called_once() {
        let function = SamplingFunction::batched("noise", Parameters::none(), |args| {
            let n = args.batch_shape().num_elements();
            let values: Vec<f64> = (0..n).map(|_| args.rng().gen()).collect();
            Ok(record! { "noise" => Tensor::from_shape_vec(args.batch_shape().dims(), values)? })
        });
        let out = function
            .sample_batch(
                &BatchShape::new(vec![2, 2]).unwrap(),
                &SampleRecord::new(),
                ContextMode::Shared,
                &mut seeded_rng(1),
            )
            .unwrap();
        assert_eq!(out["noise"].shape(), &[2, 2]);
    }

    #[test]
    fn sampler_failures_name_the_stage() {
        let function = SamplingFunction::unbatched("needs_theta", Parameters::named(["theta"]), |args| {
            Ok(record! { "x" => args.get("theta")?.clone() })
        });
        let err = function
            .sample_batch(
                &BatchShape::count(2),
                &SampleRecord::new(),
                ContextMode::Shared,
                &mut seeded_rng(0),
            )
            .unwrap_err();
        assert!(matches!(err, SimulationError::Stage { ref stage, .. } if stage == "needs_theta"));
        assert!(err.to_string().contains("missing keyword argument `theta`"));
    }
}
