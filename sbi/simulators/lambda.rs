use serde_json::json;
use shared_logging::LogLevel;
use tracing::debug;

use crate::{
    dtype::CastDtypeRules,
    error::SimulationError,
    helper::RandomSource,
    record::SampleRecord,
    sampling::{ContextMode, Parameters, SampleArgs, SamplingFunction},
    shape::BatchShape,
    simulator::Simulator,
    telemetry::SimulationTelemetry,
    tensor::Tensor,
};

/// Simulator wrapping a single sampling function.
///
/// Unbatched functions are called once per batch element with the same keyword
/// arguments and their draws are stacked; batched functions are called once. Every
/// output field is then cast according to the configured dtype rules.
#[derive(Debug, Clone)]
pub struct LambdaSimulator {
    function: SamplingFunction,
    cast_dtypes: CastDtypeRules,
    reserved: SampleRecord,
    rng: RandomSource,
    telemetry: Option<SimulationTelemetry>,
}

impl LambdaSimulator {
    /// Wraps `function` with default casting, no reserved arguments and a fresh
    /// entropy-seeded generator.
    #[must_use]
    pub fn new(function: SamplingFunction) -> Self {
        Self::builder(function).build()
    }

    /// Wraps an unbatched closure.
    #[must_use]
    pub fn unbatched<F>(parameters: Parameters, func: F) -> Self
    where
        F: Fn(&mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> + Send + Sync + 'static,
    {
        Self::new(SamplingFunction::unbatched("lambda", parameters, func))
    }

    /// Wraps a batched closure.
    #[must_use]
    pub fn batched<F>(parameters: Parameters, func: F) -> Self
    where
        F: Fn(&mut SampleArgs<'_>) -> anyhow::Result<SampleRecord> + Send + Sync + 'static,
    {
        Self::new(SamplingFunction::batched("lambda", parameters, func))
    }

    /// Starts a builder around `function`.
    #[must_use]
    pub fn builder(function: SamplingFunction) -> LambdaSimulatorBuilder {
        LambdaSimulatorBuilder::new(function)
    }

    /// The wrapped function.
    #[must_use]
    pub const fn function(&self) -> &SamplingFunction {
        &self.function
    }

    /// Whether the wrapped function is batched.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        self.function.is_batched()
    }

    /// Output casting rules.
    #[must_use]
    pub const fn cast_dtypes(&self) -> &CastDtypeRules {
        &self.cast_dtypes
    }

    /// Default keyword arguments.
    #[must_use]
    pub const fn reserved_arguments(&self) -> &SampleRecord {
        &self.reserved
    }

    /// Generator handle used for every call.
    #[must_use]
    pub const fn rng(&self) -> &RandomSource {
        &self.rng
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }
}

impl Simulator for LambdaSimulator {
    fn sample(
        &self,
        batch_shape: &BatchShape,
        context: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError> {
        self.log(
            LogLevel::Debug,
            "simulation.sample.start",
            json!({
                "simulator": "lambda",
                "function": self.function.name(),
                "batch_shape": batch_shape.dims(),
                "batched": self.is_batched(),
            }),
        );
        let kwargs = self
            .reserved
            .clone()
            .merged(context.clone())
            .filter(self.function.parameters());
        debug!(
            function = self.function.name(),
            kwargs = ?kwargs.field_names(),
            "lambda simulator sampling"
        );

        let raw = {
            let mut rng = self.rng.lock();
            self.function
                .sample_batch(batch_shape, &kwargs, ContextMode::Shared, &mut rng)
        };
        let output = match raw {
            Ok(record) => self.cast_dtypes.apply(record),
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    "simulation.sample.failed",
                    json!({ "function": self.function.name(), "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        self.log(
            LogLevel::Info,
            "simulation.sample.completed",
            json!({
                "simulator": "lambda",
                "function": self.function.name(),
                "fields": output.field_names(),
            }),
        );
        Ok(output)
    }
}

/// Builder for [`LambdaSimulator`].
#[derive(Debug)]
pub struct LambdaSimulatorBuilder {
    function: SamplingFunction,
    cast_dtypes: CastDtypeRules,
    reserved: SampleRecord,
    rng: Option<RandomSource>,
    telemetry: Option<SimulationTelemetry>,
}

impl LambdaSimulatorBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new(function: SamplingFunction) -> Self {
        Self {
            function,
            cast_dtypes: CastDtypeRules::default(),
            reserved: SampleRecord::new(),
            rng: None,
            telemetry: None,
        }
    }

    /// Replaces the casting rules. Pass [`CastDtypeRules::none`] to keep raw dtypes.
    #[must_use]
    pub fn cast_dtypes(mut self, rules: CastDtypeRules) -> Self {
        self.cast_dtypes = rules;
        self
    }

    /// Adds one default keyword argument.
    #[must_use]
    pub fn reserved_argument(mut self, name: impl Into<String>, value: impl Into<Tensor>) -> Self {
        self.reserved.insert(name, value);
        self
    }

    /// Merges a whole record of default keyword arguments.
    #[must_use]
    pub fn reserved_arguments(mut self, arguments: SampleRecord) -> Self {
        self.reserved.merge(arguments);
        self
    }

    /// Uses an existing generator handle; clones of it share state.
    #[must_use]
    pub fn rng(mut self, rng: RandomSource) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Uses a fresh generator seeded with `seed`.
    #[must_use]
    pub fn seed(self, seed: u64) -> Self {
        self.rng(RandomSource::seeded(seed))
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the simulator.
    #[must_use]
    pub fn build(self) -> LambdaSimulator {
        LambdaSimulator {
            function: self.function,
            cast_dtypes: self.cast_dtypes,
            reserved: self.reserved,
            rng: self.rng.unwrap_or_default(),
            telemetry: self.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record, tensor::DType};
    use ndarray::ArrayD;
    use rand::Rng;
    use rand_distr::{Distribution, Normal};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn constant_sampler_is_stacked_and_narrowed() {
        let simulator = LambdaSimulator::unbatched(Parameters::none(), |_| Ok(record! { "x" => 1.0 }));
        let out = simulator.simulate(3).unwrap();
        assert_eq!(out["x"].dtype(), DType::Float32);
        assert_eq!(out["x"].shape(), &[3]);
        assert_eq!(out["x"].to_f64_vec(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn leading_dimensions_match_batch_shape() {
        let simulator = LambdaSimulator::builder(SamplingFunction::unbatched(
            "vector",
            Parameters::none(),
            |args| {
                let values: Vec<f64> = (0..4).map(|_| args.rng().gen()).collect();
                Ok(record! { "v" => values, "s" => 2_i64 })
            },
        ))
        .seed(3)
        .build();
        for dims in [vec![5], vec![2, 3], vec![1, 2, 2]] {
            let shape = BatchShape::new(dims.clone()).unwrap();
            let out = simulator.sample(&shape, &SampleRecord::new()).unwrap();
            assert_eq!(&out["v"].shape()[..dims.len()], dims.as_slice());
            assert_eq!(out["v"].shape()[dims.len()], 4);
            assert_eq!(out["s"].shape(), dims.as_slice());
        }
    }

    #[test]
    fn unbatched_draws_must_share_field_names() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let simulator = LambdaSimulator::unbatched(Parameters::none(), move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Ok(if call % 2 == 0 {
                record! { "x" => 1.0 }
            } else {
                record! { "y" => 1.0 }
            })
        });
        let err = simulator.simulate(2).unwrap_err();
        assert!(matches!(err, SimulationError::SchemaMismatch { index: 1, .. }));
    }

    #[test]
    fn zero_sized_batch_skips_the_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let simulator = LambdaSimulator::unbatched(Parameters::none(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(record! { "x" => 1.0 })
        });
        let out = simulator.simulate(0).unwrap();
        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn caller_context_overrides_reserved_arguments() {
        let function = SamplingFunction::unbatched("scale", Parameters::named(["scale"]), |args| {
            Ok(record! { "y" => args.get("scale")?.clone() })
        });
        let simulator = LambdaSimulator::builder(function)
            .reserved_argument("scale", 2.0)
            .cast_dtypes(CastDtypeRules::none())
            .build();

        let defaulted = simulator.simulate(2).unwrap();
        assert_eq!(defaulted["y"].to_f64_vec(), vec![2.0, 2.0]);
        assert_eq!(defaulted["y"].dtype(), DType::Float64);

        let overridden = simulator
            .sample(&BatchShape::count(2), &record! { "scale" => 5.0, "unused" => 1.0 })
            .unwrap();
        assert_eq!(overridden["y"].to_f64_vec(), vec![5.0, 5.0]);
        assert!(!overridden.contains("unused"));
    }

    #[test]
    fn seeded_simulators_are_reproducible() {
        let make = || {
            LambdaSimulator::builder(SamplingFunction::unbatched("u", Parameters::none(), |args| {
                Ok(record! { "u" => args.rng().gen::<f64>() })
            }))
            .seed(42)
            .build()
        };
        let a = make().simulate(4).unwrap();
        let b = make().simulate(4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn batched_and_unbatched_samplers_agree_in_distribution() {
        let normal = Normal::new(1.5, 0.5).unwrap();
        let unbatched = LambdaSimulator::builder(SamplingFunction::unbatched(
            "normal",
            Parameters::none(),
            move |args| Ok(record! { "z" => normal.sample(args.rng()) }),
        ))
        .seed(1)
        .build();
        let batched = LambdaSimulator::builder(SamplingFunction::batched(
            "normal",
            Parameters::none(),
            move |args| {
                let dims = args.batch_shape().dims().to_vec();
                let n = args.batch_shape().num_elements();
                let values: Vec<f64> = (0..n).map(|_| normal.sample(args.rng())).collect();
                Ok(record! { "z" => ArrayD::from_shape_vec(dims, values)? })
            },
        ))
        .seed(2)
        .build();

        let stats = |record: &SampleRecord| {
            let values = record["z"].to_f64_vec();
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            (mean, var)
        };
        let (mean_u, var_u) = stats(&unbatched.simulate(20_000).unwrap());
        let (mean_b, var_b) = stats(&batched.simulate(20_000).unwrap());
        assert!((mean_u - mean_b).abs() < 0.03);
        assert!((var_u - var_b).abs() < 0.03);
        assert!((mean_u - 1.5).abs() < 0.03);
    }
}
