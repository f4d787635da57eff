use serde_json::json;
use shared_logging::LogLevel;
use tracing::debug;

use crate::{
    error::SimulationError,
    helper::RandomSource,
    record::SampleRecord,
    sampling::{ContextMode, SamplingFunction},
    shape::BatchShape,
    simulator::Simulator,
    telemetry::SimulationTelemetry,
    tensor::{Device, TensorError},
};

/// One step of a [`SequentialSimulator`].
pub enum Stage {
    /// A sampling function, auto-vectorized when unbatched.
    Function(SamplingFunction),
    /// A nested simulator; receives everything produced so far as context.
    Simulator {
        /// Name used in logs and errors.
        name: String,
        /// The nested simulator.
        simulator: Box<dyn Simulator>,
    },
}

impl Stage {
    /// Wraps a nested simulator.
    pub fn simulator(name: impl Into<String>, simulator: impl Simulator + 'static) -> Self {
        Self::Simulator {
            name: name.into(),
            simulator: Box::new(simulator),
        }
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Function(function) => function.name(),
            Self::Simulator { name, .. } => name.as_str(),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(function) => f.debug_tuple("Function").field(function).finish(),
            Self::Simulator { name, .. } => f
                .debug_struct("Simulator")
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

impl From<SamplingFunction> for Stage {
    fn from(function: SamplingFunction) -> Self {
        Self::Function(function)
    }
}

/// Sequentially factorized simulator.
///
/// Stages run left to right and each one is conditioned on everything produced before
/// it, so the joint factorizes causally as
/// `p(x_1, ..., x_n) = p(x_1) * p(x_2 | x_1) * ... * p(x_n | x_1, ..., x_{n-1})`.
///
/// Function stages receive the fields they declare. Unbatched function stages are
/// called once per batch element with that element's slice of every field. Caller
/// context whose leading dimensions already equal the batch shape is treated as batched
/// and sliced the same way, which is what enclosing sequential and composite simulators
/// pass; any other context value is shared by every element. All tensors handed to
/// stages, and every stage output, live on the simulator's device.
#[derive(Debug)]
pub struct SequentialSimulator {
    stages: Vec<Stage>,
    device: Device,
    rng: RandomSource,
    telemetry: Option<SimulationTelemetry>,
}

impl SequentialSimulator {
    /// Builds a chain from stages in causal order.
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Stage>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            device: Device::Cpu,
            rng: RandomSource::default(),
            telemetry: None,
        }
    }

    /// Places context and outputs on `device`.
    #[must_use]
    pub const fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Uses an existing generator handle.
    #[must_use]
    pub fn with_rng(mut self, rng: RandomSource) -> Self {
        self.rng = rng;
        self
    }

    /// Uses a fresh generator seeded with `seed`.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(RandomSource::seeded(seed))
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Appends a stage at the end of the chain.
    pub fn push(&mut self, stage: impl Into<Stage>) {
        self.stages.push(stage.into());
    }

    /// Stages in causal order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Device of context and outputs.
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn run_stage(
        &self,
        stage: &Stage,
        batch_shape: &BatchShape,
        available: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError> {
        match stage {
            Stage::Function(function) => {
                let kwargs = available.filter(function.parameters());
                let mut rng = self.rng.lock();
                function.sample_batch(batch_shape, &kwargs, ContextMode::PerElement, &mut rng)
            }
            Stage::Simulator { simulator, .. } => simulator.sample(batch_shape, available),
        }
    }

    /// Reports cross-device failures under the name of the stage that ran them, nested
    /// simulators included.
    fn classify(stage: &Stage, err: SimulationError) -> SimulationError {
        let devices = match &err {
            SimulationError::Tensor(TensorError::DeviceMismatch { left, right })
            | SimulationError::DeviceMismatch { left, right, .. } => Some((*left, *right)),
            SimulationError::Stage { source, .. } => SimulationError::find_device_mismatch(source),
            _ => None,
        };
        let Some((left, right)) = devices else {
            return err;
        };
        let source = match err {
            SimulationError::Stage { source, .. } => source,
            other => anyhow::Error::new(other),
        };
        SimulationError::DeviceMismatch {
            stage: stage.name().to_string(),
            left,
            right,
            source,
        }
    }
}

impl Simulator for SequentialSimulator {
    fn sample(
        &self,
        batch_shape: &BatchShape,
        context: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError> {
        self.log(
            LogLevel::Debug,
            "simulation.sample.start",
            json!({
                "simulator": "sequential",
                "stages": self.stages.iter().map(Stage::name).collect::<Vec<_>>(),
                "batch_shape": batch_shape.dims(),
                "device": self.device.to_string(),
            }),
        );

        let mut shared = SampleRecord::new();
        for (name, value) in context.iter() {
            let batched = if value.shape().starts_with(batch_shape.dims()) {
                value.clone()
            } else {
                value
                    .broadcast_leading(batch_shape.dims())
                    .map_err(|err| SimulationError::field(name, err))?
            };
            shared.insert(name, batched.to_device(self.device));
        }

        let mut data = SampleRecord::new();
        for stage in &self.stages {
            debug!(stage = stage.name(), fields = ?data.field_names(), "running sequential stage");
            let available = shared.clone().merged(data.clone());
            let output = match self.run_stage(stage, batch_shape, &available) {
                Ok(output) => output,
                Err(err) => {
                    let err = Self::classify(stage, err);
                    self.log(
                        LogLevel::Error,
                        "simulation.stage.failed",
                        json!({ "stage": stage.name(), "error": err.to_string() }),
                    );
                    return Err(err);
                }
            };
            self.log(
                LogLevel::Debug,
                "simulation.stage.completed",
                json!({ "stage": stage.name(), "fields": output.field_names() }),
            );
            data.merge(output.to_device(self.device));
        }

        self.log(
            LogLevel::Info,
            "simulation.sample.completed",
            json!({ "simulator": "sequential", "fields": data.field_names() }),
        );
        Ok(data)
    }
}
