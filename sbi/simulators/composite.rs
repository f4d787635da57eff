use serde_json::json;
use shared_logging::LogLevel;
use tracing::debug;

use crate::{
    error::SimulationError, record::SampleRecord, shape::BatchShape, simulator::Simulator,
    telemetry::SimulationTelemetry,
};

/// Runs full simulators in order, each one seeing the caller's context plus everything
/// produced so far.
///
/// Outputs are merged last-writer-wins. With `expand_outputs`, every one-dimensional
/// field gains a trailing axis of length 1.
#[derive(Default)]
pub struct CompositeSimulator {
    simulators: Vec<Box<dyn Simulator>>,
    expand_outputs: bool,
    telemetry: Option<SimulationTelemetry>,
}

impl std::fmt::Debug for CompositeSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSimulator")
            .field("simulators", &self.simulators.len())
            .field("expand_outputs", &self.expand_outputs)
            .finish_non_exhaustive()
    }
}

impl CompositeSimulator {
    /// Composes `simulators` without output expansion.
    #[must_use]
    pub fn new(simulators: Vec<Box<dyn Simulator>>) -> Self {
        Self {
            simulators,
            expand_outputs: false,
            telemetry: None,
        }
    }

    /// Appends a simulator.
    #[must_use]
    pub fn with(mut self, simulator: impl Simulator + 'static) -> Self {
        self.simulators.push(Box::new(simulator));
        self
    }

    /// Toggles trailing-axis expansion of one-dimensional outputs.
    #[must_use]
    pub const fn expand_outputs(mut self, expand: bool) -> Self {
        self.expand_outputs = expand;
        self
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Number of composed simulators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.simulators.len()
    }

    /// Whether nothing is composed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.simulators.is_empty()
    }
}

impl Simulator for CompositeSimulator {
    fn sample(
        &self,
        batch_shape: &BatchShape,
        context: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError> {
        let mut data = SampleRecord::new();
        for (position, simulator) in self.simulators.iter().enumerate() {
            debug!(position, fields = ?data.field_names(), "running composite member");
            let kwargs = context.clone().merged(data.clone());
            data.merge(simulator.sample(batch_shape, &kwargs)?);
        }
        if self.expand_outputs {
            data = data.expand_vectors();
        }
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(
                LogLevel::Info,
                "simulation.sample.completed",
                json!({
                    "simulator": "composite",
                    "batch_shape": batch_shape.dims(),
                    "fields": data.field_names(),
                }),
            );
        }
        Ok(data)
    }
}
