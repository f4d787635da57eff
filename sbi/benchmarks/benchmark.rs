use std::{fmt, str::FromStr};

use sbi_simulators::{
    BatchShape, RandomSource, SampleRecord, SequentialSimulator, SimulationTelemetry, Simulator,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{bernoulli_glm_raw, error::BenchmarkError};

/// Static description of a benchmark task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkInfo {
    /// Registered task name.
    pub name: String,
    /// Whether the task simulator produces whole batches per call.
    pub simulator_is_batched: bool,
    /// Human readable parameter names, in parameter-vector order.
    pub parameter_names: Vec<String>,
    /// Configurator mode the task supports.
    pub configurator_info: String,
}

/// Registered benchmark tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Benchmark {
    /// Bernoulli GLM with raw binary observations.
    BernoulliGlmRaw,
}

impl Benchmark {
    /// Every registered task.
    pub const ALL: [Self; 1] = [Self::BernoulliGlmRaw];

    /// Registered name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BernoulliGlmRaw => bernoulli_glm_raw::NAME,
        }
    }

    /// Looks a task up by name.
    pub fn from_name(name: &str) -> Result<Self, BenchmarkError> {
        Self::ALL
            .into_iter()
            .find(|task| task.name() == name)
            .ok_or_else(|| BenchmarkError::UnknownTask {
                name: name.to_string(),
            })
    }

    /// Task metadata.
    #[must_use]
    pub fn info(self) -> BenchmarkInfo {
        match self {
            Self::BernoulliGlmRaw => bernoulli_glm_raw::info(),
        }
    }

    /// Default number of observations per simulated data set.
    #[must_use]
    pub const fn default_num_observations(self) -> usize {
        match self {
            Self::BernoulliGlmRaw => bernoulli_glm_raw::DEFAULT_NUM_OBSERVATIONS,
        }
    }

    /// Prior and simulator chained into one simulator that emits `prior_draws` and
    /// `sim_data`.
    #[must_use]
    pub fn pipeline(self, rng: RandomSource, num_observations: usize) -> SequentialSimulator {
        debug!(task = self.name(), num_observations, seed = ?rng.seed(), "building task pipeline");
        match self {
            Self::BernoulliGlmRaw => bernoulli_glm_raw::simulator_pipeline(rng, num_observations),
        }
    }

    /// Samples `batch_shape` forward draws through the task pipeline.
    ///
    /// Shapes without elements are rejected, since configurators need the task's
    /// fields to be present.
    pub fn simulate(
        self,
        batch_shape: &BatchShape,
        rng: RandomSource,
        num_observations: usize,
        telemetry: Option<&SimulationTelemetry>,
    ) -> Result<SampleRecord, BenchmarkError> {
        if batch_shape.num_elements() == 0 {
            return Err(BenchmarkError::EmptyBatch {
                batch_shape: batch_shape.to_string(),
            });
        }
        let mut pipeline = self.pipeline(rng, num_observations);
        if let Some(telemetry) = telemetry {
            pipeline = pipeline.with_telemetry(telemetry.clone());
        }
        Ok(pipeline.sample(batch_shape, &SampleRecord::new())?)
    }

    /// Runs the task configurator.
    pub fn configure(
        self,
        forward: &SampleRecord,
        mode: &str,
        as_summary_condition: bool,
    ) -> Result<SampleRecord, BenchmarkError> {
        match self {
            Self::BernoulliGlmRaw => {
                bernoulli_glm_raw::configurator(forward, mode, as_summary_condition)
            }
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Benchmark {
    type Err = BenchmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            "bernoulli_glm_raw".parse::<Benchmark>().unwrap(),
            Benchmark::BernoulliGlmRaw
        );
        let err = Benchmark::from_name("two_moons").unwrap_err();
        assert!(matches!(err, BenchmarkError::UnknownTask { ref name } if name == "two_moons"));
    }

    #[test]
    fn info_lists_parameter_names() {
        let info = Benchmark::BernoulliGlmRaw.info();
        assert!(!info.simulator_is_batched);
        assert_eq!(info.configurator_info, "posterior");
        assert_eq!(info.parameter_names.len(), 10);
        assert_eq!(info.parameter_names[0], "beta");
        assert_eq!(info.parameter_names[9], "f_9");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["name"], "bernoulli_glm_raw");
    }

    #[test]
    fn pipeline_and_configurator_work_together() {
        let task = Benchmark::BernoulliGlmRaw;
        let forward = task.pipeline(RandomSource::seeded(4), 8).simulate(3).unwrap();
        let configured = task.configure(&forward, "posterior", false).unwrap();
        assert_eq!(configured["parameters"].shape(), &[3, 10]);
        assert_eq!(configured["summary_conditions"].shape(), &[3, 8]);
        assert!(matches!(
            task.configure(&forward, "joint", false),
            Err(BenchmarkError::UnsupportedMode { .. })
        ));
    }

    #[test]
    fn simulate_matches_the_seeded_pipeline() {
        let task = Benchmark::BernoulliGlmRaw;
        let shape = BatchShape::count(2);
        let direct = task
            .simulate(&shape, RandomSource::seeded(9), 5, None)
            .unwrap();
        let piped = task.pipeline(RandomSource::seeded(9), 5).simulate(2).unwrap();
        assert_eq!(direct.field_names(), vec!["prior_draws", "sim_data"]);
        assert_eq!(direct["sim_data"].shape(), &[2, 5]);
        assert_eq!(direct["sim_data"].to_f64_vec(), piped["sim_data"].to_f64_vec());
    }

    #[test]
    fn empty_batches_are_rejected() {
        let err = Benchmark::BernoulliGlmRaw
            .simulate(&BatchShape::count(0), RandomSource::seeded(1), 5, None)
            .unwrap_err();
        assert!(matches!(
            err,
            BenchmarkError::EmptyBatch { ref batch_shape } if batch_shape == "(0,)"
        ));
        assert!(err.to_string().contains("no draws"));
    }
}
