//! Bernoulli generalized linear model returning the raw binary observations.
//!
//! Ten parameters: an intercept `beta` and nine weights `f`. Observations are `T`
//! Bernoulli draws whose log-odds are a random Gaussian design projected onto `f`.

use anyhow::Context;
use ndarray::{Array1, Array2, ArrayView1, Ix1};
use once_cell::sync::Lazy;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use sbi_simulators::{
    record, DType, Parameters, RandomSource, SampleRecord, SamplingFunction, SequentialSimulator,
};

use crate::{benchmark::BenchmarkInfo, error::BenchmarkError};

/// Registered task name.
pub const NAME: &str = "bernoulli_glm_raw";

/// Number of weights in the linear predictor.
pub const NUM_WEIGHTS: usize = 9;

/// Intercept plus weights.
pub const NUM_PARAMETERS: usize = NUM_WEIGHTS + 1;

/// Default number of Bernoulli draws per simulation.
pub const DEFAULT_NUM_OBSERVATIONS: usize = 100;

/// Standard deviation of the intercept prior.
const BETA_SCALE: f64 = 2.0;

/// Banded lower-triangular matrix `F` with `F[i,i] = 1 + sqrt(i/9)`, `F[i,i-1] = -2`
/// and `F[i,i-2] = 1`. The weight prior covariance is `(FᵀF)⁻¹`.
static SMOOTHING: Lazy<Array2<f64>> = Lazy::new(|| {
    let mut f = Array2::<f64>::zeros((NUM_WEIGHTS, NUM_WEIGHTS));
    for i in 0..NUM_WEIGHTS {
        #[allow(clippy::cast_precision_loss)]
        let ratio = i as f64 / NUM_WEIGHTS as f64;
        f[[i, i]] = 1.0 + ratio.sqrt();
        if i >= 1 {
            f[[i, i - 1]] = -2.0;
        }
        if i >= 2 {
            f[[i, i - 2]] = 1.0;
        }
    }
    f
});

/// Task metadata.
#[must_use]
pub fn info() -> BenchmarkInfo {
    let mut parameter_names = vec!["beta".to_string()];
    parameter_names.extend((1..=NUM_WEIGHTS).map(|i| format!("f_{i}")));
    BenchmarkInfo {
        name: NAME.to_string(),
        simulator_is_batched: false,
        parameter_names,
        configurator_info: "posterior".to_string(),
    }
}

/// One prior draw `[beta, f_1, ..., f_9]`.
///
/// `beta ~ N(0, 2)`. The weights are `f = F⁻¹ z` with `z ~ N(0, I)`, which gives
/// `f ~ N(0, (FᵀF)⁻¹)` without inverting anything.
pub fn prior<R: Rng + ?Sized>(rng: &mut R) -> Array1<f64> {
    let beta: f64 = StandardNormal.sample(&mut *rng);
    let z: Array1<f64> = Array1::from_shape_fn(NUM_WEIGHTS, |_| StandardNormal.sample(&mut *rng));
    let weights = forward_substitute(&SMOOTHING, &z);

    let mut theta = Array1::zeros(NUM_PARAMETERS);
    theta[0] = BETA_SCALE * beta;
    theta.slice_mut(ndarray::s![1..]).assign(&weights);
    theta
}

/// Solves `L x = b` for lower-triangular `L`.
fn forward_substitute(lower: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in 0..n {
        let mut acc = b[i];
        for j in 0..i {
            acc -= lower[[i, j]] * x[j];
        }
        x[i] = acc / lower[[i, i]];
    }
    x
}

/// Simulates `num_observations` Bernoulli draws for one parameter vector.
pub fn simulator<R: Rng + ?Sized>(
    theta: ArrayView1<'_, f64>,
    num_observations: usize,
    rng: &mut R,
) -> Result<Array1<i64>, BenchmarkError> {
    if theta.len() != NUM_PARAMETERS {
        return Err(BenchmarkError::InvalidParameters {
            expected: NUM_PARAMETERS,
            actual: theta.len(),
        });
    }
    let beta = theta[0];
    let weights = theta.slice(ndarray::s![1..]);

    let design: Array2<f64> = Array2::from_shape_fn((NUM_WEIGHTS, num_observations), |_| {
        StandardNormal.sample(&mut *rng)
    });
    let logits = design.t().dot(&weights) + beta;
    Ok(logits.mapv(|logit| i64::from(rng.gen::<f64>() < sigmoid(logit))))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Adapts raw simulation output to the training layout.
///
/// In `posterior` mode `prior_draws` becomes `parameters` and `sim_data` becomes
/// `summary_conditions`, both `float32`. With `as_summary_condition` the observations
/// gain a trailing axis so each one is treated as a set element.
pub fn configurator(
    forward: &SampleRecord,
    mode: &str,
    as_summary_condition: bool,
) -> Result<SampleRecord, BenchmarkError> {
    if mode != "posterior" {
        return Err(BenchmarkError::UnsupportedMode {
            mode: mode.to_string(),
        });
    }
    let field = |name: &str| {
        forward.get(name).ok_or_else(|| BenchmarkError::MissingField {
            field: name.to_string(),
        })
    };
    let parameters = field("prior_draws")?.cast(DType::Float32);
    let observations = field("sim_data")?.cast(DType::Float32);
    let summary_conditions = if as_summary_condition {
        observations.expand_last()
    } else {
        observations
    };
    Ok(record! {
        "parameters" => parameters,
        "summary_conditions" => summary_conditions,
    })
}

/// Prior and likelihood chained as two unbatched stages producing `prior_draws` and
/// `sim_data`.
#[must_use]
pub fn simulator_pipeline(rng: RandomSource, num_observations: usize) -> SequentialSimulator {
    let prior_stage = SamplingFunction::unbatched("prior", Parameters::none(), |args| {
        Ok(record! { "prior_draws" => prior(args.rng()) })
    });
    let likelihood_stage = SamplingFunction::unbatched(
        "likelihood",
        Parameters::named(["prior_draws"]),
        move |args| {
            let theta = args
                .get("prior_draws")?
                .to_f64_array()
                .into_dimensionality::<Ix1>()
                .context("prior_draws must be a vector per draw")?;
            let data = simulator(theta.view(), num_observations, args.rng())?;
            Ok(record! { "sim_data" => data })
        },
    );
    SequentialSimulator::new([prior_stage, likelihood_stage]).with_rng(rng)
}
