use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use sbi_benchmarks::Benchmark;
use sbi_networks::ResNetConfig;
use sbi_simulators::{BatchShape, CastDtypeRules, ShapeLike};
use serde::Deserialize;

/// Settings for one `sbi simulate` run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Benchmark task to simulate.
    pub task: Benchmark,
    /// Batch shape of the forward pass.
    pub batch_shape: BatchShape,
    /// Generator seed; entropy when absent.
    pub seed: Option<u64>,
    /// Observations per simulated data set.
    pub num_observations: usize,
    /// Casting applied to the raw simulator output.
    pub cast_dtypes: CastDtypeRules,
    /// Configurator mode.
    pub configurator_mode: String,
    /// Whether observations gain a trailing set axis.
    pub as_summary_condition: bool,
    /// JSON-lines telemetry sink.
    pub log_path: Option<PathBuf>,
    /// Optional residual embedding of the summary conditions.
    pub network: Option<ResNetConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            task: Benchmark::BernoulliGlmRaw,
            batch_shape: BatchShape::count(default_batch_count()),
            seed: None,
            num_observations: default_num_observations(),
            cast_dtypes: CastDtypeRules::default(),
            configurator_mode: default_configurator_mode(),
            as_summary_condition: true,
            log_path: None,
            network: None,
        }
    }
}

impl SimulationConfig {
    /// Loads configuration from a TOML file. Relative paths resolve against the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading simulation config {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml(&raw, &source_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text, resolving relative paths against `source_dir`.
    pub fn from_toml(raw: &str, source_dir: &Path) -> Result<Self> {
        let document: SimulationConfigSerde = toml::from_str(raw)?;
        let task: Benchmark = document.task.parse()?;
        let batch_shape = document
            .batch_shape
            .into_batch_shape()
            .context("invalid batch_shape")?;
        let cast_dtypes = match document.cast_dtypes {
            Some(rules) => CastDtypeRules::from_names(rules).context("invalid cast_dtypes")?,
            None => CastDtypeRules::default(),
        };
        let log_path = document.log_path.map(|candidate| {
            if candidate.is_relative() {
                source_dir.join(candidate)
            } else {
                candidate
            }
        });
        Ok(Self {
            task,
            batch_shape,
            seed: document.seed,
            num_observations: document
                .num_observations
                .unwrap_or_else(|| task.default_num_observations()),
            cast_dtypes,
            configurator_mode: document.configurator_mode,
            as_summary_condition: document.as_summary_condition,
            log_path,
            network: document.network,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SimulationConfigSerde {
    #[serde(default = "default_task")]
    task: String,
    #[serde(default)]
    batch_shape: BatchShapeRepr,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    num_observations: Option<usize>,
    #[serde(default)]
    cast_dtypes: Option<IndexMap<String, String>>,
    #[serde(default = "default_configurator_mode")]
    configurator_mode: String,
    #[serde(default = "default_true")]
    as_summary_condition: bool,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default)]
    network: Option<ResNetConfig>,
}

/// Batch shapes accepted in TOML: `8`, `[2, 4]` or `"2x4"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BatchShapeRepr {
    Count(i64),
    Dims(Vec<i64>),
    Text(String),
}

impl Default for BatchShapeRepr {
    fn default() -> Self {
        Self::Count(i64::try_from(default_batch_count()).unwrap_or(i64::MAX))
    }
}

impl BatchShapeRepr {
    fn into_batch_shape(self) -> Result<BatchShape, sbi_simulators::SimulationError> {
        match self {
            Self::Count(count) => count.into_batch_shape(),
            Self::Dims(dims) => dims.into_batch_shape(),
            Self::Text(text) => BatchShape::parse(&text),
        }
    }
}

const fn default_batch_count() -> usize {
    8
}

fn default_task() -> String {
    Benchmark::BernoulliGlmRaw.name().to_string()
}

const fn default_num_observations() -> usize {
    100
}

fn default_configurator_mode() -> String {
    "posterior".to_string()
}

const fn default_true() -> bool {
    true
}
